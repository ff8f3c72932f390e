//! Rule filter over content objects.
//!
//! The sync core never interprets rule text itself. It receives a
//! [`Predicate`] from a [`RuleParser`] and asks it, per object, whether the
//! object participates. [`ExpressionParser`] is the bundled parser.

mod expr;

use std::fmt;
use std::sync::Arc;

use crate::core::object::ContentObject;
use crate::error::Result;

pub use expr::ExpressionParser;

/// Boolean condition over a content object.
pub trait Predicate: Send + Sync {
    /// Evaluate against an object whose header and required attributes are loaded.
    fn matches(&self, object: &ContentObject) -> Result<bool>;

    /// Attribute names the predicate reads.
    fn required_attributes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Turns rule text into a predicate.
pub trait RuleParser: Send + Sync {
    fn parse(&self, rule: &str) -> Result<Box<dyn Predicate>>;
}

/// Predicate backed by a closure.
pub struct FnPredicate<F> {
    f: F,
    attributes: Vec<String>,
}

impl<F> FnPredicate<F>
where
    F: Fn(&ContentObject) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            attributes: Vec::new(),
        }
    }

    /// Declare attributes the closure reads.
    pub fn reading(mut self, attributes: &[&str]) -> Self {
        self.attributes = attributes.iter().map(|a| a.to_string()).collect();
        self
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&ContentObject) -> bool + Send + Sync,
{
    fn matches(&self, object: &ContentObject) -> Result<bool> {
        Ok((self.f)(object))
    }

    fn required_attributes(&self) -> Vec<String> {
        self.attributes.clone()
    }
}

/// Participation filter for one run. Without a predicate everything matches.
#[derive(Clone, Default)]
pub struct RuleFilter {
    expression: Option<String>,
    predicate: Option<Arc<dyn Predicate>>,
}

impl RuleFilter {
    /// Filter that matches every object.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Parse rule text; `None` or blank text matches everything.
    pub fn parse(rule: Option<&str>, parser: &dyn RuleParser) -> Result<Self> {
        match rule.map(str::trim).filter(|r| !r.is_empty()) {
            None => Ok(Self::match_all()),
            Some(text) => Ok(Self {
                expression: Some(text.to_string()),
                predicate: Some(Arc::from(parser.parse(text)?)),
            }),
        }
    }

    /// Wrap an existing predicate.
    pub fn from_predicate(predicate: impl Predicate + 'static) -> Self {
        Self {
            expression: None,
            predicate: Some(Arc::new(predicate)),
        }
    }

    pub fn is_match_all(&self) -> bool {
        self.predicate.is_none()
    }

    /// Rule text, if the filter was parsed from one.
    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    pub fn matches(&self, object: &ContentObject) -> Result<bool> {
        match &self.predicate {
            None => Ok(true),
            Some(p) => p.matches(object),
        }
    }

    pub fn required_attributes(&self) -> Vec<String> {
        let mut names = self
            .predicate
            .as_ref()
            .map(|p| p.required_attributes())
            .unwrap_or_default();
        names.sort();
        names.dedup();
        names
    }
}

impl fmt::Debug for RuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleFilter")
            .field("expression", &self.expression)
            .field("match_all", &self.is_match_all())
            .finish()
    }
}
