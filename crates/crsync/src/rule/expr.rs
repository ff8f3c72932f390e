//! Bundled rule expression language.
//!
//! ```text
//! node_id == 1 || (obj_type == 10002 AND object.name != "tmp")
//! ```
//!
//! Operands are header fields (`contentid`, `obj_type`, `obj_id`, `node_id`,
//! `mother_obj_type`, `mother_obj_id`, `motherid`, `updatetimestamp`),
//! attributes (`object.<name>`) and literals (numbers, quoted strings,
//! `true`, `false`, `null`). A comparison against a multivalue attribute
//! holds if it holds for any of its values.

use std::cmp::Ordering;

use super::{Predicate, RuleParser};
use crate::core::object::ContentObject;
use crate::core::value::Value;
use crate::error::{Result, SyncError};

const ATTRIBUTE_PREFIX: &str = "object.";

/// Parser for the bundled expression language.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionParser;

impl ExpressionParser {
    pub fn new() -> Self {
        Self
    }
}

impl RuleParser for ExpressionParser {
    fn parse(&self, rule: &str) -> Result<Box<dyn Predicate>> {
        let tokens = tokenize(rule)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(SyncError::Rule(format!(
                "unexpected {:?} in rule '{}'",
                token, rule
            )));
        }
        Ok(Box::new(ExprPredicate { expr }))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn from_operator(op: &str) -> Option<Self> {
        match op {
            "==" | "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::NotEq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::LtEq),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::GtEq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    fn truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0,
            Scalar::Text(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Null => None,
        }
    }

    fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
            (Scalar::Null, _) | (_, Scalar::Null) => None,
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (a, b) => a.as_number()?.partial_cmp(&b.as_number()?),
        }
    }

    fn from_value(value: &Value) -> Scalar {
        match value {
            Value::Text(s) | Value::LongText(s) | Value::Link(s) => Scalar::Text(s.clone()),
            Value::Int(v) => Scalar::Number(*v as f64),
            Value::Long(v) => Scalar::Number(*v as f64),
            Value::Double(v) => Scalar::Number(*v),
            Value::Date(d) => Scalar::Number(d.and_utc().timestamp() as f64),
            Value::Blob(b) => Scalar::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Field(String),
    Attribute(String),
    Literal(Scalar),
}

impl Operand {
    fn collect_attribute(&self, out: &mut Vec<String>) {
        if let Operand::Attribute(name) = self {
            out.push(name.clone());
        }
    }

    fn resolve(&self, object: &ContentObject) -> Result<Vec<Scalar>> {
        match self {
            Operand::Literal(s) => Ok(vec![s.clone()]),
            Operand::Attribute(name) => {
                let values = object.values(name);
                if values.is_empty() {
                    Ok(vec![Scalar::Null])
                } else {
                    Ok(values.iter().map(Scalar::from_value).collect())
                }
            }
            Operand::Field(field) => {
                let mother = object.mother.unwrap_or_default();
                let scalar = match field.as_str() {
                    "contentid" => Scalar::Text(object.id.to_string()),
                    "obj_type" => Scalar::Number(object.id.obj_type as f64),
                    "obj_id" => Scalar::Number(object.id.obj_id as f64),
                    "node_id" => Scalar::Number(object.node_id as f64),
                    "mother_obj_type" => Scalar::Number(mother.obj_type as f64),
                    "mother_obj_id" => Scalar::Number(mother.obj_id as f64),
                    "motherid" => object
                        .mother
                        .map(|m| Scalar::Text(m.to_string()))
                        .unwrap_or(Scalar::Null),
                    "updatetimestamp" => Scalar::Number(object.update_timestamp as f64),
                    other => {
                        return Err(SyncError::Rule(format!("unknown field '{}'", other)));
                    }
                };
                Ok(vec![scalar])
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Comparison {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Truthy(Operand),
}

impl Expr {
    fn eval(&self, object: &ContentObject) -> Result<bool> {
        match self {
            Expr::And(a, b) => Ok(a.eval(object)? && b.eval(object)?),
            Expr::Or(a, b) => Ok(a.eval(object)? || b.eval(object)?),
            Expr::Not(e) => Ok(!e.eval(object)?),
            Expr::Truthy(operand) => Ok(operand.resolve(object)?.iter().any(Scalar::truthy)),
            Expr::Comparison { left, op, right } => {
                let left = left.resolve(object)?;
                let right = right.resolve(object)?;
                if *op == CompareOp::NotEq {
                    return Ok(!any_pair(&left, &right, CompareOp::Eq));
                }
                Ok(any_pair(&left, &right, *op))
            }
        }
    }

    fn collect_attributes(&self, out: &mut Vec<String>) {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect_attributes(out);
                b.collect_attributes(out);
            }
            Expr::Not(e) => e.collect_attributes(out),
            Expr::Truthy(operand) => operand.collect_attribute(out),
            Expr::Comparison { left, right, .. } => {
                left.collect_attribute(out);
                right.collect_attribute(out);
            }
        }
    }
}

fn any_pair(left: &[Scalar], right: &[Scalar], op: CompareOp) -> bool {
    left.iter().any(|l| {
        right.iter().any(|r| match l.compare(r) {
            None => false,
            Some(ord) => match op {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::NotEq => ord != Ordering::Equal,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::LtEq => ord != Ordering::Greater,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::GtEq => ord != Ordering::Less,
            },
        })
    })
}

struct ExprPredicate {
    expr: Expr,
}

impl Predicate for ExprPredicate {
    fn matches(&self, object: &ContentObject) -> Result<bool> {
        self.expr.eval(object)
    }

    fn required_attributes(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.expr.collect_attributes(&mut names);
        names
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(SyncError::Rule(format!("expected '{}{}' at {}", c, c, i)));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
                if let Some(op) = CompareOp::from_operator(&two) {
                    tokens.push(Token::Op(op));
                    i += 2;
                } else if c == '!' {
                    tokens.push(Token::Not);
                    i += 1;
                } else if let Some(op) = CompareOp::from_operator(&c.to_string()) {
                    tokens.push(Token::Op(op));
                    i += 1;
                } else {
                    return Err(SyncError::Rule(format!("unexpected '{}' at {}", c, i)));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(SyncError::Rule("unterminated string".into())),
                        Some('\\') if chars.get(i + 1).is_some() => {
                            text.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse()
                    .map_err(|_| SyncError::Rule(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(SyncError::Rule(format!("unexpected '{}' at {}", other, i)));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.parse_unary()?));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            if self.next() != Some(Token::RParen) {
                return Err(SyncError::Rule("missing ')'".into()));
            }
            return Ok(inner);
        }

        let left = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Comparison { left, op, right });
        }
        Ok(Expr::Truthy(left))
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Operand::Literal(Scalar::Number(n))),
            Some(Token::Str(s)) => Ok(Operand::Literal(Scalar::Text(s))),
            Some(Token::Ident(word)) => {
                let lower = word.to_ascii_lowercase();
                Ok(match lower.as_str() {
                    "true" => Operand::Literal(Scalar::Bool(true)),
                    "false" => Operand::Literal(Scalar::Bool(false)),
                    "null" => Operand::Literal(Scalar::Null),
                    _ => match word.strip_prefix(ATTRIBUTE_PREFIX) {
                        Some(name) if !name.is_empty() => Operand::Attribute(name.to_string()),
                        _ => Operand::Field(lower),
                    },
                })
            }
            Some(other) => Err(SyncError::Rule(format!("expected operand, found {:?}", other))),
            None => Err(SyncError::Rule("unexpected end of rule".into())),
        }
    }
}
