//! Error types for the synchronization library.

use thiserror::Error;

use crate::core::AttributeKind;
use crate::orchestrator::SyncReport;
use crate::state::SyncPhase;

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relational driver error from either repository.
    #[error("Repository error: {0}")]
    Repository(#[from] sqlx::Error),

    /// The source holds no content objects and empty sources were not allowed.
    #[error("Source repository '{0}' is empty - refusing to sync without allow_empty")]
    EmptySourceNotAllowed(String),

    /// A structural schema change is required but was not permitted.
    #[error("Structural change of attribute {object_type}.{attribute} not allowed: {reason}")]
    SchemaChangeNotAllowed {
        object_type: i32,
        attribute: String,
        reason: String,
    },

    /// Attribute name is empty or collides with a reserved instance column.
    #[error("Invalid attribute name '{0}'")]
    InvalidAttributeName(String),

    /// Attribute flags contradict each other.
    #[error("Inconsistent definition of attribute '{name}': {reason}")]
    InconsistentAttributeDefinition { name: String, reason: String },

    /// Value cannot be stored in its attribute's kind.
    #[error("Value of kind {found} cannot be stored in {kind} attribute '{attribute}'")]
    ValueKindMismatch {
        attribute: String,
        kind: AttributeKind,
        found: AttributeKind,
    },

    /// Object type referenced but not defined in the catalog.
    #[error("Unknown object type {0}")]
    UnknownObjectType(i32),

    /// Attribute referenced but not defined for its object type.
    #[error("Unknown attribute '{attribute}' for object type {object_type}")]
    UnknownAttribute { object_type: i32, attribute: String },

    /// Content id not of the form "objType.objId".
    #[error("Invalid content id '{0}'")]
    InvalidContentId(String),

    /// Rule could not be parsed or evaluated.
    #[error("Rule error: {0}")]
    Rule(String),

    /// Run state machine misuse.
    #[error("State error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled between batches.
    #[error("Sync cancelled")]
    Cancelled,

    /// A run failed after it started; carries the partial report.
    #[error("Sync failed during {phase}: {source}")]
    Failed {
        phase: SyncPhase,
        report: Box<SyncReport>,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Create a SchemaChangeNotAllowed error.
    pub fn schema_change(
        object_type: i32,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SyncError::SchemaChangeNotAllowed {
            object_type,
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Create an InconsistentAttributeDefinition error.
    pub fn inconsistent(name: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::InconsistentAttributeDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// The error that caused a run to fail, unwrapping [`SyncError::Failed`].
    pub fn root_cause(&self) -> &SyncError {
        match self {
            SyncError::Failed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The partial report attached to a failed run, if any.
    pub fn partial_report(&self) -> Option<&SyncReport> {
        match self {
            SyncError::Failed { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self.root_cause() {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Rule(_) => 2,
            SyncError::EmptySourceNotAllowed(_) => 3,
            SyncError::SchemaChangeNotAllowed { .. } => 4,
            SyncError::InvalidAttributeName(_)
            | SyncError::InconsistentAttributeDefinition { .. } => 5,
            SyncError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        if let Some(report) = self.partial_report() {
            output.push_str(&format!("\n\n{}", report.message()));
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
