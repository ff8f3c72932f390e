//! Sync run report.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::MigrationSummary;
use crate::state::{PhaseEntry, RunStatus, SyncMode};

/// Result of a sync run, complete or partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Source repository name.
    pub source: String,

    /// Target repository name.
    pub target: String,

    /// Final (or current) status.
    pub status: RunStatus,

    /// Data pass mode, once decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SyncMode>,

    /// Nothing was written.
    pub test: bool,

    /// SHA256 of the effective configuration.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall time in milliseconds.
    pub elapsed_ms: u64,

    /// Schema changes applied (or planned, in test mode).
    #[serde(default)]
    pub schema: MigrationSummary,

    /// Human-readable schema steps.
    #[serde(default)]
    pub schema_steps: Vec<String>,

    pub objects_inserted: usize,
    pub objects_updated: usize,
    pub objects_unchanged: usize,
    pub objects_deleted: usize,

    /// Attributes whose value list was written.
    pub attributes_written: usize,

    /// Attribute value rows written.
    pub values_written: u64,

    /// LOB attributes copied by streaming.
    #[serde(default)]
    pub lobs_streamed: usize,

    /// Batches processed.
    pub batches: usize,

    /// Phase history.
    #[serde(default)]
    pub phases: Vec<PhaseEntry>,

    /// Error message if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    /// Create a report for a run that is about to start.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        test: bool,
        config_hash: impl Into<String>,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            target: target.into(),
            status: RunStatus::Running,
            mode: None,
            test,
            config_hash: config_hash.into(),
            started_at: Utc::now(),
            completed_at: None,
            elapsed_ms: 0,
            schema: MigrationSummary::default(),
            schema_steps: Vec::new(),
            objects_inserted: 0,
            objects_updated: 0,
            objects_unchanged: 0,
            objects_deleted: 0,
            attributes_written: 0,
            values_written: 0,
            lobs_streamed: 0,
            batches: 0,
            phases: Vec::new(),
            error: None,
        }
    }

    /// Objects inserted, updated or deleted.
    pub fn objects_synced(&self) -> usize {
        self.objects_inserted + self.objects_updated + self.objects_deleted
    }

    /// True if the run changed (or, in test mode, would change) anything.
    pub fn has_changes(&self) -> bool {
        self.objects_synced() > 0 || !self.schema_steps.is_empty()
    }

    /// Close the report.
    pub fn finish(&mut self, status: RunStatus, elapsed: Duration) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        self.elapsed_ms = elapsed.as_millis() as u64;
    }

    /// One-line summary. Always contains `finished in <N> ms.`.
    pub fn message(&self) -> String {
        let status = match self.status {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        format!(
            "{}Sync {} -> {} {}: {} inserted, {} updated, {} deleted, {} unchanged, \
             {} attributes written, {} schema changes in {} batches; finished in {} ms.",
            if self.test { "[test] " } else { "" },
            self.source,
            self.target,
            status,
            self.objects_inserted,
            self.objects_updated,
            self.objects_deleted,
            self.objects_unchanged,
            self.attributes_written,
            self.schema_steps.len(),
            self.batches,
            self.elapsed_ms
        )
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
