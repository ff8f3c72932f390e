//! Run state machine for a sync run.
//!
//! ```text
//! Idle -> Validating -> SchemaSync -> DataSync -> [DeletePass] -> Done
//!            \______________\____________\____________\______-> Failed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Validating,
    SchemaSync,
    DataSync,
    DeletePass,
    Done,
    Failed,
}

impl SyncPhase {
    /// Whether the run may move from this phase to `next`.
    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, SchemaSync)
                | (SchemaSync, DataSync)
                | (DataSync, DeletePass)
                | (DataSync, Done)
                | (DeletePass, Done)
                | (Validating | SchemaSync | DataSync | DeletePass, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncPhase::Done | SyncPhase::Failed)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Validating => "validating",
            SyncPhase::SchemaSync => "schema sync",
            SyncPhase::DataSync => "data sync",
            SyncPhase::DeletePass => "delete pass",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Data pass mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Every rule-matching source object is a candidate.
    Full,
    /// Only source objects updated after the target watermark.
    Incremental,
}

/// One entered phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub phase: SyncPhase,
    pub entered_at: DateTime<Utc>,
}

/// Enforces legal phase transitions and records the history.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: SyncPhase,
    history: Vec<PhaseEntry>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: SyncPhase::Idle,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> SyncPhase {
        self.current
    }

    pub fn history(&self) -> &[PhaseEntry] {
        &self.history
    }

    /// Move to the next phase.
    pub fn advance(&mut self, next: SyncPhase) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(SyncError::State(format!(
                "illegal transition {} -> {}",
                self.current, next
            )));
        }
        self.current = next;
        self.history.push(PhaseEntry {
            phase: next,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Enter `Failed` unless the run already ended. Returns the phase that failed.
    pub fn fail(&mut self) -> SyncPhase {
        let failed = self.current;
        if self.current.can_transition_to(SyncPhase::Failed) {
            self.current = SyncPhase::Failed;
            self.history.push(PhaseEntry {
                phase: SyncPhase::Failed,
                entered_at: Utc::now(),
            });
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut tracker = PhaseTracker::new();
        for phase in [
            SyncPhase::Validating,
            SyncPhase::SchemaSync,
            SyncPhase::DataSync,
            SyncPhase::DeletePass,
            SyncPhase::Done,
        ] {
            tracker.advance(phase).unwrap();
        }
        assert!(tracker.current().is_terminal());
        assert_eq!(tracker.history().len(), 5);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(SyncPhase::DataSync).is_err());
        assert!(tracker.advance(SyncPhase::Failed).is_err());
        tracker.advance(SyncPhase::Validating).unwrap();
        assert!(tracker.advance(SyncPhase::Done).is_err());
    }

    #[test]
    fn test_fail_records_phase() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(SyncPhase::Validating).unwrap();
        tracker.advance(SyncPhase::SchemaSync).unwrap();
        assert_eq!(tracker.fail(), SyncPhase::SchemaSync);
        assert_eq!(tracker.current(), SyncPhase::Failed);
        // Already terminal.
        assert_eq!(tracker.fail(), SyncPhase::Failed);
        assert_eq!(tracker.history().len(), 3);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SyncPhase::SchemaSync.to_string(), "schema sync");
        assert_eq!(
            serde_json::to_string(&SyncPhase::DeletePass).unwrap(),
            "\"delete_pass\""
        );
    }
}
