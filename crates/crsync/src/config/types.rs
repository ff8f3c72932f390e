//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source repository (read only).
    pub source: RepositoryConfig,

    /// Target repository (converges toward the source).
    pub target: RepositoryConfig,

    /// Sync behavior configuration.
    #[serde(default)]
    pub sync: SyncOptions,
}

/// Connection settings for one content repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Display name used in logs and reports (defaults to the URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Connection URL, e.g. `sqlite:/var/lib/cms/content.db`.
    pub url: String,

    /// Maximum pool connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl RepositoryConfig {
    /// Create a config for a URL with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: url.into(),
            max_connections: default_max_connections(),
        }
    }

    /// Name for logs and reports.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Flags controlling one sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Boolean rule selecting participating objects (empty matches all).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// Plan and report without writing anything.
    #[serde(default)]
    pub test: bool,

    /// Allow syncing from an empty source.
    #[serde(default)]
    pub allow_empty: bool,

    /// Allow structural schema changes (kind, multivalue, optimization, drops).
    #[serde(default)]
    pub allow_alter_table: bool,

    /// Never migrate quick-column optimizations.
    #[serde(default)]
    pub ignore_optimized: bool,

    /// Delete target objects that are not (or no longer) selected.
    #[serde(default)]
    pub delete: bool,

    /// Read the source inside one transaction.
    #[serde(default)]
    pub source_transaction: bool,

    /// Commit target writes per batch.
    #[serde(default = "default_true")]
    pub target_transaction: bool,

    /// Objects per batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Always stream LOB values.
    #[serde(default)]
    pub use_lob_streams: bool,

    /// Stream LOB values once the number of candidates reaches this count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lob_stream_threshold: Option<usize>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            rule: None,
            test: false,
            allow_empty: false,
            allow_alter_table: false,
            ignore_optimized: false,
            delete: false,
            source_transaction: false,
            target_transaction: default_true(),
            batch_size: default_batch_size(),
            use_lob_streams: false,
            lob_stream_threshold: None,
        }
    }
}

impl SyncOptions {
    /// The rule, if set to something other than whitespace.
    pub fn effective_rule(&self) -> Option<&str> {
        self.rule.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}
