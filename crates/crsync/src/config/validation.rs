//! Configuration validation.

use super::Config;
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.url.trim().is_empty() {
        return Err(SyncError::Config("source.url is required".into()));
    }
    if config.target.url.trim().is_empty() {
        return Err(SyncError::Config("target.url is required".into()));
    }
    if !config.source.url.starts_with("sqlite:") {
        return Err(SyncError::Config(format!(
            "source.url must be a sqlite: URL, got '{}'",
            config.source.url
        )));
    }
    if !config.target.url.starts_with("sqlite:") {
        return Err(SyncError::Config(format!(
            "target.url must be a sqlite: URL, got '{}'",
            config.target.url
        )));
    }

    // Cannot sync a repository onto itself
    if config.source.url == config.target.url {
        return Err(SyncError::Config(
            "source and target cannot be the same repository".into(),
        ));
    }

    if config.source.max_connections == 0 || config.target.max_connections == 0 {
        return Err(SyncError::Config(
            "max_connections must be at least 1".into(),
        ));
    }
    if config.sync.batch_size == 0 {
        return Err(SyncError::Config(
            "sync.batch_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.sync.lob_stream_threshold {
        return Err(SyncError::Config(
            "sync.lob_stream_threshold must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::from_yaml(
            r#"
source:
  url: "sqlite:/tmp/source.db"
target:
  url: "sqlite:/tmp/target.db"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_same_repository_rejected() {
        let mut config = valid_config();
        config.target.url = config.source.url.clone();
        assert!(matches!(validate(&config), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.sync.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = valid_config();
        config.sync.lob_stream_threshold = Some(0);
        assert!(validate(&config).is_err());
        config.sync.lob_stream_threshold = Some(1);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_non_sqlite_url_rejected() {
        let mut config = valid_config();
        config.source.url = "postgres://localhost/cms".into();
        assert!(validate(&config).is_err());
    }
}
