use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Instance configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Initial value of the global ready flag.
    pub ready: bool,
    /// Pause before a build engine restarts after a replay error.
    pub restart_backoff_ms: u64,
    /// Values mapped concurrently on a stream; output order is preserved.
    pub map_concurrency: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            ready: true,
            restart_backoff_ms: 25,
            map_concurrency: 8,
        }
    }
}

impl DbConfig {
    pub fn from_toml_str(s: &str) -> DbResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.map_concurrency == 0 {
            return Err(DbError::Config("map_concurrency must be at least 1".into()));
        }
        Ok(())
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config() {
        let c = DbConfig::default();
        assert!(c.ready);
        assert_eq!(c.restart_backoff(), Duration::from_millis(25));
        assert_eq!(c.map_concurrency, 8);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = DbConfig::from_toml_str("ready = false\n").unwrap();
        assert!(!c.ready);
        assert_eq!(c.restart_backoff_ms, 25);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = DbConfig::from_toml_str("map_concurrency = 0").unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            DbConfig::from_toml_str("ready = \"maybe\""),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "restart_backoff_ms = 5\nmap_concurrency = 2").unwrap();
        let c = DbConfig::load(file.path()).unwrap();
        assert_eq!(c.restart_backoff_ms, 5);
        assert_eq!(c.map_concurrency, 2);
        assert!(matches!(DbConfig::load("/nonexistent/cairn.toml"), Err(DbError::Io(_))));
    }
}
