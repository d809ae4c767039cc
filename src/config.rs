//! Counter configuration
//!
//! Loaded from TOML or from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | DELTA_COUNTER_QUEUE | - | Queue name (required) |
//! | DELTA_COUNTER_BATCH_SIZE | 1000 | Max tasks per lease |
//! | DELTA_COUNTER_VISIBILITY_SECS | 600 | Lease visibility timeout |

use crate::error::{CounterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LEASE_BATCH_SIZE: usize = 1000;
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration consumed by emitters and aggregators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Name of the pull queue carrying delta messages
    pub queue_name: String,
    /// Max tasks leased by one collect call
    #[serde(default = "default_lease_batch_size")]
    pub lease_batch_size: usize,
    /// How long leased tasks stay invisible to other collectors
    #[serde(default = "default_visibility_timeout", with = "duration_secs")]
    pub visibility_timeout: Duration,
}

fn default_lease_batch_size() -> usize {
    DEFAULT_LEASE_BATCH_SIZE
}

fn default_visibility_timeout() -> Duration {
    DEFAULT_VISIBILITY_TIMEOUT
}

impl CounterConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        CounterConfig {
            queue_name: queue_name.into(),
            lease_batch_size: DEFAULT_LEASE_BATCH_SIZE,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_lease_batch_size(mut self, size: usize) -> Self {
        self.lease_batch_size = size;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Queue name, or `Configuration` if it is empty
    pub fn queue_name(&self) -> Result<&str> {
        if self.queue_name.is_empty() {
            return Err(CounterError::empty_queue_name());
        }
        Ok(&self.queue_name)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue_name()?;
        if self.lease_batch_size == 0 {
            return Err(CounterError::Configuration(
                "lease batch size must be positive".to_string(),
            ));
        }
        if self.visibility_timeout.is_zero() {
            return Err(CounterError::Configuration(
                "visibility timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CounterConfig = toml::from_str(text)
            .map_err(|e| CounterError::Configuration(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CounterError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from environment variables. Unparseable numbers fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let config = CounterConfig {
            queue_name: std::env::var("DELTA_COUNTER_QUEUE").unwrap_or_default(),
            lease_batch_size: std::env::var("DELTA_COUNTER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LEASE_BATCH_SIZE),
            visibility_timeout: std::env::var("DELTA_COUNTER_VISIBILITY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CounterConfig::new("counts");
        assert_eq!(config.lease_batch_size, 1000);
        assert_eq!(config.visibility_timeout, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_queue_name_rejected() {
        let err = CounterConfig::new("").validate().unwrap_err();
        assert_eq!(err, CounterError::empty_queue_name());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let err = CounterConfig::new("q")
            .with_lease_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_toml_with_defaults() {
        let config = CounterConfig::from_toml_str(r#"queue_name = "page-views""#).unwrap();
        assert_eq!(config, CounterConfig::new("page-views"));
    }

    #[test]
    fn test_toml_overrides() {
        let config = CounterConfig::from_toml_str(
            r#"
            queue_name = "likes"
            lease_batch_size = 50
            visibility_timeout = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.lease_batch_size, 50);
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_toml_empty_queue_rejected() {
        let err = CounterConfig::from_toml_str(r#"queue_name = """#).unwrap_err();
        assert!(err.is_configuration());
        assert!(CounterConfig::from_toml_str("lease_batch_size = 5")
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue_name = \"from-file\"").unwrap();
        writeln!(file, "lease_batch_size = 10").unwrap();

        let config = CounterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queue_name, "from-file");
        assert_eq!(config.lease_batch_size, 10);

        assert!(CounterConfig::from_file("/nonexistent/counter.toml")
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = CounterConfig::new("q").with_visibility_timeout(Duration::from_secs(42));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CounterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("DELTA_COUNTER_QUEUE", "env-queue");
        std::env::set_var("DELTA_COUNTER_BATCH_SIZE", "25");
        std::env::set_var("DELTA_COUNTER_VISIBILITY_SECS", "not-a-number");

        let config = CounterConfig::from_env().unwrap();
        assert_eq!(config.queue_name, "env-queue");
        assert_eq!(config.lease_batch_size, 25);
        assert_eq!(config.visibility_timeout, DEFAULT_VISIBILITY_TIMEOUT);

        std::env::remove_var("DELTA_COUNTER_QUEUE");
        std::env::remove_var("DELTA_COUNTER_BATCH_SIZE");
        std::env::remove_var("DELTA_COUNTER_VISIBILITY_SECS");
    }
}
