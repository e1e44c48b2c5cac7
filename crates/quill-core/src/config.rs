use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the project and document managers.
///
/// Loaded from TOML; every field is optional and falls back to
/// [`CoreConfig::default`]. Durations are written as integer milliseconds:
///
/// ```toml
/// inline_threshold = 65536
/// store_timeout_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Text content longer than this many bytes is externalized.
    pub inline_threshold: u64,
    /// Upper bound on every metadata or blob store call.
    #[serde(rename = "store_timeout_ms", with = "millis")]
    pub store_timeout: Duration,
    /// Upper bound on the background `last_accessed_at` touch.
    #[serde(rename = "touch_timeout_ms", with = "millis")]
    pub touch_timeout: Duration,
    /// Listing limits are clamped to `1..=max_page_size`.
    pub max_page_size: usize,
    /// Largest accepted binary upload.
    pub max_upload_bytes: u64,
    /// Download link lifetimes are clamped to this.
    #[serde(rename = "max_presign_ttl_ms", with = "millis")]
    pub max_presign_ttl: Duration,
    /// Retries of a project compare-and-set before reporting a conflict.
    pub max_cas_retries: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 100 * 1024,
            store_timeout: Duration::from_secs(10),
            touch_timeout: Duration::from_secs(2),
            max_page_size: 100,
            max_upload_bytes: 50 * 1024 * 1024,
            max_presign_ttl: Duration::from_secs(3600),
            max_cas_retries: 3,
        }
    }
}

/// Errors from loading or validating a [`CoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl CoreConfig {
    /// A default configuration with a different inline threshold.
    pub fn with_threshold(inline_threshold: u64) -> Self {
        Self {
            inline_threshold,
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("store_timeout_ms", self.store_timeout.is_zero()),
            ("touch_timeout_ms", self.touch_timeout.is_zero()),
            ("max_presign_ttl_ms", self.max_presign_ttl.is_zero()),
            ("max_page_size", self.max_page_size == 0),
            ("max_upload_bytes", self.max_upload_bytes == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ConfigError::Invalid(format!("{field} must be positive"))),
            None => Ok(()),
        }
    }

    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(1, self.max_page_size)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
