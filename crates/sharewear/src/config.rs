//! Configuration for the marshaling and dispatch layers.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default bound on the blocking reconnect performed before dispatch.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default locator scheme.
pub const DEFAULT_URI_SCHEME: &str = "wear";

/// Default prefix for synthetic tagged-map keys.
pub const DEFAULT_KEY_PREFIX: &str = "Record";

/// Configuration shared by the dispatcher, the client and the buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// How long an inbound dispatch may block waiting for a reconnect.
    #[serde(with = "duration_serde")]
    pub reconnect_timeout: Duration,

    /// Scheme used when building locators (`<scheme>://<node>/<path>`).
    pub uri_scheme: String,

    /// Prefix of the synthetic keys written into tagged maps.
    pub key_prefix: String,

    /// Whether `start()` subscribes to data, message and peer events, or
    /// only to connection callbacks.
    pub add_api_listeners: bool,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            uri_scheme: DEFAULT_URI_SCHEME.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            add_api_listeners: true,
        }
    }
}

impl ShareConfig {
    /// Save the config to a JSON file, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Load config from a JSON file, or return defaults if the file is
    /// missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Cannot load config file, using defaults: {e}");
                Self::default()
            }
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShareError;

    #[test]
    fn test_default_config() {
        let config = ShareConfig::default();
        assert_eq!(config.reconnect_timeout, Duration::from_secs(10));
        assert_eq!(config.uri_scheme, "wear");
        assert_eq!(config.key_prefix, "Record");
        assert!(config.add_api_listeners);
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let mut config = ShareConfig::default();
        config.reconnect_timeout = Duration::from_secs(3);
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ShareConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.reconnect_timeout, Duration::from_secs(3));
        assert_eq!(deserialized.key_prefix, config.key_prefix);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ShareConfig = serde_json::from_str(r#"{"uri_scheme": "peer"}"#).unwrap();
        assert_eq!(config.uri_scheme, "peer");
        assert_eq!(config.reconnect_timeout, DEFAULT_RECONNECT_TIMEOUT);
        assert!(config.add_api_listeners);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sharewear.json");

        let mut original = ShareConfig::default();
        original.add_api_listeners = false;
        original.key_prefix = "Shared".to_string();
        original.save_to_file(&path).unwrap();

        let loaded = ShareConfig::load_or_default(&path);
        assert!(!loaded.add_api_listeners);
        assert_eq!(loaded.key_prefix, "Shared");
    }

    #[test]
    fn test_config_load_corrupt_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharewear.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = ShareConfig::load_or_default(&path);
        assert_eq!(config.uri_scheme, DEFAULT_URI_SCHEME);
    }

    #[test]
    fn test_config_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShareConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
    }

    #[test]
    fn test_load_from_file_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = ShareConfig::load_from_file(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(ShareError::Io(_))));

        let path = dir.path().join("sharewear.json");
        std::fs::write(&path, "{ not json").unwrap();
        let corrupt = ShareConfig::load_from_file(&path);
        assert!(matches!(corrupt, Err(ShareError::Serialization(_))));
    }
}
