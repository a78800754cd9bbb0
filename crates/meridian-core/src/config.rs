//! Configuration management for Meridian.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (MERIDIAN__ prefix, `__` separator)
//! 2. Config file (meridian.toml)
//! 3. Defaults

use serde::Deserialize;

use crate::error::CoreError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeridianConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub index: IndexConfig,
}

/// Identity of the owning metadata collection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// The collection id that owns this store. Checked against the control vertex on open.
    #[serde(default)]
    pub metadata_collection_id: String,

    /// Display name recorded on the control vertex. Left unchanged when unset.
    #[serde(default)]
    pub metadata_collection_name: Option<String>,
}

/// Index lifecycle tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// How long to wait for an index to reach ENABLED.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Poll interval while waiting on index status.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Property short names indexed with the tokenized Text mapping.
    #[serde(default = "default_text_properties")]
    pub text_properties: Vec<String>,
}

fn default_wait_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_text_properties() -> Vec<String> {
    vec!["description".to_string()]
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            text_properties: default_text_properties(),
        }
    }
}

/// Load configuration from `<file_prefix>.toml` (optional) and the environment.
pub fn load(file_prefix: &str) -> Result<MeridianConfig, CoreError> {
    config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("MERIDIAN")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize::<MeridianConfig>())
        .map_err(|e| CoreError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MeridianConfig::default();
        assert_eq!(config.index.wait_timeout_ms, 60_000);
        assert_eq!(config.index.poll_interval_ms, 250);
        assert_eq!(config.index.text_properties, vec!["description"]);
        assert!(config.store.metadata_collection_id.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meridian.toml");
        std::fs::write(
            &path,
            "[store]\nmetadata_collection_id = \"c-42\"\n\n[index]\nwait_timeout_ms = 500\n",
        )
        .unwrap();

        let prefix = dir.path().join("meridian");
        let config = load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.store.metadata_collection_id, "c-42");
        assert_eq!(config.index.wait_timeout_ms, 500);
        assert_eq!(config.index.poll_interval_ms, 250);
    }
}
