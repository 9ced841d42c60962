//! Migration configuration file support
//!
//! Handles parsing of `.bi-migration.toml` configuration files and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::convert::translation::RetryPolicy;

/// Default configuration filename
pub const CONFIG_FILENAME: &str = ".bi-migration.toml";

/// Default calculation store filename
pub const DEFAULT_CALCULATIONS_FILE: &str = "calculations.json";

/// Environment variable for the translation service endpoint
pub const ENV_TRANSLATION_ENDPOINT: &str = "BI_MIGRATION_TRANSLATION_ENDPOINT";

/// Environment variable for the translation timeout in seconds
pub const ENV_TRANSLATION_TIMEOUT: &str = "BI_MIGRATION_TRANSLATION_TIMEOUT_SECS";

/// Environment variable for the translation retry count
pub const ENV_TRANSLATION_RETRIES: &str = "BI_MIGRATION_TRANSLATION_MAX_RETRIES";

/// Environment variable for the Jaccard merge threshold
pub const ENV_JACCARD_THRESHOLD: &str = "BI_MIGRATION_JACCARD_THRESHOLD";

/// Environment variable for the calculation store filename
pub const ENV_CALCULATIONS_FILE: &str = "BI_MIGRATION_CALCULATIONS_FILE";

/// Error type for configuration handling
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Extraction configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSection {
    /// Characters of query text kept in a query table's description
    #[serde(default = "default_query_preview_length")]
    pub query_preview_length: usize,

    /// Synthesize stub tables for relationship endpoints that do not exist
    #[serde(default = "default_true")]
    pub synthesize_stub_tables: bool,
}

fn default_query_preview_length() -> usize {
    200
}

fn default_true() -> bool {
    true
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            query_preview_length: default_query_preview_length(),
            synthesize_stub_tables: true,
        }
    }
}

/// Deduplication configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSection {
    /// Minimum Jaccard similarity of column-name sets for two same-named tables to merge
    #[serde(default = "default_jaccard_threshold")]
    pub jaccard_threshold: f64,
}

fn default_jaccard_threshold() -> f64 {
    0.7
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            jaccard_threshold: default_jaccard_threshold(),
        }
    }
}

/// Calculation resolution configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSection {
    /// Maximum substitution passes per expression
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    10
}

impl Default for ResolutionSection {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Translation service configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationSection {
    /// HTTP endpoint of the translation service (identity translation when unset)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

impl Default for TranslationSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

/// Calculation store configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Store filename (relative to the output directory, or absolute)
    #[serde(default = "default_calculations_file")]
    pub calculations_file: String,
}

fn default_calculations_file() -> String {
    DEFAULT_CALCULATIONS_FILE.to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            calculations_file: default_calculations_file(),
        }
    }
}

/// Main configuration structure
///
/// Represents the `.bi-migration.toml` configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationConfig {
    #[serde(default)]
    pub extraction: ExtractionSection,

    #[serde(default)]
    pub dedup: DedupSection,

    #[serde(default)]
    pub resolution: ResolutionSection,

    #[serde(default)]
    pub translation: TranslationSection,

    #[serde(default)]
    pub store: StoreSection,
}

impl MigrationConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a directory
    ///
    /// Looks for `.bi-migration.toml` in the directory.
    /// Falls back to defaults if not found.
    pub fn load(dir: &Path) -> ConfigResult<Self> {
        let config_path = dir.join(CONFIG_FILENAME);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(format!("Failed to read config: {}", e)))?;

            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> ConfigResult<()> {
        let config_path = dir.join(CONFIG_FILENAME);
        let content = self.to_toml()?;

        std::fs::write(&config_path, content)
            .map_err(|e| ConfigError::IoError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to serialize config: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var(ENV_TRANSLATION_ENDPOINT) {
            self.translation.endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }

        if let Ok(secs) = std::env::var(ENV_TRANSLATION_TIMEOUT)
            && let Ok(secs) = secs.parse()
        {
            self.translation.timeout_secs = secs;
        }

        if let Ok(retries) = std::env::var(ENV_TRANSLATION_RETRIES)
            && let Ok(retries) = retries.parse()
        {
            self.translation.max_retries = retries;
        }

        if let Ok(threshold) = std::env::var(ENV_JACCARD_THRESHOLD)
            && let Ok(threshold) = threshold.parse()
        {
            self.dedup.jaccard_threshold = threshold;
        }

        if let Ok(file) = std::env::var(ENV_CALCULATIONS_FILE) {
            self.store.calculations_file = file;
        }
    }

    /// Reject values the pipeline can not work with
    pub fn validate(&self) -> ConfigResult<()> {
        let threshold = self.dedup.jaccard_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                key: "dedup.jaccard_threshold".to_string(),
                message: format!("{} is outside 0.0..=1.0", threshold),
            });
        }
        if self.resolution.max_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "resolution.max_depth".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Retry policy for translation calls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.translation.max_retries,
            initial_backoff: Duration::from_millis(self.translation.initial_backoff_ms),
            timeout: Duration::from_secs(self.translation.timeout_secs),
        }
    }

    /// Path of the calculation store for an output directory
    pub fn calculations_path(&self, output_dir: &Path) -> PathBuf {
        if self.store.calculations_file.is_empty() {
            output_dir.join(DEFAULT_CALCULATIONS_FILE)
        } else if Path::new(&self.store.calculations_file).is_absolute() {
            PathBuf::from(&self.store.calculations_file)
        } else {
            output_dir.join(&self.store.calculations_file)
        }
    }

    /// Check if configuration exists in a directory
    pub fn exists(dir: &Path) -> bool {
        dir.join(CONFIG_FILENAME).exists()
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# BI Migration SDK Configuration

[extraction]
# Characters of custom SQL kept in a query table's description
query_preview_length = 200

# Create stub tables for relationship endpoints missing from the model
# (when false, such relationships are discarded)
synthesize_stub_tables = true

[dedup]
# Same-named tables merge when their column-name sets are at least this similar
jaccard_threshold = 0.7

[resolution]
# Maximum substitution passes when resolving calculation references
max_depth = 10

[translation]
# endpoint = "http://localhost:8080/translate"
timeout_secs = 30
max_retries = 3
initial_backoff_ms = 500

[store]
# Calculation store (relative to the output directory, or absolute)
calculations_file = "calculations.json"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::new();
        assert_eq!(config.extraction.query_preview_length, 200);
        assert!(config.extraction.synthesize_stub_tables);
        assert_eq!(config.dedup.jaccard_threshold, 0.7);
        assert_eq!(config.resolution.max_depth, 10);
        assert_eq!(config.translation.max_retries, 3);
        assert_eq!(config.store.calculations_file, DEFAULT_CALCULATIONS_FILE);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[dedup]
jaccard_threshold = 0.8

[translation]
endpoint = "http://translator.local/api"
max_retries = 5
"#;
        let config = MigrationConfig::parse(toml).unwrap();
        assert_eq!(config.dedup.jaccard_threshold, 0.8);
        assert_eq!(
            config.translation.endpoint.as_deref(),
            Some("http://translator.local/api")
        );
        assert_eq!(config.translation.max_retries, 5);
        assert_eq!(config.translation.timeout_secs, 30);
        assert_eq!(config.resolution.max_depth, 10);
    }

    #[test]
    fn test_sample_config_parses() {
        let config = MigrationConfig::parse(sample_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.translation.initial_backoff_ms, 500);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let config = MigrationConfig::parse("[dedup]\njaccard_threshold = 1.5\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = MigrationConfig::new();
        config.extraction.query_preview_length = 80;

        config.save(dir.path()).unwrap();
        assert!(MigrationConfig::exists(dir.path()));

        let loaded = MigrationConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.extraction.query_preview_length, 80);
    }

    #[test]
    fn test_calculations_path() {
        let config = MigrationConfig::new();
        let out = Path::new("/out");
        assert_eq!(config.calculations_path(out), PathBuf::from("/out/calculations.json"));
    }

    #[test]
    fn test_retry_policy() {
        let policy = MigrationConfig::new().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }
}
