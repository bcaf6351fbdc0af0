use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::facts::critical::CriticalCategory;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VerityConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub facts: FactsConfig,
    pub cache: CacheConfig,
    pub extraction: ExtractionConfig,
    pub retriever: RetrieverConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Confidence policy for the entity store and conflict resolver.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FactsConfig {
    /// Confidence at which a proposed entity becomes active.
    pub activation_threshold: f64,
    /// Added to an entity's confidence each time identical evidence is seen again.
    pub reinforcement_increment: f64,
    /// Two differing attribute values at or above this confidence count as a contradiction.
    pub high_confidence: f64,
    /// Categories the prompt confidence score is computed over.
    pub required_categories: Vec<CriticalCategory>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_hours: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Confidence assigned to candidates produced by the deterministic pattern rules.
    pub pattern_confidence: f64,
    pub llm_enabled: bool,
    /// OpenAI-compatible chat completions endpoint.
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_timeout_ms: u64,
    /// Messages with at least this many words go to the LLM even when a pattern matched.
    pub complex_message_min_words: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Base URL of the semantic retrieval service. No advisory context when unset.
    pub url: Option<String>,
    pub k: usize,
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 7431,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_verity_dir()
            .join("facts.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.7,
            reinforcement_increment: 0.1,
            high_confidence: 0.8,
            required_categories: vec![CriticalCategory::UserName, CriticalCategory::PetNames],
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pattern_confidence: 0.9,
            llm_enabled: false,
            llm_endpoint: "https://api.openai.com/v1/chat/completions".into(),
            llm_model: "gpt-4o-mini".into(),
            llm_api_key: None,
            llm_timeout_ms: 3000,
            complex_message_min_words: 14,
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            url: None,
            k: 5,
            timeout_ms: 2000,
        }
    }
}

/// Longer TTLs are clamped to ten years.
pub const MAX_CACHE_TTL_HOURS: u64 = 24 * 365 * 10;

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours.min(MAX_CACHE_TTL_HOURS) as i64)
    }
}

/// Returns `~/.verity/`
pub fn default_verity_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".verity")
}

/// Returns the default config file path: `~/.verity/config.toml`
pub fn default_config_path() -> PathBuf {
    default_verity_dir().join("config.toml")
}

impl VerityConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            VerityConfig::default()
        };

        config.apply_env_overrides();
        if config.cache.ttl_hours > MAX_CACHE_TTL_HOURS {
            tracing::warn!(
                ttl_hours = config.cache.ttl_hours,
                max = MAX_CACHE_TTL_HOURS,
                "cache TTL clamped"
            );
            config.cache.ttl_hours = MAX_CACHE_TTL_HOURS;
        }
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("VERITY_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("VERITY_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("VERITY_LLM_ENDPOINT") {
            self.extraction.llm_endpoint = val;
            self.extraction.llm_enabled = true;
        }
        if let Ok(val) = std::env::var("VERITY_LLM_API_KEY") {
            self.extraction.llm_api_key = Some(val);
        }
        if let Ok(val) = std::env::var("VERITY_RETRIEVER_URL") {
            self.retriever.url = Some(val);
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = VerityConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.cache.ttl_hours, 24);
        assert!((config.extraction.pattern_confidence - 0.9).abs() < f64::EPSILON);
        assert!(config.storage.db_path.ends_with("facts.db"));
        assert_eq!(
            config.facts.required_categories,
            vec![CriticalCategory::UserName, CriticalCategory::PetNames]
        );
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[facts]
reinforcement_increment = 0.05
required_categories = ["user_name", "pet_names", "location"]

[cache]
ttl_hours = 1
"#;
        let config: VerityConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert!((config.facts.reinforcement_increment - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.facts.required_categories.len(), 3);
        assert_eq!(config.cache.ttl_hours, 1);
        // defaults still apply for unset fields
        assert!((config.facts.activation_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.extraction.llm_timeout_ms, 3000);
    }

    #[test]
    fn huge_cache_ttl_is_clamped() {
        let cache = CacheConfig { ttl_hours: u64::MAX };
        assert_eq!(cache.ttl(), chrono::Duration::hours(MAX_CACHE_TTL_HOURS as i64));

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, format!("[cache]\nttl_hours = {}\n", i64::MAX)).unwrap();
        let loaded = VerityConfig::load_from(&path).unwrap();
        assert_eq!(loaded.cache.ttl_hours, MAX_CACHE_TTL_HOURS);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = VerityConfig::default();
        std::env::set_var("VERITY_DB", "/tmp/override.db");
        std::env::set_var("VERITY_LOG_LEVEL", "trace");
        std::env::set_var("VERITY_RETRIEVER_URL", "http://localhost:8080");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.retriever.url.as_deref(), Some("http://localhost:8080"));

        // Clean up
        std::env::remove_var("VERITY_DB");
        std::env::remove_var("VERITY_LOG_LEVEL");
        std::env::remove_var("VERITY_RETRIEVER_URL");
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/db/facts.db"), PathBuf::from("/var/db/facts.db"));
    }
}
