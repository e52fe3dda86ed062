//! Configuration loading for procure.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/procure/config.toml.
//!
//! Settings are built once at process start and handed to each component;
//! nothing in the engine reads configuration from globals.

use chrono::NaiveDate;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ProcureError;
use crate::watermark::parse_day;

/// Tuning for the categorization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizeSettings {
    /// Number of categories assigned to each record.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Record IDs per sub-batch handed to a worker.
    ///
    /// Larger sub-batches amortize per-call overhead but raise latency
    /// and the amount of work lost when one fails.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent workers scoring and applying sub-batches.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum sub-batches submitted before draining completions.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// Per sub-batch timeout. A timed-out sub-batch counts as failed.
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,

    /// Day used as the categorized watermark when none is stored (`YYYYMMDD`).
    #[serde(default = "default_floor_date")]
    pub floor_date: String,
}

fn default_top_k() -> usize {
    5
}

fn default_batch_size() -> usize {
    500
}

fn default_workers() -> usize {
    4
}

fn default_max_inflight() -> usize {
    8
}

fn default_worker_timeout_secs() -> u64 {
    120
}

fn default_floor_date() -> String {
    "19700101".to_string()
}

impl Default for CategorizeSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_inflight: default_max_inflight(),
            worker_timeout_secs: default_worker_timeout_secs(),
            floor_date: default_floor_date(),
        }
    }
}

impl CategorizeSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.top_k == 0 {
            return Err("top_k must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }
        if self.max_inflight == 0 {
            return Err("max_inflight must be > 0".to_string());
        }
        if self.worker_timeout_secs == 0 {
            return Err("worker_timeout_secs must be > 0".to_string());
        }
        self.floor()
            .map_err(|e| format!("floor_date: {}", e))
            .map(|_| ())
    }

    /// Parsed floor date.
    pub fn floor(&self) -> Result<NaiveDate, ProcureError> {
        parse_day(&self.floor_date)
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Embedding model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum attempts per text on retryable errors
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,

    /// Concurrent embedding requests during backfill
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_embedding_max_retries() -> u32 {
    5
}

fn default_embedding_concurrency() -> usize {
    4
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key: None,
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
            concurrency: default_embedding_concurrency(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Domains processed when none are named on the command line
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,

    /// Categorization engine tuning
    #[serde(default)]
    pub categorize: CategorizeSettings,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "procure")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_domains() -> Vec<String> {
    vec!["tenders".to_string()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            domains: default_domains(),
            categorize: CategorizeSettings::default(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/procure/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (PROCURE_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ProcureError> {
        let config_dir = ProjectDirs::from("", "", "procure")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            // 1. Built-in defaults
            .set_default("db_path", default_db_path())
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("domains", default_domains())
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("categorize.top_k", default_top_k() as i64)
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("categorize.batch_size", default_batch_size() as i64)
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("categorize.workers", default_workers() as i64)
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("categorize.max_inflight", default_max_inflight() as i64)
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("embedding.base_url", default_embedding_base_url())
            .map_err(|e| ProcureError::Config(e.to_string()))?
            .set_default("embedding.model", default_embedding_model())
            .map_err(|e| ProcureError::Config(e.to_string()))?
            // 2. Default config file (~/.config/procure/config.toml)
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        // 3. CLI-specified config file (higher precedence than default)
        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 4. Environment variables (highest precedence before CLI flags)
        // Format: PROCURE_DB_PATH, PROCURE_CATEGORIZE__TOP_K, PROCURE_EMBEDDING__API_KEY
        builder = builder.add_source(
            Environment::with_prefix("PROCURE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("domains")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ProcureError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| ProcureError::Config(e.to_string()))?;

        settings.categorize.validate().map_err(ProcureError::Config)?;
        Ok(settings)
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.domains, vec!["tenders".to_string()]);
        assert_eq!(settings.categorize.top_k, 5);
        assert_eq!(settings.categorize.batch_size, 500);
        assert_eq!(settings.categorize.workers, 4);
        assert_eq!(settings.categorize.max_inflight, 8);
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.categorize.top_k, 5);
        assert_eq!(settings.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("procure-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("custom.toml");
        std::fs::write(
            &path,
            "domains = [\"tenders\", \"awards\"]\n[categorize]\ntop_k = 3\nworkers = 2\n",
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.domains, vec!["tenders".to_string(), "awards".to_string()]);
        assert_eq!(settings.categorize.top_k, 3);
        assert_eq!(settings.categorize.workers, 2);
        assert_eq!(settings.categorize.batch_size, 500);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_categorize_validation() {
        let mut config = CategorizeSettings::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.floor().unwrap(), NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());

        config.top_k = 0;
        assert!(config.validate().is_err());

        config.top_k = 5;
        config.max_inflight = 0;
        assert!(config.validate().is_err());

        config.max_inflight = 8;
        config.floor_date = "not-a-date".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut settings = EmbeddingSettings::default();
        settings.api_key = Some("sk-secret".to_string());
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_expanded_db_path_plain() {
        let settings = Settings {
            db_path: "/var/lib/procure/db".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.expanded_db_path(), PathBuf::from("/var/lib/procure/db"));
    }
}
