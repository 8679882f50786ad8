use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration of the import pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    pub version: String,
    #[serde(default = "default_accepted_media_types")]
    pub accepted_media_types: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_accepted_media_types() -> Vec<String> {
    vec![
        "application/pdf".to_string(),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
        "text/plain".to_string(),
        "text/markdown".to_string(),
    ]
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            accepted_media_types: default_accepted_media_types(),
            max_upload_bytes: default_max_upload_bytes(),
            database: DatabaseConfig::default(),
            extraction: ExtractionConfig::default(),
            classification: ClassificationConfig::default(),
            progress: ProgressConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ImportConfig {
    /// Checks a media type against the accepted list, ignoring case and parameters.
    pub fn accepts_media_type(&self, media_type: &str) -> bool {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.accepted_media_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(&essence))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Persist jobs to SQLite. Jobs live in memory only when disabled.
    #[serde(default)]
    pub enabled: bool,
    /// Database file; defaults to `~/.docmap/data/docmap.db`.
    #[serde(default)]
    pub path: Option<String>,
    /// Finished jobs idle this long leave the in-memory cache. They stay
    /// readable from the database. Ignored when persistence is disabled.
    #[serde(default = "default_cache_retention_secs")]
    pub cache_retention_secs: u64,
}

fn default_cache_retention_secs() -> u64 {
    3600
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            cache_retention_secs: default_cache_retention_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Resolves the database file, or `None` when persistence is off.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        match &self.path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Where the service should post result messages.
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_dispatches() -> usize {
    num_cpus::get()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            callback_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Suggestions below this confidence are recorded as unmapped.
    #[serde(default)]
    pub min_confidence: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_recent_events")]
    pub recent_events: usize,
    /// Suggested client polling interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// In-flight jobs idle this long are failed by the stale sweeper.
    #[serde(default = "default_stale_job_timeout_secs")]
    pub stale_job_timeout_secs: u64,
}

fn default_recent_events() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_stale_job_timeout_secs() -> u64 {
    1800
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            recent_events: default_recent_events(),
            poll_interval_ms: default_poll_interval_ms(),
            stale_job_timeout_secs: default_stale_job_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
