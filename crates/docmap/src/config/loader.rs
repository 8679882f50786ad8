use std::path::Path;

use crate::config::schema::ImportConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ImportConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ImportConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: ImportConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &ImportConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.accepted_media_types.is_empty() {
        return Err(ConfigError::Validation {
            message: "accepted_media_types must not be empty".to_string(),
        });
    }
    for media_type in &config.accepted_media_types {
        let mut parts = media_type.split('/');
        let valid = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(kind), Some(sub), None) if !kind.trim().is_empty() && !sub.trim().is_empty()
        );
        if !valid {
            return Err(ConfigError::Validation {
                message: format!("Invalid media type '{}'", media_type),
            });
        }
    }

    if config.max_upload_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "max_upload_bytes must be positive".to_string(),
        });
    }

    if config.classification.min_confidence > 100 {
        return Err(ConfigError::Validation {
            message: format!(
                "classification.min_confidence must be at most 100, got {}",
                config.classification.min_confidence
            ),
        });
    }

    if config.extraction.max_concurrent_dispatches == 0 {
        return Err(ConfigError::Validation {
            message: "extraction.max_concurrent_dispatches must be positive".to_string(),
        });
    }

    if config.extraction.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "extraction.request_timeout_secs must be positive".to_string(),
        });
    }

    if config.progress.stale_job_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "progress.stale_job_timeout_secs must be positive".to_string(),
        });
    }

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown log level '{}'", config.logging.level),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.progress.stale_job_timeout_secs, 1800);
        assert_eq!(config.database.cache_retention_secs, 3600);
        assert!(config.accepts_media_type("application/pdf"));
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "version": "1.0",
            "accepted_media_types": ["application/pdf"],
            "max_upload_bytes": 1048576,
            "database": {"enabled": true, "path": "/var/lib/docmap/docmap.db", "cache_retention_secs": 120},
            "extraction": {
                "base_url": "http://extract.local",
                "callback_url": "http://docmap.local/callbacks",
                "request_timeout_secs": 10,
                "max_concurrent_dispatches": 2
            },
            "classification": {"min_confidence": 60},
            "progress": {"recent_events": 5, "poll_interval_ms": 1000, "stale_job_timeout_secs": 600},
            "logging": {"level": "debug", "json": true}
        }"#;
        let config = load_config_from_str(json).unwrap();
        assert_eq!(config.max_upload_bytes, 1_048_576);
        assert_eq!(config.classification.min_confidence, 60);
        assert_eq!(config.extraction.max_concurrent_dispatches, 2);
        assert_eq!(config.progress.recent_events, 5);
        assert_eq!(config.database.cache_retention_secs, 120);
        assert!(config.logging.json);
        assert!(!config.accepts_media_type("text/plain"));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let err = load_config_from_str(r#"{"version": "2.0"}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SchemaValidation { .. } | ConfigError::Validation { .. }
        ));
    }

    #[test]
    fn test_confidence_above_100_rejected_by_schema() {
        let err = load_config_from_str(
            r#"{"version": "1.0", "classification": {"min_confidence": 120}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_unknown_field_rejected_by_schema() {
        let err = load_config_from_str(r#"{"version": "1.0", "watch": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_bad_media_type_rejected() {
        let err = load_config_from_str(
            r#"{"version": "1.0", "accepted_media_types": ["pdf"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. } | ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let err = load_config_from_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docmap.json");
        std::fs::write(&path, r#"{"version": "1.0", "logging": {"level": "warn"}}"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.logging.level, "warn");

        let missing = load_config(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));
    }
}
