use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.watch_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "watch_directory must not be empty".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    // A single file write typically produces several OS notifications; windows
    // outside this range either miss the burst or delay ingestion noticeably.
    if !(100..=10_000).contains(&config.debounce_ms) {
        return Err(ConfigError::Validation {
            message: format!(
                "debounce_ms must be between 100 and 10000, got {}",
                config.debounce_ms
            ),
        });
    }

    if config.retry_backoff_ms == 0 {
        return Err(ConfigError::Validation {
            message: "retry_backoff_ms must be at least 1".to_string(),
        });
    }

    Ok(())
}
