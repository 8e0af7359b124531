use std::path::Path;

use crate::config::schema::{Config, EngineCommand};
use crate::error::ConfigError;

pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// One year.
pub const MAX_SWEEP_INTERVAL_HOURS: u64 = 8760;

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

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(invalid(format!(
            "base_url must be an http(s) URL: {}",
            config.base_url
        )));
    }

    if config.publisher.channel_capacity == 0 {
        return Err(invalid("publisher.channel_capacity must be positive"));
    }

    if config.enrichment.request_timeout_secs == 0 {
        return Err(invalid("enrichment.request_timeout_secs must be positive"));
    }
    if !config.enrichment.default_coordinates.is_valid() {
        return Err(invalid(format!(
            "enrichment.default_coordinates out of range: {}",
            config.enrichment.default_coordinates
        )));
    }

    for (name, command) in config.engines.named() {
        validate_engine(name, command)?;
    }

    let video = &config.video;
    if video.fps == 0 || video.fps > 120 {
        return Err(invalid(format!("video.fps must be 1..=120, got {}", video.fps)));
    }
    // libx264 with yuv420p needs even dimensions.
    if video.width == 0 || video.height == 0 || video.width % 2 != 0 || video.height % 2 != 0 {
        return Err(invalid(format!(
            "video dimensions must be positive and even, got {}x{}",
            video.width, video.height
        )));
    }
    if !(video.seconds_per_hole.is_finite() && video.seconds_per_hole > 0.0) {
        return Err(invalid("video.seconds_per_hole must be positive"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 || retry.max_attempts > MAX_RETRY_ATTEMPTS {
        return Err(invalid(format!(
            "retry.max_attempts must be 1..={}, got {}",
            MAX_RETRY_ATTEMPTS, retry.max_attempts
        )));
    }
    if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
        return Err(invalid("retry.multiplier must be at least 1.0"));
    }

    if config.errors.retention_days == 0 {
        return Err(invalid("errors.retention_days must be positive"));
    }
    let sweep = config.errors.sweep_interval_hours;
    if sweep == 0 || sweep > MAX_SWEEP_INTERVAL_HOURS {
        return Err(invalid(format!(
            "errors.sweep_interval_hours must be 1..={}, got {}",
            MAX_SWEEP_INTERVAL_HOURS, sweep
        )));
    }

    Ok(())
}

fn validate_engine(name: &str, command: &EngineCommand) -> Result<(), ConfigError> {
    let reason = if command.program.trim().is_empty() {
        Some("program is empty")
    } else if command.timeout_secs == 0 {
        Some("timeout_secs must be positive")
    } else if command.max_output_bytes == 0 {
        Some("max_output_bytes must be positive")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidEngine {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
