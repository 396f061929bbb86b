//! Judge configuration.
//!
//! Values come from `JUDGE_*` environment variables on top of built-in
//! defaults; CLI flags may override individual fields afterwards.

use std::time::Duration;

use thiserror::Error;

use crate::execution::{parse_cpu, parse_memory, ResourceLimits, SandboxOptions};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration of the judging engine.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    // Storage
    /// SQLite database URL or path.
    pub database_url: String,

    // Limits
    /// Memory ceiling for problems that set none (e.g. "128m").
    pub memory_limit: String,
    /// CPU share per sandbox, in logical cores (e.g. "1.0").
    pub cpu_limit: String,
    /// Wall-clock limit for problems that set none.
    pub time_limit: Duration,

    // Sandbox
    /// Process-count ceiling inside a sandbox.
    pub pids_limit: i64,
    /// stderr and reported output are truncated to this many bytes.
    pub max_output_bytes: usize,
    /// Repository name of ephemeral run images.
    pub image_prefix: String,

    // Summary
    /// Optimistic write attempts before summary aggregation gives up.
    pub summary_max_retries: u32,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://elitecode.db".to_string(),
            memory_limit: "128m".to_string(),
            cpu_limit: "1.0".to_string(),
            time_limit: Duration::from_millis(2000),
            pids_limit: 64,
            max_output_bytes: 64 * 1024,
            image_prefix: "elitecode-run".to_string(),
            summary_max_retries: 5,
        }
    }
}

impl JudgeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JUDGE_DATABASE_URL`: SQLite URL (default: sqlite://elitecode.db)
    /// - `JUDGE_MEMORY_LIMIT`: default memory ceiling (default: 128m)
    /// - `JUDGE_CPU_LIMIT`: CPU share per sandbox (default: 1.0)
    /// - `JUDGE_TIME_LIMIT_MS`: default wall-clock limit (default: 2000)
    /// - `JUDGE_PIDS_LIMIT`: process ceiling (default: 64)
    /// - `JUDGE_MAX_OUTPUT_BYTES`: output capture limit (default: 65536)
    /// - `JUDGE_SUMMARY_MAX_RETRIES`: summary write attempts (default: 5)
    /// - `JUDGE_IMAGE_PREFIX`: run image repository (default: elitecode-run)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`JudgeConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("JUDGE_DATABASE_URL") {
            config.database_url = val;
        }

        if let Some(val) = lookup("JUDGE_MEMORY_LIMIT") {
            config.memory_limit = val;
        }

        if let Some(val) = lookup("JUDGE_CPU_LIMIT") {
            config.cpu_limit = val;
        }

        if let Some(val) = lookup("JUDGE_TIME_LIMIT_MS") {
            let ms: u64 = parse_env_value(&val, "JUDGE_TIME_LIMIT_MS")?;
            config.time_limit = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("JUDGE_PIDS_LIMIT") {
            config.pids_limit = parse_env_value(&val, "JUDGE_PIDS_LIMIT")?;
        }

        if let Some(val) = lookup("JUDGE_MAX_OUTPUT_BYTES") {
            config.max_output_bytes = parse_env_value(&val, "JUDGE_MAX_OUTPUT_BYTES")?;
        }

        if let Some(val) = lookup("JUDGE_SUMMARY_MAX_RETRIES") {
            config.summary_max_retries = parse_env_value(&val, "JUDGE_SUMMARY_MAX_RETRIES")?;
        }

        if let Some(val) = lookup("JUDGE_IMAGE_PREFIX") {
            config.image_prefix = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        parse_memory(&self.memory_limit).map_err(|e| {
            ConfigError::ValidationFailed(format!("memory_limit: {}", e))
        })?;

        parse_cpu(&self.cpu_limit)
            .map_err(|e| ConfigError::ValidationFailed(format!("cpu_limit: {}", e)))?;

        if self.time_limit.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "time_limit must be greater than 0".to_string(),
            ));
        }

        if self.pids_limit <= 0 {
            return Err(ConfigError::ValidationFailed(
                "pids_limit must be greater than 0".to_string(),
            ));
        }

        if self.max_output_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_output_bytes must be greater than 0".to_string(),
            ));
        }

        if self.summary_max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "summary_max_retries must be greater than 0".to_string(),
            ));
        }

        // Docker repository names: lowercase alphanumerics and separators
        let valid_prefix = !self.image_prefix.is_empty()
            && self
                .image_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_./".contains(c));
        if !valid_prefix {
            return Err(ConfigError::ValidationFailed(format!(
                "image_prefix '{}' is not a valid image repository name",
                self.image_prefix
            )));
        }

        Ok(())
    }

    /// Default resource limits derived from this configuration.
    pub fn default_limits(&self) -> Result<ResourceLimits, ConfigError> {
        ResourceLimits::from_strings(&self.memory_limit, &self.cpu_limit, self.time_limit)
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))
    }

    /// Sandbox tunables derived from this configuration.
    pub fn sandbox_options(&self) -> SandboxOptions {
        SandboxOptions {
            image_prefix: self.image_prefix.clone(),
            pids_limit: self.pids_limit,
            max_output_bytes: self.max_output_bytes,
        }
    }

    /// Builder method to set database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the default memory limit.
    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = limit.into();
        self
    }

    /// Builder method to set the CPU limit.
    pub fn with_cpu_limit(mut self, limit: impl Into<String>) -> Self {
        self.cpu_limit = limit.into();
        self
    }

    /// Builder method to set the default time limit.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Builder method to set the image prefix.
    pub fn with_image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = prefix.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
