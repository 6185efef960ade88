pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Environment variable that overrides the config file path.
pub const CONFIG_PATH_ENV: &str = "TAGBRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
}

fn default_port() -> u16 {
    3002
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            base_path: String::new(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
        }
    }
}

/// The tag-streaming chat service requests are forwarded to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    /// Extra request headers, sent verbatim.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_repo_root")]
    pub repo_root: String,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default = "default_chat_id_prefix")]
    pub chat_id_prefix: String,
}

fn default_repo_root() -> String {
    "/root/workspace/repo".to_string()
}
fn default_trigger() -> String {
    "submit-message".to_string()
}
fn default_chat_id_prefix() -> String {
    "tagbridge-chat".to_string()
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Reminder placed ahead of the tool instructions in the first user turn.
    #[serde(default)]
    pub system_preamble: Option<String>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            system_preamble: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Config path from `TAGBRIDGE_CONFIG`, falling back to `config.yaml`.
#[must_use]
pub fn config_path_from_env() -> String {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
