use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    let base_path = server.base_path.trim();
    if !base_path.is_empty() && !base_path.starts_with('/') {
        return Err(validation_err("server.base_path must start with '/' when set"));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    let parsed = url::Url::parse(upstream.url.trim())
        .map_err(|err| validation_err(format!("upstream.url is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err("upstream.url must use http:// or https://"));
    }

    for (name, value) in &upstream.headers {
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(validation_err(format!(
                "upstream.headers: invalid header name '{name}'"
            )));
        }
        if http::HeaderValue::from_str(value).is_err() {
            return Err(validation_err(format!(
                "upstream.headers: invalid value for header '{name}'"
            )));
        }
    }

    if upstream.repo_root.trim().is_empty() {
        return Err(validation_err("upstream.repo_root cannot be empty"));
    }
    if upstream.trigger.trim().is_empty() {
        return Err(validation_err("upstream.trigger cannot be empty"));
    }
    if upstream.chat_id_prefix.trim().is_empty() {
        return Err(validation_err("upstream.chat_id_prefix cannot be empty"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
