use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let mut unexpanded_vars: Vec<String> = env_var_pattern()
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export SLS_API_KEY=...)\n\
             2. Replace the variables in the config file with actual values",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    config.storage.dir = expand_tilde(&config.storage.dir);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if let Err(e) = config.server.listen.parse::<SocketAddr>() {
        errors.push(format!(
            "server.listen '{}' is not a socket address (expected host:port): {}",
            config.server.listen, e
        ));
    }

    if config.server.max_body_bytes == 0 {
        errors.push("server.max_body_bytes must be greater than 0".to_string());
    }

    validate_storage_dir(&config.storage.dir, &mut errors);

    if config.auth.api_key.trim().is_empty() {
        errors.push("auth.api_key must not be empty".to_string());
    }

    if config.retention.days == 0 {
        errors.push("retention.days must be at least 1".to_string());
    }

    if config.retention.check_interval.is_zero() {
        errors.push("retention.check_interval must be greater than 0".to_string());
    }

    if config.tail.queue_capacity == 0 {
        errors.push("tail.queue_capacity must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_storage_dir(dir: &Path, errors: &mut Vec<String>) {
    match std::fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            errors.push(format!("storage.dir '{}' is not a directory", dir.display()));
        }
        Ok(meta) if meta.permissions().readonly() => {
            errors.push(format!("storage.dir '{}' is not writable", dir.display()));
        }
        Ok(_) => {}
        Err(e) => {
            errors.push(format!("storage.dir '{}' is not usable: {}", dir.display(), e));
        }
    }
}
