//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::BobConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<BobConfig, ConfigError> {
    let config: BobConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config.client).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BobConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_missing_nodes() {
        let err = parse_config("[observability]\nlog_level = \"debug\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(err.to_string(), "Validation failed: no nodes configured");
    }

    #[test]
    fn test_parse_error() {
        let err = parse_config("[client\nnodes = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/bob.toml")).unwrap_err();
        assert!(err.to_string().starts_with("IO error"));
    }
}
