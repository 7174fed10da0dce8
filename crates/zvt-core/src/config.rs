//! JSON configuration persistence.
//!
//! Client and simulator configuration structs live next to the code that
//! consumes them; this module only moves them between disk and memory.
//! Fields annotated with `#[serde(default = "...")]` fall back to their
//! default when absent, so a partial file (or `{}`) is a valid config.

use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The JSON content could not be parsed.
    #[error("failed to parse config JSON: {0}")]
    Parse(#[source] serde_json::Error),

    /// The config could not be serialized to JSON.
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Load a configuration value from a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(ConfigError::Parse)
}

/// Write a configuration value to a JSON file (pretty printed).
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(value).map_err(ConfigError::Serialize)?;
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(default = "default_port")]
        port: u16,
        name: String,
    }

    fn default_port() -> u16 {
        20007
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let sample = Sample {
            port: 1234,
            name: "terminal".to_string(),
        };

        save_json(&path, &sample).unwrap();
        let loaded: Sample = load_json(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_missing_field_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"name":"x"}"#).unwrap();

        let loaded: Sample = load_json(&path).unwrap();
        assert_eq!(loaded.port, 20007);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<Sample, _> = load_json(Path::new("/nonexistent/zvt.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();

        let result: Result<Sample, _> = load_json(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
