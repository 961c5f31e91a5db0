use crate::error::{ClipError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DELIMITER: char = '#';

/// Characters that would collide with path separators or the range grammar.
const RESERVED_DELIMITERS: &[char] = &['/', '\0', '-', '+', '.'];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delimiter: char,
    pub cache_metadata: bool,
    pub attr_ttl_secs: u64,
    pub fs_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            cache_metadata: false,
            attr_ttl_secs: 1,
            fs_name: "clipfs".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    ClipError::Config(format!("{}: {e}", config_path.display()))
                })?;
            }
        }

        // Override with environment variables
        if let Ok(delim) = std::env::var("CLIPFS_DELIMITER") {
            config.delimiter = parse_delimiter(&delim)?;
        }
        if let Ok(cache) = std::env::var("CLIPFS_CACHE_METADATA") {
            if let Ok(c) = cache.parse() {
                config.cache_metadata = c;
            }
        }
        if let Ok(ttl) = std::env::var("CLIPFS_ATTR_TTL") {
            if let Ok(t) = ttl.parse() {
                config.attr_ttl_secs = t;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if RESERVED_DELIMITERS.contains(&self.delimiter) || self.delimiter.is_ascii_digit() {
            return Err(ClipError::Config(format!(
                "Delimiter '{}' is reserved; pick a character that cannot appear in a range",
                self.delimiter.escape_default()
            )));
        }

        if self.fs_name.is_empty() {
            return Err(ClipError::Config("fs_name must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }

    /// Freeze the settings the filesystem needs for its whole lifetime.
    pub fn mount_config(&self, root: &Path) -> MountConfig {
        MountConfig {
            root: root.to_path_buf(),
            delimiter: self.delimiter,
        }
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clipfs").join("config.toml"))
    }
}

/// Immutable mount-time configuration shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub root: PathBuf,
    pub delimiter: char,
}

impl MountConfig {
    pub fn new(root: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            root: root.into(),
            delimiter,
        }
    }
}

pub fn parse_delimiter(s: &str) -> Result<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ClipError::Config(format!(
            "Delimiter must be a single character, got '{}'",
            s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.delimiter, '#');
        assert!(!config.cache_metadata);
        assert_eq!(config.attr_ttl(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_reserved_delimiters() {
        for delim in ['/', '-', '.', '+', '0', '7', '\0'] {
            let config = Config {
                delimiter: delim,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "delimiter {:?} accepted", delim);
        }

        let config = Config {
            delimiter: '@',
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("@").unwrap(), '@');
        assert_eq!(parse_delimiter("§").unwrap(), '§');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("##").is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("cache_metadata = true").unwrap();
        assert!(config.cache_metadata);
        assert_eq!(config.delimiter, '#');
        assert_eq!(config.fs_name, "clipfs");
    }

    #[test]
    fn test_mount_config_is_frozen_copy() {
        let config = Config {
            delimiter: '@',
            ..Default::default()
        };
        let mount = config.mount_config(Path::new("/music"));
        assert_eq!(mount, MountConfig::new("/music", '@'));
    }
}
