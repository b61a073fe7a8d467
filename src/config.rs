//! User configuration, read from `<config dir>/diffpick/config.toml`.
//!
//! ```toml
//! [diff]
//! deprioritize = ["*.lock", "/vendor/"]
//!
//! [format]
//! tab_width = 4
//! ```

use crate::deprioritize::Deprioritizer;
use error_set::error_set;
use serde::Deserialize;
use std::path::{Path, PathBuf};

error_set! {
    /// Errors from loading configuration
    ConfigError := {
        #[display("Failed to read config {path}: {message}")]
        Unreadable { path: String, message: String },
        #[display("Invalid config {path}: {message}")]
        Invalid { path: String, message: String },
        #[display("Invalid deprioritize pattern '{pattern}': {message}")]
        InvalidPattern { pattern: String, message: String },
        #[display("tab_width must be between 1 and 16, got {value}")]
        InvalidTabWidth { value: u8 },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub format: FormatConfig,
}

/// `[diff]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiffConfig {
    /// Gitignore-style patterns of files to show last
    #[serde(default)]
    pub deprioritize: Vec<String>,
}

/// `[format]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FormatConfig {
    #[serde(default = "default_tab_width")]
    pub tab_width: u8,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            tab_width: default_tab_width(),
        }
    }
}

fn default_tab_width() -> u8 {
    4
}

impl Config {
    /// Location of the per-user config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("diffpick").join("config.toml"))
    }

    /// Load the config from `explicit`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Unreadable {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };

        let config = Self::from_toml(&text, &path)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse and validate config text; `path` is only used in errors.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Invalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        if !(1..=16).contains(&config.format.tab_width) {
            return Err(ConfigError::InvalidTabWidth {
                value: config.format.tab_width,
            });
        }
        // Surface bad patterns at load time
        config.deprioritizer()?;

        Ok(config)
    }

    pub fn deprioritizer(&self) -> Result<Deprioritizer, ConfigError> {
        Deprioritizer::new(&self.diff.deprioritize)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::from_toml(text, Path::new("config.toml"))
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.format.tab_width, 4);
        assert!(config.diff.deprioritize.is_empty());
    }

    #[test]
    fn full_file() {
        let config = parse(
            r#"
[diff]
deprioritize = ["*.lock", "/vendor/"]

[format]
tab_width = 8
"#,
        )
        .unwrap();
        assert_eq!(config.diff.deprioritize, vec!["*.lock", "/vendor/"]);
        assert_eq!(config.format.tab_width, 8);
        assert!(config.deprioritizer().unwrap().matches("Cargo.lock"));
    }

    #[test]
    fn invalid_toml() {
        let err = parse("[diff\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn wrong_type() {
        let err = parse("[diff]\ndeprioritize = \"*.lock\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn zero_tab_width() {
        let err = parse("[format]\ntab_width = 0\n").unwrap_err();
        assert_eq!(err.to_string(), "tab_width must be between 1 and 16, got 0");
    }

    #[test]
    fn bad_pattern_fails_at_load() {
        let err = parse("[diff]\ndeprioritize = [\"[\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }));
    }

    #[test]
    fn explicit_file_is_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[format]\ntab_width = 2\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().format.tab_width, 2);
    }
}
