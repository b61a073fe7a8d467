//! Gitignore-style patterns marking files that are shown last.
//!
//! Patterns follow gitignore conventions rather than shell globs:
//!
//! - `/vendor/` is anchored at the repository root,
//! - `*.lock` matches at any depth,
//! - a trailing `/` matches everything below the directory,
//! - a leading `!` exempts paths matched by it.
//!
//! The first pattern that matches decides.

use crate::config::ConfigError;
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    deprioritize: bool,
    pattern: Pattern,
}

/// Compiled list of deprioritization patterns
#[derive(Debug, Clone, Default)]
pub struct Deprioritizer {
    rules: Vec<Rule>,
}

impl Deprioritizer {
    /// Compile patterns in order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for an empty or malformed
    /// pattern.
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let rules = patterns
            .iter()
            .map(|raw| {
                let (deprioritize, body) = match raw.strip_prefix('!') {
                    Some(rest) => (false, rest),
                    None => (true, raw.as_str()),
                };
                if body.is_empty() || body == "/" {
                    return Err(ConfigError::InvalidPattern {
                        pattern: raw.clone(),
                        message: "pattern is empty".to_string(),
                    });
                }
                let pattern = Pattern::new(&to_shell_glob(body)).map_err(|e| {
                    ConfigError::InvalidPattern {
                        pattern: raw.clone(),
                        message: e.to_string(),
                    }
                })?;
                Ok(Rule {
                    deprioritize,
                    pattern,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Whether `path` (relative to the repository root) is deprioritized
    pub fn matches(&self, path: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches_with(path, MATCH_OPTIONS))
            .is_some_and(|rule| rule.deprioritize)
    }
}

/// Translate a gitignore-style pattern into a path glob
fn to_shell_glob(pattern: &str) -> String {
    let mut glob = match pattern.strip_prefix('/') {
        Some(anchored) => anchored.to_string(),
        None => format!("**/{pattern}"),
    };
    if glob.ends_with('/') {
        glob.push_str("**");
    }
    glob
}
