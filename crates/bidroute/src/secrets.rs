//! Mailbox credential resolution.
//!
//! A credential may be given in three places, checked in this order:
//!
//! 1. **Inline**: `passwordInsecure` in the config file (local testing only)
//! 2. **File**: `passwordFile`, e.g. a mounted container secret
//! 3. **Environment**: `passwordEnvVar`, the usual production setup

use secrecy::SecretString;
use std::fs;

/// Error type for credential resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No credential source configured (need an inline value, a file, or an env var)")]
    NoSourceProvided,

    #[error("Failed to read credential from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Result type for credential resolution.
pub type Result<T> = std::result::Result<T, SecretError>;

/// The configured places a single credential may come from.
/// Empty strings count as "not configured".
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretSource<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> SecretSource<'a> {
    fn non_empty(value: Option<&'a str>) -> Option<&'a str> {
        value.filter(|s| !s.is_empty())
    }

    /// True when at least one source is set.
    pub fn is_configured(&self) -> bool {
        Self::non_empty(self.inline).is_some()
            || Self::non_empty(self.file).is_some()
            || Self::non_empty(self.env_var).is_some()
    }

    /// Resolves the credential from the highest-priority configured source.
    ///
    /// A configured source that fails (missing file, unset variable) is an
    /// error; lower-priority sources are not consulted.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = Self::non_empty(self.inline) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = Self::non_empty(self.file) {
            let expanded = expand_home(path);
            return fs::read_to_string(&expanded)
                .map(|content| SecretString::from(content.trim().to_string()))
                .map_err(|source| SecretError::FileReadError {
                    path: expanded,
                    source,
                });
        }

        if let Some(name) = Self::non_empty(self.env_var) {
            return match std::env::var(name) {
                // Env values often carry a trailing newline from `echo`.
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }
}

/// Expands a leading `~` to the user's home directory.
///
/// Checks HOME then USERPROFILE. `~user/path` is not supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}
