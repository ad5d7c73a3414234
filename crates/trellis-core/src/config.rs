use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrellisConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Node every new session starts at.
    #[serde(default = "default_entry_node")]
    pub entry_node: String,
    /// Global fallback for tool errors and denials without a node-level handler.
    #[serde(default)]
    pub default_error_node: Option<String>,
    /// History length past which the engine logs a growth warning.
    #[serde(default = "default_history_warn_threshold")]
    pub history_warn_threshold: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            entry_node: default_entry_node(),
            default_error_node: None,
            history_warn_threshold: default_history_warn_threshold(),
        }
    }
}

fn default_entry_node() -> String {
    "start".to_string()
}

fn default_history_warn_threshold() -> usize {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_entry_node")]
    pub default_start_node: String,
    /// TTL handed to the distributed locker, if one is configured.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            default_start_node: default_entry_node(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_lock_ttl_secs() -> u64 {
    30
}

/// Which persistence backend holds session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Directory for `file`, database file for `sqlite`; `~/` is expanded.
    #[serde(default)]
    pub path: Option<String>,
}

impl StoreConfig {
    /// Resolve the configured path, falling back to `.trellis/sessions` (file)
    /// or `.trellis/sessions.db` (sqlite).
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => expand_home(p),
            None => match self.backend {
                StoreBackend::Sqlite => PathBuf::from(".trellis").join("sessions.db"),
                _ => PathBuf::from(".trellis").join("sessions"),
            },
        }
    }
}

impl TrellisConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TrellisError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| TrellisError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay verbatim
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = TrellisConfig::from_toml("").unwrap();
        assert_eq!(config.engine.entry_node, "start");
        assert_eq!(config.engine.default_error_node, None);
        assert_eq!(config.session.lock_ttl_secs, 30);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_unset_env_var_is_kept() {
        let expanded = expand_env_vars("path = \"${TRELLIS_SURELY_UNSET_VAR}/x\"");
        assert_eq!(expanded, "path = \"${TRELLIS_SURELY_UNSET_VAR}/x\"");
    }

    #[test]
    fn test_store_path_fallbacks() {
        let sqlite = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: None,
        };
        assert!(sqlite.resolved_path().ends_with("sessions.db"));
        let file = StoreConfig {
            backend: StoreBackend::File,
            path: Some("/var/lib/trellis".into()),
        };
        assert_eq!(file.resolved_path(), PathBuf::from("/var/lib/trellis"));
    }

    #[test]
    fn test_invalid_backend_is_config_error() {
        let err = TrellisConfig::from_toml("[store]\nbackend = \"redis\"").unwrap_err();
        assert!(matches!(err, TrellisError::Config(_)));
    }
}
