use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::Error;

const ENV_PREFIX: &str = "GIT_HTTP_PUSH_";

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Settings for the push transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushConfig {
    /// Overall limit for one HTTP request, in seconds
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
    /// Where the pack is staged before upload; system temp dir when unset
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            timeout_secs: defaults::timeout_secs(),
            connect_timeout_secs: defaults::connect_timeout_secs(),
            user_agent: defaults::user_agent(),
            temp_dir: None,
            username: None,
            password: None,
        }
    }
}

impl PushConfig {
    /// Load the config file (defaults when absent), then apply environment
    /// overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading git-http-push config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: PushConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{:?}: {}", path, e)))?;

        if let Some(ref temp_dir) = config.temp_dir {
            config.temp_dir = Some(expand_tilde(temp_dir));
        }

        Ok(config)
    }

    /// Apply `GIT_HTTP_PUSH_*` overrides looked up through `var`
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| var(&format!("{}{}", ENV_PREFIX, name));

        if let Some(secs) = lookup("TIMEOUT") {
            self.timeout_secs = parse_secs("TIMEOUT", &secs)?;
        }
        if let Some(secs) = lookup("CONNECT_TIMEOUT") {
            self.connect_timeout_secs = parse_secs("CONNECT_TIMEOUT", &secs)?;
        }
        if let Some(agent) = lookup("USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(path) = lookup("TEMP_DIR") {
            self.temp_dir = Some(expand_tilde(&PathBuf::from(path)));
        }
        if let Some(username) = lookup("USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = lookup("PASSWORD") {
            self.password = Some(password);
        }
        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-http-push/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Directory for the staged pack
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    let secs: u64 = value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "{}{} must be a number of seconds, got {:?}",
            ENV_PREFIX, name, value
        ))
    })?;
    if secs == 0 {
        return Err(Error::Config(format!("{}{} must be positive", ENV_PREFIX, name)).into());
    }
    Ok(secs)
}

mod defaults {
    pub(crate) fn timeout_secs() -> u64 {
        300
    }

    pub(crate) fn connect_timeout_secs() -> u64 {
        30
    }

    pub(crate) fn user_agent() -> String {
        format!("git/2.0 (git-http-push/{})", env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_serialized_config_loads() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let config = PushConfig {
            timeout_secs: 42,
            username: Some("alice".into()),
            ..PushConfig::default()
        };
        std::fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = PushConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "connect_timeout_secs: 5\n").unwrap();

        let loaded = PushConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.connect_timeout(), Duration::from_secs(5));
        assert_eq!(loaded.timeout(), Duration::from_secs(300));
        assert!(loaded.user_agent.starts_with("git/2.0 (git-http-push/"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "timeout_secs: 5\nretries: 3\n").unwrap();

        let err = PushConfig::load_from_file(&config_path).unwrap_err();
        assert!(matches!(crate::error::find(&err), Some(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env = vars(&[
            ("GIT_HTTP_PUSH_TIMEOUT", "10"),
            ("GIT_HTTP_PUSH_USER_AGENT", "custom/1.0"),
            ("GIT_HTTP_PUSH_USERNAME", "bob"),
            ("GIT_HTTP_PUSH_PASSWORD", "secret"),
        ]);
        let mut config = PushConfig::default();
        config.apply_overrides(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.user_agent, "custom/1.0");
        assert_eq!(config.username.as_deref(), Some("bob"));
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_bad_timeout_override() {
        for value in ["soon", "0"] {
            let env = vars(&[("GIT_HTTP_PUSH_TIMEOUT", value)]);
            let mut config = PushConfig::default();
            let err = config.apply_overrides(|k| env.get(k).cloned()).unwrap_err();
            assert!(matches!(crate::error::find(&err), Some(Error::Config(_))));
        }
    }

    #[test]
    fn test_tilde_expansion() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "temp_dir: ~/scratch\n").unwrap();

        let loaded = PushConfig::load_from_file(&config_path).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(loaded.temp_dir, Some(home.join("scratch")));
            assert_eq!(loaded.temp_dir(), home.join("scratch"));
        }

        let env = vars(&[("GIT_HTTP_PUSH_TEMP_DIR", "~/other")]);
        let mut config = PushConfig::default();
        config.apply_overrides(|k| env.get(k).cloned()).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.temp_dir, Some(home.join("other")));
        }
    }
}
