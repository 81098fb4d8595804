use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result};

use super::ConfigReader;
use crate::error::Error;

/// Repository config read through `git config --file <git-dir>/config`
pub struct GitConfig {
    path: PathBuf,
}

impl GitConfig {
    pub fn new(git_dir: &Path) -> Self {
        GitConfig {
            path: git_dir.join("config"),
        }
    }
}

impl ConfigReader for GitConfig {
    fn get_config(&self, key: &str) -> Result<Option<String>> {
        let output = Command::new("git")
            .arg("config")
            .arg("--file")
            .arg(&self.path)
            .arg("--get")
            .arg(key)
            .stdin(Stdio::null())
            .output()
            .context("Failed to execute git config")?;

        match output.status.code() {
            Some(0) => {
                let value = String::from_utf8(output.stdout)
                    .map_err(|_| Error::Config(format!("{} is not valid UTF-8", key)))?;
                Ok(Some(value.trim_end_matches('\n').to_string()))
            }
            // Key not set
            Some(1) => Ok(None),
            _ => Err(Error::Config(format!(
                "git config --get {} failed: {}",
                key,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_get_config() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config"),
            "[branch \"main\"]\n\tremote = origin\n\tmerge = refs/heads/main\n\
             [remote \"origin\"]\n\turl = https://example.com/repo.git\n",
        )
        .unwrap();

        let config = GitConfig::new(dir.path());
        assert_eq!(
            config.get_config("branch.main.remote").unwrap().as_deref(),
            Some("origin")
        );
        assert_eq!(
            config.get_config("remote.origin.url").unwrap().as_deref(),
            Some("https://example.com/repo.git")
        );
        assert_eq!(config.get_config("branch.dev.remote").unwrap(), None);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        let config = GitConfig::new(&dir.path().join("nope"));
        assert!(config.get_config("branch.main.remote").is_err());
    }
}
