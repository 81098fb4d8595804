//! Handle on a local git directory
//!
//! The push path reads three things from the local repository: config
//! values, ref values and objects. The first two sit behind small traits so
//! the orchestrator can be driven by test doubles.

mod git_config;
mod refs;

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
pub use git_config::GitConfig;
use refs::RefDirs;

use crate::{error::Error, pack::ObjectId, storage::LocalObjectStore};

/// Read access to repository configuration (`section.subsection.key`)
pub trait ConfigReader {
    /// Value for `key`, or `None` when it is not set
    fn get_config(&self, key: &str) -> Result<Option<String>>;
}

impl ConfigReader for HashMap<String, String> {
    fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key).cloned())
    }
}

/// Turns a revision expression (branch name, ref, hex id) into an id
pub trait RevisionResolver {
    fn resolve_to_id(&self, expr: &str) -> Result<ObjectId>;
}

/// A git directory. In a linked worktree `git_dir` is the per-worktree
/// directory (`<main>/.git/worktrees/<name>`, holding `HEAD`) and
/// `common_dir` is the main repository's git directory, which holds
/// objects, shared refs and config. Otherwise the two are the same.
pub struct Repository {
    git_dir: PathBuf,
    common_dir: PathBuf,
}

impl Repository {
    /// Open a working tree (containing `.git`), a linked worktree or a bare
    /// git directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let dot_git = path.join(".git");

        let git_dir = if dot_git.is_dir() {
            dot_git
        } else if dot_git.is_file() {
            // Linked worktrees and submodules: "gitdir: <path>"
            let content = fs::read_to_string(&dot_git)?;
            let target = content
                .trim()
                .strip_prefix("gitdir:")
                .ok_or_else(|| Error::Config(format!("malformed .git file in {:?}", path)))?
                .trim();
            path.join(target)
        } else {
            path.to_path_buf()
        };

        let commondir_file = git_dir.join("commondir");
        let common_dir = match fs::read_to_string(&commondir_file) {
            // Relative to the worktree's git dir; join keeps an absolute path
            Ok(content) => git_dir.join(content.trim()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => git_dir.clone(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", commondir_file));
            }
        };

        if !git_dir.join("HEAD").is_file() || !common_dir.join("objects").is_dir() {
            return Err(Error::Config(format!("not a git repository: {:?}", path)).into());
        }

        if common_dir != git_dir {
            tracing::debug!("Opened worktree {:?} of {:?}", git_dir, common_dir);
        } else {
            tracing::debug!("Opened repository at {:?}", git_dir);
        }
        Ok(Repository {
            git_dir,
            common_dir,
        })
    }

    pub fn config(&self) -> GitConfig {
        GitConfig::new(&self.common_dir)
    }

    pub fn object_store(&self) -> LocalObjectStore {
        LocalObjectStore::new(&self.common_dir)
    }
}

impl RevisionResolver for Repository {
    fn resolve_to_id(&self, expr: &str) -> Result<ObjectId> {
        let dirs = RefDirs {
            git_dir: &self.git_dir,
            common_dir: &self.common_dir,
        };
        refs::resolve(dirs, expr)
    }
}
