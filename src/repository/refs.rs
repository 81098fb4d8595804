//! Ref lookup in a git directory: loose ref files, symbolic refs and
//! `packed-refs`.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{error::Error, pack::ObjectId};

/// Limit on `ref: ` indirections
const MAX_SYMREF_DEPTH: usize = 5;

/// Prefixes tried, in order, for a short ref name
const SHORT_NAME_PREFIXES: &[&str] = &["refs/heads/", "refs/tags/", "refs/remotes/"];

/// Refs under these prefixes belong to one worktree, like `HEAD`
const PER_WORKTREE_PREFIXES: &[&str] = &["refs/bisect/", "refs/worktree/", "refs/rewritten/"];

/// Where refs live. In a linked worktree `HEAD` and the other per-worktree
/// refs are in the worktree's git dir, while shared refs and `packed-refs`
/// are in the common dir. Otherwise both are the same directory.
#[derive(Debug, Clone, Copy)]
pub struct RefDirs<'a> {
    pub git_dir: &'a Path,
    pub common_dir: &'a Path,
}

impl RefDirs<'_> {
    fn ref_path(&self, name: &str) -> PathBuf {
        let shared = name.starts_with("refs/")
            && !PER_WORKTREE_PREFIXES.iter().any(|p| name.starts_with(p));
        if shared {
            self.common_dir.join(name)
        } else {
            self.git_dir.join(name)
        }
    }
}

/// Resolve a revision expression to an object id
pub fn resolve(dirs: RefDirs<'_>, expr: &str) -> Result<ObjectId> {
    if let Some(id) = ObjectId::from_hex(expr) {
        return Ok(id);
    }
    if !is_safe_ref_name(expr) {
        return Err(Error::UnknownRevision(expr.to_string()).into());
    }

    let mut candidates = Vec::new();
    if expr == "HEAD" || expr.starts_with("refs/") {
        candidates.push(expr.to_string());
    } else {
        candidates.extend(SHORT_NAME_PREFIXES.iter().map(|p| format!("{}{}", p, expr)));
    }

    for name in &candidates {
        if let Some(id) = read_ref(dirs, name, 0)? {
            tracing::debug!("Resolved {} via {} to {}", expr, name, id);
            return Ok(id);
        }
    }
    Err(Error::UnknownRevision(expr.to_string()).into())
}

/// Value of ref `name`, or `None` when it does not exist (including an
/// unborn branch behind a symbolic ref)
pub fn read_ref(dirs: RefDirs<'_>, name: &str, depth: usize) -> Result<Option<ObjectId>> {
    if depth > MAX_SYMREF_DEPTH {
        return Err(Error::UnknownRevision(format!("{}: symbolic ref loop", name)).into());
    }

    let path = dirs.ref_path(name);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return packed_ref(dirs.common_dir, name),
        // refs/heads/foo where refs/heads/foo/ is a directory
        Err(_) if path.is_dir() => return packed_ref(dirs.common_dir, name),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read ref file: {:?}", path));
        }
    };

    let content = content.trim();
    if let Some(target) = content.strip_prefix("ref:") {
        let target = target.trim();
        if !is_safe_ref_name(target) {
            return Err(Error::UnknownRevision(format!("{} -> {}", name, target)).into());
        }
        return read_ref(dirs, target, depth + 1);
    }

    ObjectId::from_hex(content)
        .map(Some)
        .ok_or_else(|| Error::UnknownRevision(format!("{}: malformed ref {:?}", name, content)).into())
}

fn packed_ref(common_dir: &Path, name: &str) -> Result<Option<ObjectId>> {
    let path = common_dir.join("packed-refs");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
    };

    for line in content.lines() {
        // '#' header and '^' peeled lines
        if line.starts_with('#') || line.starts_with('^') {
            continue;
        }
        if let Some((hex, ref_name)) = line.split_once(' ') {
            if ref_name == name {
                return ObjectId::from_hex(hex).map(Some).ok_or_else(|| {
                    Error::UnknownRevision(format!("{}: malformed packed ref", name)).into()
                });
            }
        }
    }
    Ok(None)
}

fn is_safe_ref_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
}

#[cfg(test)]
mod tests {
    use tempfile::{tempdir, TempDir};

    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const C: &str = "cccccccccccccccccccccccccccccccccccccccc";

    fn git_dir() -> TempDir {
        let dir = tempdir().unwrap();
        let write = |name: &str, content: &str| {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        };
        write("HEAD", "ref: refs/heads/main\n");
        write("refs/heads/main", &format!("{}\n", A));
        write("refs/tags/v1", &format!("{}\n", B));
        write(
            "packed-refs",
            &format!(
                "# pack-refs with: peeled fully-peeled sorted\n{} refs/heads/old\n^{}\n",
                C, A
            ),
        );
        dir
    }

    fn dirs(path: &Path) -> RefDirs<'_> {
        RefDirs {
            git_dir: path,
            common_dir: path,
        }
    }

    fn id(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    #[test]
    fn test_resolve_names() {
        let dir = git_dir();
        assert_eq!(resolve(dirs(dir.path()), "HEAD").unwrap(), id(A));
        assert_eq!(resolve(dirs(dir.path()), "main").unwrap(), id(A));
        assert_eq!(resolve(dirs(dir.path()), "refs/heads/main").unwrap(), id(A));
        assert_eq!(resolve(dirs(dir.path()), "v1").unwrap(), id(B));
        assert_eq!(resolve(dirs(dir.path()), C).unwrap(), id(C));
    }

    #[test]
    fn test_packed_refs_fallback() {
        let dir = git_dir();
        assert_eq!(resolve(dirs(dir.path()), "old").unwrap(), id(C));
    }

    #[test]
    fn test_unknown_revision() {
        let dir = git_dir();
        for expr in ["nope", "refs/heads/nope", "../config", ""] {
            let err = resolve(dirs(dir.path()), expr).unwrap_err();
            assert!(
                matches!(crate::error::find(&err), Some(Error::UnknownRevision(_))),
                "{:?}",
                expr
            );
        }
    }

    #[test]
    fn test_unborn_head() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        assert_eq!(read_ref(dirs(dir.path()), "HEAD", 0).unwrap(), None);
        assert!(resolve(dirs(dir.path()), "HEAD").is_err());
    }

    #[test]
    fn test_symref_loop() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("HEAD"), "ref: HEAD\n").unwrap();
        let err = resolve(dirs(dir.path()), "HEAD").unwrap_err();
        assert!(err.to_string().contains("loop"));
    }

    #[test]
    fn test_worktree_and_common_refs() {
        let common = git_dir();
        let worktree = tempdir().unwrap();
        let write = |path: PathBuf, content: String| {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        };
        write(worktree.path().join("HEAD"), "ref: refs/heads/old\n".into());
        write(worktree.path().join("refs/bisect/bad"), format!("{}\n", B));
        // Shadowed: shared refs are never read from the worktree dir
        write(worktree.path().join("refs/heads/main"), format!("{}\n", C));

        let dirs = RefDirs {
            git_dir: worktree.path(),
            common_dir: common.path(),
        };
        assert_eq!(resolve(dirs, "HEAD").unwrap(), id(C));
        assert_eq!(resolve(dirs, "main").unwrap(), id(A));
        assert_eq!(resolve(dirs, "refs/bisect/bad").unwrap(), id(B));
        assert!(resolve(dirs, "refs/tags/nope").is_err());
    }
}
