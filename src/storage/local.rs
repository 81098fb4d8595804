use std::{io::Read, path::Path};

use anyhow::Result;
use gix_object::Kind;

use super::{git_cli::GitCliStore, loose::LooseObjectStore, traits::ObjectStore};
use crate::pack::{GitObject, ObjectId};

/// A repository's object database: loose objects first, then whatever
/// `git cat-file` can find (existing packs).
pub struct LocalObjectStore {
    loose: LooseObjectStore,
    packed: GitCliStore,
}

impl LocalObjectStore {
    pub fn new(git_dir: &Path) -> Self {
        LocalObjectStore {
            loose: LooseObjectStore::new(git_dir.join("objects")),
            packed: GitCliStore::new(git_dir),
        }
    }

    fn backend(&self, id: &ObjectId) -> Result<&dyn ObjectStore> {
        if self.loose.contains(id)? {
            Ok(&self.loose)
        } else {
            tracing::debug!("{} is not loose, asking git", id);
            Ok(&self.packed)
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.loose.contains(id)? || self.packed.contains(id)?)
    }

    fn header(&self, id: &ObjectId) -> Result<(Kind, u64)> {
        self.backend(id)?.header(id)
    }

    fn read(&self, id: &ObjectId) -> Result<GitObject> {
        self.backend(id)?.read(id)
    }

    fn compressed_payload<'a>(&'a self, id: &ObjectId) -> Result<Box<dyn Read + 'a>> {
        self.backend(id)?.compressed_payload(id)
    }
}
