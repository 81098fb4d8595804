use std::{
    collections::HashMap,
    io::{Cursor, Read},
};

use anyhow::Result;
use flate2::{read::ZlibEncoder, Compression};
use gix_object::Kind;

use super::traits::ObjectStore;
use crate::{
    error::Error,
    pack::{format_tree, GitObject, ObjectId, TreeEntry},
};

/// In-memory object store, mostly for building fixture graphs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: HashMap<ObjectId, GitObject>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, obj: GitObject) -> ObjectId {
        let id = obj.id;
        self.objects.insert(id, obj);
        id
    }

    pub fn remove(&mut self, id: &ObjectId) -> Option<GitObject> {
        self.objects.remove(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn add_blob(&mut self, data: &[u8]) -> ObjectId {
        self.insert(GitObject::from_raw(Kind::Blob, data.to_vec()))
    }

    /// Add a tree; entries are `(name, id)` and sorted the way git sorts them.
    /// Whether an entry is a subtree is looked up in the store.
    pub fn add_tree(&mut self, entries: &[(&str, ObjectId)]) -> ObjectId {
        let mut entries: Vec<TreeEntry> = entries
            .iter()
            .map(|(name, id)| {
                let is_tree = matches!(self.objects.get(id), Some(o) if o.kind == Kind::Tree);
                TreeEntry {
                    mode: if is_tree { "40000" } else { "100644" }.to_string(),
                    name: name.as_bytes().to_vec(),
                    id: *id,
                }
            })
            .collect();
        // Subtrees sort as if their name ended in '/'
        entries.sort_by_key(|e| {
            let mut key = e.name.clone();
            if e.is_tree() {
                key.push(b'/');
            }
            key
        });
        self.insert(GitObject::from_raw(Kind::Tree, format_tree(&entries)))
    }

    pub fn add_commit(&mut self, tree: ObjectId, parents: &[ObjectId], message: &str) -> ObjectId {
        let mut data = format!("tree {}\n", tree);
        for parent in parents {
            data.push_str(&format!("parent {}\n", parent));
        }
        data.push_str("author Test User <test@example.com> 1700000000 +0000\n");
        data.push_str("committer Test User <test@example.com> 1700000000 +0000\n");
        data.push_str(&format!("\n{}\n", message));
        self.insert(GitObject::from_raw(Kind::Commit, data.into_bytes()))
    }

    pub fn add_tag(&mut self, target: ObjectId, target_kind: Kind, name: &str) -> ObjectId {
        let data = format!(
            "object {}\ntype {}\ntag {}\ntagger Test User <test@example.com> 1700000000 +0000\n\n{}\n",
            target,
            crate::pack::kind_str(target_kind),
            name,
            name
        );
        self.insert(GitObject::from_raw(Kind::Tag, data.into_bytes()))
    }

    fn get(&self, id: &ObjectId) -> Result<&GitObject> {
        self.objects
            .get(id)
            .ok_or_else(|| Error::ObjectNotFound(*id).into())
    }
}

impl ObjectStore for MemoryStore {
    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.contains_key(id))
    }

    fn header(&self, id: &ObjectId) -> Result<(Kind, u64)> {
        let obj = self.get(id)?;
        Ok((obj.kind, obj.data.len() as u64))
    }

    fn read(&self, id: &ObjectId) -> Result<GitObject> {
        Ok(self.get(id)?.clone())
    }

    fn compressed_payload<'a>(&'a self, id: &ObjectId) -> Result<Box<dyn Read + 'a>> {
        let obj = self.get(id)?;
        Ok(Box::new(ZlibEncoder::new(
            Cursor::new(obj.data.as_slice()),
            Compression::default(),
        )))
    }
}
