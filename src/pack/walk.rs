//! Reachability walk: which objects does the remote not have yet

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use gix_object::Kind;

use super::objects::{kind_str, parse_commit, parse_tag, parse_tree, GitObject, ObjectId};
use crate::{error::Error, storage::ObjectStore};

/// One object to be packed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub kind: Kind,
    pub size: u64,
}

/// Lazy walk over everything reachable from `want` that is not reachable
/// from any of the `haves`.
///
/// Commits come first (breadth-first from `want`, parents in header order),
/// then each new commit's tree in depth-first pre-order. The order only
/// depends on the object graph, so it is stable for a fixed repository.
pub struct ObjectWalk<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    /// Everything reachable from the haves
    excluded: HashSet<ObjectId>,
    /// Everything already queued for emission
    seen: HashSet<ObjectId>,
    commits: VecDeque<ObjectId>,
    /// Root trees (and tag targets) of emitted commits, in emission order
    roots: VecDeque<(ObjectId, Kind, ObjectId)>,
    /// Depth-first work list: (id, kind hint, referenced by)
    stack: Vec<(ObjectId, Kind, ObjectId)>,
    failed: bool,
}

impl<'a, S: ObjectStore + ?Sized> ObjectWalk<'a, S> {
    pub fn new(store: &'a S, want: ObjectId, haves: &[ObjectId]) -> Result<Self> {
        let excluded = reachable_from(store, haves)?;
        tracing::debug!(
            "{} objects reachable from {} have(s)",
            excluded.len(),
            haves.len()
        );

        let mut walk = ObjectWalk {
            store,
            excluded,
            seen: HashSet::new(),
            commits: VecDeque::new(),
            roots: VecDeque::new(),
            stack: Vec::new(),
            failed: false,
        };

        if !walk.excluded.contains(&want) {
            let (kind, _) = store.header(&want).map_err(|e| missing(e, want, None))?;
            walk.seen.insert(want);
            match kind {
                Kind::Commit => walk.commits.push_back(want),
                _ => walk.roots.push_back((want, kind, want)),
            }
        }
        Ok(walk)
    }

    fn read(&self, id: ObjectId, referenced_by: Option<ObjectId>) -> Result<GitObject> {
        self.store
            .read(&id)
            .map_err(|e| missing(e, id, referenced_by))
    }

    /// Queue `id` unless it is excluded or already queued
    fn enqueue(&mut self, id: ObjectId) -> bool {
        !self.excluded.contains(&id) && self.seen.insert(id)
    }

    fn next_commit(&mut self, id: ObjectId) -> Result<ObjectEntry> {
        let obj = self.read(id, None)?;
        if obj.kind != Kind::Commit {
            return Err(Error::InvalidObject {
                id,
                reason: format!("expected commit, found {}", kind_str(obj.kind)),
            }
            .into());
        }

        let links = parse_commit(id, &obj.data)?;
        for parent in links.parents {
            if self.enqueue(parent) {
                self.commits.push_back(parent);
            }
        }
        if self.enqueue(links.tree) {
            self.roots.push_back((links.tree, Kind::Tree, id));
        }

        Ok(entry(&obj))
    }

    fn next_object(&mut self, id: ObjectId, hint: Kind, parent: ObjectId) -> Result<ObjectEntry> {
        if hint == Kind::Blob {
            // Blobs have no outgoing edges; only the header is needed
            let (kind, size) = self
                .store
                .header(&id)
                .map_err(|e| missing(e, id, Some(parent)))?;
            if kind == Kind::Blob {
                return Ok(ObjectEntry { id, kind, size });
            }
        }

        let obj = self.read(id, Some(parent))?;
        match obj.kind {
            Kind::Tree => {
                let entries = parse_tree(id, &obj.data)?;
                // Reversed so the first entry is popped first
                for child in entries.into_iter().rev() {
                    if child.is_submodule() {
                        continue;
                    }
                    let kind = if child.is_tree() { Kind::Tree } else { Kind::Blob };
                    if self.enqueue(child.id) {
                        self.stack.push((child.id, kind, id));
                    }
                }
            }
            Kind::Tag => {
                let (target, kind) = parse_tag(id, &obj.data)?;
                if self.enqueue(target) {
                    match kind {
                        Kind::Commit => self.commits.push_back(target),
                        _ => self.stack.push((target, kind, id)),
                    }
                }
            }
            Kind::Commit => {
                // A commit reached through a tag target listed as non-commit
                let links = parse_commit(id, &obj.data)?;
                for parent in links.parents {
                    if self.enqueue(parent) {
                        self.commits.push_back(parent);
                    }
                }
                if self.enqueue(links.tree) {
                    self.roots.push_back((links.tree, Kind::Tree, id));
                }
            }
            Kind::Blob => {}
        }
        Ok(entry(&obj))
    }
}

impl<S: ObjectStore + ?Sized> Iterator for ObjectWalk<'_, S> {
    type Item = Result<ObjectEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let result = if let Some(id) = self.commits.pop_front() {
            self.next_commit(id)
        } else {
            if self.stack.is_empty() {
                let root = self.roots.pop_front()?;
                self.stack.push(root);
            }
            let (id, kind, parent) = self.stack.pop()?;
            self.next_object(id, kind, parent)
        };

        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Collect the full walk; empty when `want` is reachable from a have
pub fn diff<S: ObjectStore + ?Sized>(
    store: &S,
    want: ObjectId,
    haves: &[ObjectId],
) -> Result<Vec<ObjectEntry>> {
    ObjectWalk::new(store, want, haves)?.collect()
}

/// Every object reachable from the given roots. Roots the store does not
/// have are skipped: the remote knows history we have never seen.
fn reachable_from<S: ObjectStore + ?Sized>(
    store: &S,
    roots: &[ObjectId],
) -> Result<HashSet<ObjectId>> {
    let mut reachable = HashSet::new();
    let mut pending = Vec::new();

    for root in roots {
        if root.is_zero() {
            continue;
        }
        if !store.contains(root)? {
            tracing::warn!(
                "{} is not in the local repository; it cannot be used to trim the pack",
                root
            );
            continue;
        }
        if reachable.insert(*root) {
            pending.push((*root, None));
        }
    }

    while let Some((id, referenced_by)) = pending.pop() {
        let (kind, _) = store
            .header(&id)
            .map_err(|e| missing(e, id, referenced_by))?;
        if kind == Kind::Blob {
            continue;
        }

        let obj = store.read(&id).map_err(|e| missing(e, id, referenced_by))?;
        let children: Vec<ObjectId> = match obj.kind {
            Kind::Commit => {
                let links = parse_commit(id, &obj.data)?;
                std::iter::once(links.tree).chain(links.parents).collect()
            }
            Kind::Tree => parse_tree(id, &obj.data)?
                .into_iter()
                .filter(|e| !e.is_submodule())
                .map(|e| e.id)
                .collect(),
            Kind::Tag => vec![parse_tag(id, &obj.data)?.0],
            Kind::Blob => Vec::new(),
        };

        for child in children {
            if reachable.insert(child) {
                pending.push((child, Some(id)));
            }
        }
    }

    Ok(reachable)
}

fn entry(obj: &GitObject) -> ObjectEntry {
    ObjectEntry {
        id: obj.id,
        kind: obj.kind,
        size: obj.data.len() as u64,
    }
}

/// Turn a store "not found" into the fatal missing-object error
fn missing(err: anyhow::Error, id: ObjectId, referenced_by: Option<ObjectId>) -> anyhow::Error {
    match crate::error::find(&err) {
        Some(Error::ObjectNotFound(_)) => Error::MissingObject { id, referenced_by }.into(),
        _ => err,
    }
}
