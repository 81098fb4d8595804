//! Git object handling using gitoxide

use std::{fmt, str::FromStr};

use anyhow::{Context, Result};
use gix_object::Kind;
use sha1::{Digest, Sha1};

use crate::error::Error;

/// Git object SHA-1 identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Id used on the wire for "no such ref"
    pub const ZERO: ObjectId = ObjectId([0u8; 20]);

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(ObjectId(arr))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 40 {
            return None;
        }
        let bytes = hex::decode(hex).ok()?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// First seven hex characters, for status lines
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::from_hex(s).with_context(|| format!("Invalid object id: {:?}", s))
    }
}

pub fn kind_str(kind: Kind) -> &'static str {
    match kind {
        Kind::Commit => "commit",
        Kind::Tree => "tree",
        Kind::Blob => "blob",
        Kind::Tag => "tag",
    }
}

pub fn parse_kind(name: &str) -> Option<Kind> {
    match name {
        "commit" => Some(Kind::Commit),
        "tree" => Some(Kind::Tree),
        "blob" => Some(Kind::Blob),
        "tag" => Some(Kind::Tag),
        _ => None,
    }
}

/// Type code used in pack entry headers
pub fn pack_type_code(kind: Kind) -> u8 {
    match kind {
        Kind::Commit => 1,
        Kind::Tree => 2,
        Kind::Blob => 3,
        Kind::Tag => 4,
    }
}

pub fn kind_from_pack_code(code: u8) -> Option<Kind> {
    match code {
        1 => Some(Kind::Commit),
        2 => Some(Kind::Tree),
        3 => Some(Kind::Blob),
        4 => Some(Kind::Tag),
        _ => None,
    }
}

/// Represents a Git object with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    pub id: ObjectId,
    pub kind: Kind,
    pub data: Vec<u8>,
}

impl GitObject {
    /// Create a GitObject from raw object data (without header)
    pub fn from_raw(kind: Kind, data: Vec<u8>) -> Self {
        let id = compute_object_id(kind, &data);
        Self { id, kind, data }
    }

    /// Parse a loose object file (with header: "type size\0data")
    pub fn from_loose_format(content: &[u8]) -> Result<Self> {
        let null_pos = content
            .iter()
            .position(|&b| b == 0)
            .context("No null terminator in object header")?;

        let (kind, size) = parse_loose_header(&content[..null_pos])?;
        let data = content[null_pos + 1..].to_vec();
        if data.len() as u64 != size {
            anyhow::bail!(
                "Object header claims {} bytes but body has {}",
                size,
                data.len()
            );
        }

        Ok(Self::from_raw(kind, data))
    }

    /// Serialize to loose object format (with header)
    pub fn to_loose_format(&self) -> Vec<u8> {
        let mut result = loose_header(self.kind, self.data.len() as u64);
        result.extend_from_slice(&self.data);
        result
    }
}

pub fn loose_header(kind: Kind, size: u64) -> Vec<u8> {
    format!("{} {}\0", kind_str(kind), size).into_bytes()
}

/// Parse "type size" (the part of a loose header before the NUL)
pub fn parse_loose_header(header: &[u8]) -> Result<(Kind, u64)> {
    let header = std::str::from_utf8(header).context("Invalid UTF-8 in object header")?;

    let (kind, size) = header
        .split_once(' ')
        .with_context(|| format!("Invalid object header format: {}", header))?;
    let kind = parse_kind(kind).with_context(|| format!("Unknown object type: {}", kind))?;
    let size = size
        .parse::<u64>()
        .with_context(|| format!("Invalid object size: {}", size))?;

    Ok((kind, size))
}

/// Compute Git SHA-1 object ID from object type and data
pub fn compute_object_id(kind: Kind, data: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(loose_header(kind, data.len() as u64));
    hasher.update(data);
    let mut id = [0u8; 20];
    id.copy_from_slice(&hasher.finalize());
    ObjectId(id)
}

/// Mode of tree entries pointing into another repository
const GITLINK_MODE: &str = "160000";
const TREE_MODE: &str = "40000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub name: Vec<u8>,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode == TREE_MODE
    }

    pub fn is_submodule(&self) -> bool {
        self.mode == GITLINK_MODE
    }
}

/// Parse tree content: repeated "<mode> <name>\0<20-byte id>"
pub fn parse_tree(id: ObjectId, data: &[u8]) -> Result<Vec<TreeEntry>> {
    let invalid = |reason: &str| Error::InvalidObject {
        id,
        reason: reason.to_string(),
    };

    let mut entries = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| invalid("tree entry without mode"))?;
        let mode = std::str::from_utf8(&rest[..space])
            .map_err(|_| invalid("tree entry mode is not UTF-8"))?
            .to_string();
        rest = &rest[space + 1..];

        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| invalid("tree entry name not terminated"))?;
        let name = rest[..nul].to_vec();
        rest = &rest[nul + 1..];

        if rest.len() < 20 {
            return Err(invalid("truncated tree entry id").into());
        }
        let entry_id = ObjectId::from_bytes(&rest[..20]).ok_or_else(|| invalid("bad id"))?;
        rest = &rest[20..];

        entries.push(TreeEntry {
            mode,
            name,
            id: entry_id,
        });
    }
    Ok(entries)
}

/// Serialize tree entries into tree content (entries are written as given)
pub fn format_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut data = Vec::new();
    for entry in entries {
        data.extend_from_slice(entry.mode.as_bytes());
        data.push(b' ');
        data.extend_from_slice(&entry.name);
        data.push(0);
        data.extend_from_slice(entry.id.as_bytes());
    }
    data
}

/// Tree and parent ids named in a commit's header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLinks {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
}

pub fn parse_commit(id: ObjectId, data: &[u8]) -> Result<CommitLinks> {
    let mut tree = None;
    let mut parents = Vec::new();

    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            // End of headers
            break;
        }
        if let Some(hex) = line.strip_prefix(b"tree ") {
            tree = Some(header_id(id, hex)?);
        } else if let Some(hex) = line.strip_prefix(b"parent ") {
            parents.push(header_id(id, hex)?);
        }
    }

    let tree = tree.ok_or_else(|| Error::InvalidObject {
        id,
        reason: "commit without tree header".to_string(),
    })?;
    Ok(CommitLinks { tree, parents })
}

/// Target of an annotated tag
pub fn parse_tag(id: ObjectId, data: &[u8]) -> Result<(ObjectId, Kind)> {
    let mut target = None;
    let mut kind = None;

    for line in data.split(|&b| b == b'\n') {
        if line.is_empty() {
            break;
        }
        if let Some(hex) = line.strip_prefix(b"object ") {
            target = Some(header_id(id, hex)?);
        } else if let Some(name) = line.strip_prefix(b"type ") {
            kind = std::str::from_utf8(name).ok().and_then(parse_kind);
        }
    }

    match (target, kind) {
        (Some(target), Some(kind)) => Ok((target, kind)),
        _ => Err(Error::InvalidObject {
            id,
            reason: "tag without object/type header".to_string(),
        }
        .into()),
    }
}

fn header_id(id: ObjectId, hex: &[u8]) -> Result<ObjectId> {
    std::str::from_utf8(hex)
        .ok()
        .and_then(|s| ObjectId::from_hex(s.trim()))
        .ok_or_else(|| {
            Error::InvalidObject {
                id,
                reason: format!("bad id in header: {}", String::from_utf8_lossy(hex)),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_object_id() {
        // Known blob: "test\n" -> SHA-1: 9daeafb9864cf43055ae93beb0afd6c7d144bfa4
        let id = compute_object_id(Kind::Blob, b"test\n");
        assert_eq!(id.to_hex(), "9daeafb9864cf43055ae93beb0afd6c7d144bfa4");
    }

    #[test]
    fn test_empty_tree_id() {
        let id = compute_object_id(Kind::Tree, b"");
        assert_eq!(id.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }

    #[test]
    fn test_loose_format_roundtrip() {
        let obj = GitObject::from_raw(Kind::Blob, b"hello world\n".to_vec());
        let parsed = GitObject::from_loose_format(&obj.to_loose_format()).unwrap();
        assert_eq!(obj, parsed);
    }

    #[test]
    fn test_loose_format_size_mismatch() {
        assert!(GitObject::from_loose_format(b"blob 10\0short").is_err());
    }

    #[test]
    fn test_object_id_hex() {
        assert!(ObjectId::from_hex("abc").is_none());
        assert!(ObjectId::from_hex(&"g".repeat(40)).is_none());
        let id: ObjectId = "9daeafb9864cf43055ae93beb0afd6c7d144bfa4".parse().unwrap();
        assert_eq!(id.short(), "9daeafb");
        assert!(ObjectId::ZERO.is_zero());
        assert!(!id.is_zero());
    }

    #[test]
    fn test_tree_roundtrip() {
        let blob = compute_object_id(Kind::Blob, b"a");
        let sub = compute_object_id(Kind::Tree, b"");
        let entries = vec![
            TreeEntry {
                mode: "100644".into(),
                name: b"a.txt".to_vec(),
                id: blob,
            },
            TreeEntry {
                mode: "40000".into(),
                name: b"dir".to_vec(),
                id: sub,
            },
        ];
        let data = format_tree(&entries);
        let tree_id = compute_object_id(Kind::Tree, &data);
        let parsed = parse_tree(tree_id, &data).unwrap();
        assert_eq!(parsed, entries);
        assert!(parsed[1].is_tree());
        assert!(!parsed[0].is_submodule());
    }

    #[test]
    fn test_truncated_tree() {
        let err = parse_tree(ObjectId::ZERO, b"100644 a\0abc").unwrap_err();
        assert!(matches!(
            crate::error::find(&err),
            Some(Error::InvalidObject { .. })
        ));
    }

    #[test]
    fn test_parse_commit() {
        let tree = compute_object_id(Kind::Tree, b"");
        let parent = compute_object_id(Kind::Blob, b"not really a commit");
        let data = format!(
            "tree {}\nparent {}\nauthor A <a@example.com> 0 +0000\n\nparent {}\n",
            tree, parent, tree
        );
        let links = parse_commit(ObjectId::ZERO, data.as_bytes()).unwrap();
        assert_eq!(links.tree, tree);
        // message lines are not headers
        assert_eq!(links.parents, vec![parent]);
    }

    #[test]
    fn test_parse_tag() {
        let target = compute_object_id(Kind::Blob, b"x");
        let data = format!("object {}\ntype commit\ntag v1\n\nmsg\n", target);
        let (id, kind) = parse_tag(ObjectId::ZERO, data.as_bytes()).unwrap();
        assert_eq!(id, target);
        assert_eq!(kind, Kind::Commit);
    }
}
