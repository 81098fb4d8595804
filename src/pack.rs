//! Git pack format support
//!
//! Computes which objects a push has to carry, writes them as a version 2
//! packfile, and parses packs back for verification.

pub mod decode;
pub mod encode;
mod objects;
pub mod walk;

pub use decode::{parse_pack, ParsedPack};
pub use encode::{encode_entry_header, HashingWriter, PackEncoder, PackStats};
pub use objects::{
    compute_object_id, format_tree, kind_str, loose_header, parse_commit, parse_kind,
    parse_loose_header, parse_tag, parse_tree, CommitLinks, GitObject, ObjectId, TreeEntry,
};
pub use walk::{diff, ObjectEntry, ObjectWalk};
