use std::io::Read;

use anyhow::Result;
use gix_object::Kind;

use crate::pack::{GitObject, ObjectId};

/// Read-only, content-addressed access to local git objects.
///
/// Lookups of ids that are not present fail with
/// [`Error::ObjectNotFound`](crate::error::Error::ObjectNotFound).
pub trait ObjectStore {
    /// Check if object exists by id.
    fn contains(&self, id: &ObjectId) -> Result<bool>;

    /// Object kind and uncompressed size, without reading the whole body.
    fn header(&self, id: &ObjectId) -> Result<(Kind, u64)>;

    /// Read the full object into memory.
    fn read(&self, id: &ObjectId) -> Result<GitObject>;

    /// Stream of the zlib-compressed object body (no loose header), as it
    /// appears in a pack entry. Implementations must not buffer the object.
    fn compressed_payload<'a>(&'a self, id: &ObjectId) -> Result<Box<dyn Read + 'a>>;

    /// Uncompressed size of the object body.
    fn uncompressed_size(&self, id: &ObjectId) -> Result<u64> {
        Ok(self.header(id)?.1)
    }
}
