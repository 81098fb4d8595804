use std::{
    fs::{self, File},
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::{read::ZlibDecoder, read::ZlibEncoder, Compression};
use gix_object::Kind;

use super::traits::ObjectStore;
use crate::{
    error::Error,
    pack::{parse_loose_header, GitObject, ObjectId},
};

/// Longest "type size" prefix we accept before the NUL
const MAX_HEADER_LEN: u64 = 64;

/// Loose objects under `<git-dir>/objects/ab/cdef...`, each zlib-compressed
/// with a "type size\0" header.
pub struct LooseObjectStore {
    objects_dir: PathBuf,
}

impl LooseObjectStore {
    pub fn new<P: AsRef<Path>>(objects_dir: P) -> Self {
        LooseObjectStore {
            objects_dir: objects_dir.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        let (dir, file) = hex.split_at(2);
        self.objects_dir.join(dir).join(file)
    }

    fn open(&self, id: &ObjectId) -> Result<File> {
        let path = self.object_path(id);
        match File::open(&path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::ObjectNotFound(*id).into()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to open object file: {}", path.display()))),
        }
    }

    /// Decompressing reader positioned just past the loose header
    fn open_body(&self, id: &ObjectId) -> Result<(Kind, u64, BufReader<ZlibDecoder<File>>)> {
        let mut reader = BufReader::new(ZlibDecoder::new(self.open(id)?));

        let mut header = Vec::new();
        (&mut reader)
            .take(MAX_HEADER_LEN)
            .read_until(0, &mut header)
            .with_context(|| format!("Failed to decompress object {}", id))?;
        if header.pop() != Some(0) {
            return Err(Error::InvalidObject {
                id: *id,
                reason: "no null terminator in object header".to_string(),
            }
            .into());
        }

        let (kind, size) = parse_loose_header(&header)
            .with_context(|| format!("Failed to parse header of object {}", id))?;
        Ok((kind, size, reader))
    }
}

impl ObjectStore for LooseObjectStore {
    fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn header(&self, id: &ObjectId) -> Result<(Kind, u64)> {
        let (kind, size, _) = self.open_body(id)?;
        Ok((kind, size))
    }

    fn read(&self, id: &ObjectId) -> Result<GitObject> {
        let (kind, size, mut reader) = self.open_body(id)?;

        let mut data = Vec::with_capacity(size as usize);
        reader
            .read_to_end(&mut data)
            .with_context(|| format!("Failed to decompress object {}", id))?;

        if data.len() as u64 != size {
            return Err(Error::InvalidObject {
                id: *id,
                reason: format!("header claims {} bytes, body has {}", size, data.len()),
            }
            .into());
        }

        let obj = GitObject::from_raw(kind, data);
        if obj.id != *id {
            return Err(Error::InvalidObject {
                id: *id,
                reason: format!("content hashes to {}", obj.id),
            }
            .into());
        }
        Ok(obj)
    }

    fn compressed_payload<'a>(&'a self, id: &ObjectId) -> Result<Box<dyn Read + 'a>> {
        let (_, _, body) = self.open_body(id)?;
        Ok(Box::new(ZlibEncoder::new(body, Compression::default())))
    }
}

/// Write a loose object under `objects_dir` (creates intermediate directories)
pub fn write_loose_object(obj: &GitObject, objects_dir: &Path) -> Result<PathBuf> {
    let hex = obj.id.to_hex();
    let (dir, file) = hex.split_at(2);
    let obj_dir = objects_dir.join(dir);
    fs::create_dir_all(&obj_dir)
        .with_context(|| format!("Failed to create object directory: {}", obj_dir.display()))?;

    let obj_path = obj_dir.join(file);
    if obj_path.exists() {
        return Ok(obj_path);
    }

    // Compress and write
    let file = File::create(&obj_path)
        .with_context(|| format!("Failed to create object file: {}", obj_path.display()))?;
    let mut encoder = flate2::write::ZlibEncoder::new(file, Compression::default());
    encoder
        .write_all(&obj.to_loose_format())
        .context("Failed to write compressed object")?;
    encoder.finish().context("Failed to finish compression")?;

    Ok(obj_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_object() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = LooseObjectStore::new(temp_dir.path());

        let obj = GitObject::from_raw(Kind::Blob, b"Hello, World!".to_vec());
        write_loose_object(&obj, &store.objects_dir)?;

        assert!(store.contains(&obj.id)?);
        assert_eq!(store.header(&obj.id)?, (Kind::Blob, 13));
        assert_eq!(store.uncompressed_size(&obj.id)?, 13);
        assert_eq!(store.read(&obj.id)?, obj);
        Ok(())
    }

    #[test]
    fn test_payload_is_zlib_of_body() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = LooseObjectStore::new(temp_dir.path());

        let obj = GitObject::from_raw(Kind::Blob, b"payload without header\n".repeat(100));
        write_loose_object(&obj, &store.objects_dir)?;

        let mut compressed = Vec::new();
        store.compressed_payload(&obj.id)?.read_to_end(&mut compressed)?;

        let mut body = Vec::new();
        ZlibDecoder::new(&compressed[..]).read_to_end(&mut body)?;
        assert_eq!(body, obj.data);
        Ok(())
    }

    #[test]
    fn test_missing_object() {
        let temp_dir = TempDir::new().unwrap();
        let store = LooseObjectStore::new(temp_dir.path());
        let id = GitObject::from_raw(Kind::Blob, b"absent".to_vec()).id;

        assert!(!store.contains(&id).unwrap());
        let err = store.read(&id).unwrap_err();
        assert!(matches!(
            crate::error::find(&err),
            Some(Error::ObjectNotFound(missing)) if *missing == id
        ));
    }

    #[test]
    fn test_corrupt_object_detected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = LooseObjectStore::new(temp_dir.path());

        let real = GitObject::from_raw(Kind::Blob, b"real".to_vec());
        let fake = GitObject {
            id: real.id,
            kind: Kind::Blob,
            data: b"fake".to_vec(),
        };
        write_loose_object(&fake, &store.objects_dir)?;

        let err = store.read(&real.id).unwrap_err();
        assert!(matches!(
            crate::error::find(&err),
            Some(Error::InvalidObject { .. })
        ));
        Ok(())
    }
}
