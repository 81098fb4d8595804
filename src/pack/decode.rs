//! Parse and verify packfiles

use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::ZlibDecoder;
use sha1::{Digest, Sha1};

use super::{
    encode::{PACK_SIGNATURE, PACK_VERSION},
    objects::{kind_from_pack_code, GitObject},
};
use crate::error::Error;

/// Delta entries, which this crate never writes
const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

#[derive(Debug, Clone)]
pub struct ParsedPack {
    pub version: u32,
    pub objects: Vec<GitObject>,
    pub checksum: [u8; 20],
}

/// Parse a complete packfile, verifying its trailer
pub fn parse_pack(data: &[u8]) -> Result<ParsedPack> {
    let pack_error = |msg: String| -> anyhow::Error { Error::Pack(msg).into() };

    if data.len() < 32 {
        return Err(pack_error(format!("packfile too small: {} bytes", data.len())));
    }
    if &data[0..4] != PACK_SIGNATURE {
        return Err(pack_error("invalid packfile signature".into()));
    }

    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(pack_error(format!("unsupported pack version: {}", version)));
    }
    let object_count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let checksum_start = data.len() - 20;
    let computed: [u8; 20] = Sha1::digest(&data[..checksum_start]).into();
    if computed[..] != data[checksum_start..] {
        return Err(pack_error("checksum mismatch".into()));
    }

    let mut pos = 12;
    let mut objects = Vec::with_capacity(object_count as usize);
    for index in 0..object_count {
        let (obj, consumed) = parse_entry(&data[pos..checksum_start])
            .with_context(|| format!("Failed to parse pack entry {} at offset {}", index, pos))?;
        pos += consumed;
        objects.push(obj);
    }

    if pos != checksum_start {
        return Err(pack_error(format!(
            "{} trailing bytes after the last entry",
            checksum_start - pos
        )));
    }

    Ok(ParsedPack {
        version,
        objects,
        checksum: computed,
    })
}

/// Parse one entry; returns the object and the number of bytes consumed
fn parse_entry(data: &[u8]) -> Result<(GitObject, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::Pack("truncated entry header".into()))?;
    let mut pos = 1;

    let type_code = (first >> 4) & 0x07;
    if type_code == OFS_DELTA || type_code == REF_DELTA {
        return Err(Error::Pack("delta entries are not supported".into()).into());
    }
    let kind = kind_from_pack_code(type_code)
        .ok_or_else(|| Error::Pack(format!("invalid object type: {}", type_code)))?;

    let mut size = (first & 0x0F) as u64;
    let mut shift = 4;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *data
            .get(pos)
            .ok_or_else(|| Error::Pack("truncated entry size".into()))?;
        pos += 1;
        if shift > 57 {
            return Err(Error::Pack("entry size overflows".into()).into());
        }
        size |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
    }

    let mut decoder = ZlibDecoder::new(&data[pos..]);
    let mut content = Vec::with_capacity(size as usize);
    decoder
        .read_to_end(&mut content)
        .context("Failed to inflate entry")?;
    if content.len() as u64 != size {
        return Err(Error::Pack(format!(
            "entry inflated to {} bytes, header says {}",
            content.len(),
            size
        ))
        .into());
    }
    pos += decoder.total_in() as usize;

    Ok((GitObject::from_raw(kind, content), pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_pack() -> Vec<u8> {
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&0u32.to_be_bytes());
        let digest: [u8; 20] = Sha1::digest(&pack).into();
        pack.extend_from_slice(&digest);
        pack
    }

    #[test]
    fn test_empty_pack() {
        let parsed = parse_pack(&empty_pack()).unwrap();
        assert_eq!(parsed.version, 2);
        assert!(parsed.objects.is_empty());
    }

    #[test]
    fn test_corrupted_trailer() {
        let mut pack = empty_pack();
        let last = pack.len() - 1;
        pack[last] ^= 0xFF;
        let err = parse_pack(&pack).unwrap_err();
        assert!(matches!(crate::error::find(&err), Some(Error::Pack(_))));
    }

    #[test]
    fn test_bad_signature() {
        let mut pack = empty_pack();
        pack[0] = b'K';
        assert!(parse_pack(&pack).is_err());
    }

    #[test]
    fn test_delta_rejected() {
        let err = parse_entry(&[0x60]).unwrap_err();
        assert!(err.to_string().contains("delta"));
    }
}
