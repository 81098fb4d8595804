//! Write objects in the version 2 packfile format
//!
//! Layout: "PACK", version, object count, one (header, zlib body) per
//! object, then the SHA-1 of everything before it.

use std::io::{self, Write};

use anyhow::{Context, Result};
use gix_object::Kind;
use indicatif::ProgressBar;
use sha1::{Digest, Sha1};

use super::{
    objects::{kind_str, pack_type_code},
    walk::ObjectEntry,
};
use crate::{error::Error, storage::ObjectStore};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;

/// What was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackStats {
    pub objects: u32,
    /// Total pack length including header and trailer
    pub bytes: u64,
    pub checksum: [u8; 20],
}

/// Tee that feeds every byte the inner writer accepts into a SHA-1
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha1::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Digest of the bytes written so far, and the inner writer
    pub fn finish(self) -> ([u8; 20], W) {
        (self.hasher.finalize().into(), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        // Only what actually reached the sink
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encode the (type, size) header of a pack entry.
///
/// First byte: continuation bit, 3-bit type, low 4 size bits. Each following
/// byte: continuation bit and the next 7 size bits.
pub fn encode_entry_header(kind: Kind, size: u64) -> Vec<u8> {
    let mut header = Vec::with_capacity(10);

    let mut c = (pack_type_code(kind) << 4) | ((size & 0x0F) as u8);
    let mut remaining = size >> 4;
    if remaining > 0 {
        c |= 0x80;
    }
    header.push(c);

    while remaining > 0 {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        header.push(byte);
    }

    header
}

/// Serializes walk entries into a packfile, pulling payloads from a store
pub struct PackEncoder<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    progress: Option<ProgressBar>,
}

impl<'a, S: ObjectStore + ?Sized> PackEncoder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        PackEncoder {
            store,
            progress: None,
        }
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Write the pack for `entries` into `out`.
    ///
    /// On error the output holds a partial pack; the caller must discard it.
    pub fn encode<I, W>(&self, entries: I, out: W) -> Result<PackStats>
    where
        I: IntoIterator<Item = ObjectEntry>,
        I::IntoIter: ExactSizeIterator,
        W: Write,
    {
        let entries = entries.into_iter();
        let count = u32::try_from(entries.len())
            .map_err(|_| Error::Pack(format!("too many objects: {}", entries.len())))?;

        let mut out = HashingWriter::new(out);
        out.write_all(PACK_SIGNATURE)?;
        out.write_all(&PACK_VERSION.to_be_bytes())?;
        out.write_all(&count.to_be_bytes())?;

        if let Some(bar) = &self.progress {
            bar.set_length(count as u64);
        }

        let mut written = 0u32;
        for entry in entries {
            out.write_all(&encode_entry_header(entry.kind, entry.size))?;

            let mut payload = self
                .store
                .compressed_payload(&entry.id)
                .with_context(|| format!("Failed to read object {} for packing", entry.id))?;
            io::copy(&mut payload, &mut out)
                .with_context(|| format!("Failed to write object {} into pack", entry.id))?;

            tracing::debug!(
                "Packed {} {} ({} bytes)",
                kind_str(entry.kind),
                entry.id,
                entry.size
            );
            written += 1;
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        }

        if written != count {
            return Err(Error::Pack(format!(
                "entry iterator promised {} objects but yielded {}",
                count, written
            ))
            .into());
        }

        let body_len = out.written();
        let (checksum, mut out) = out.finish();
        out.write_all(&checksum)?;
        out.flush()?;

        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        Ok(PackStats {
            objects: count,
            bytes: body_len + checksum.len() as u64,
            checksum,
        })
    }
}
