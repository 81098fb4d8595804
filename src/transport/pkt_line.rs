//! pkt-line framing
//!
//! Git uses "pkt-line" framing: 4 hex digits length prefix followed by data.
//! Special values: "0000" (flush), "0001" (delimiter), "0002" (response-end)

use anyhow::Result;

use crate::error::Error;

/// Flush packet (marks end of message)
pub const FLUSH_PKT: &[u8] = b"0000";

/// Maximum pkt-line size including the 4-byte prefix
pub const MAX_PKT_LINE: usize = 65520;

/// Frame `data` as one pkt-line
pub fn pkt_line(data: &[u8]) -> Vec<u8> {
    let len = data.len() + 4; // Include the 4-byte length prefix
    let mut pkt = format!("{:04x}", len).into_bytes();
    pkt.extend_from_slice(data);
    pkt
}

/// Frame `data` plus a trailing newline
pub fn pkt_line_with_newline(data: &[u8]) -> Vec<u8> {
    let mut line = data.to_vec();
    line.push(b'\n');
    pkt_line(&line)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine<'a> {
    Flush,
    Delimiter,
    ResponseEnd,
    Data(&'a [u8]),
}

/// Parse pkt-lines from a buffer
pub struct PktLineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read the next pkt-line; `None` at the end of the buffer.
    ///
    /// A data packet starting with "ERR " is the remote reporting a fatal
    /// error and is returned as a protocol error.
    pub fn read(&mut self) -> Result<Option<PktLine<'a>>> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.pos + 4 > self.data.len() {
            return Err(protocol("truncated pkt-line length"));
        }

        let len_hex = &self.data[self.pos..self.pos + 4];
        if !len_hex.iter().all(u8::is_ascii_hexdigit) {
            return Err(protocol("invalid pkt-line length"));
        }
        let len = std::str::from_utf8(len_hex)
            .ok()
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
            .ok_or_else(|| protocol("invalid pkt-line length"))?;

        let special = match len {
            0 => Some(PktLine::Flush),
            1 => Some(PktLine::Delimiter),
            2 => Some(PktLine::ResponseEnd),
            3 => return Err(protocol("pkt-line length too small")),
            _ => None,
        };
        if let Some(pkt) = special {
            self.pos += 4;
            return Ok(Some(pkt));
        }

        if len > MAX_PKT_LINE {
            return Err(protocol("pkt-line too large"));
        }
        if self.pos + len > self.data.len() {
            return Err(protocol("pkt-line truncated"));
        }

        let payload = &self.data[self.pos + 4..self.pos + len];
        self.pos += len;

        if let Some(msg) = payload.strip_prefix(b"ERR ") {
            return Err(Error::Protocol(format!(
                "remote error: {}",
                String::from_utf8_lossy(msg).trim_end()
            ))
            .into());
        }

        Ok(Some(PktLine::Data(payload)))
    }

    /// Read data lines until a flush (or the end of the buffer)
    pub fn read_until_flush(&mut self) -> Result<Vec<&'a [u8]>> {
        let mut lines = Vec::new();
        loop {
            match self.read()? {
                Some(PktLine::Flush) | Some(PktLine::ResponseEnd) | None => break,
                Some(PktLine::Data(data)) => lines.push(data),
                Some(PktLine::Delimiter) => continue,
            }
        }
        Ok(lines)
    }

    /// Remaining bytes
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Strip one trailing LF, as senders usually append it
pub fn chomp(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn protocol(msg: &str) -> anyhow::Error {
    Error::Protocol(msg.to_string()).into()
}
