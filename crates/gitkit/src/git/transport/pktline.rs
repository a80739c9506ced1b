//! pkt-line framing used by the git wire protocol.
//!
//! Each packet is a 4-digit hex length (including the length itself)
//! followed by the payload. `0000` is a flush packet.

use crate::error::{Error, Result};

/// Append one data packet.
pub fn write(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    out.extend_from_slice(payload);
}

/// Append a data packet holding a text line.
pub fn write_line(out: &mut Vec<u8>, line: &str) {
    if line.ends_with('\n') {
        write(out, line.as_bytes());
    } else {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        write(out, &payload);
    }
}

/// Append a flush packet.
pub fn flush(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0000");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Data(&'a [u8]),
    Flush,
}

impl<'a> Packet<'a> {
    /// Payload as text with the trailing newline removed.
    pub fn text(&self) -> Option<&'a str> {
        match self {
            Packet::Data(data) => std::str::from_utf8(data)
                .ok()
                .map(|s| s.strip_suffix('\n').unwrap_or(s)),
            Packet::Flush => None,
        }
    }
}

/// Sequential packet reader over a byte buffer.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next packet, or `None` at end of input.
    pub fn next_packet(&mut self) -> Result<Option<Packet<'a>>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let header = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| Error::transport("truncated pkt-line header"))?;
        let len = std::str::from_utf8(header)
            .ok()
            .and_then(|h| usize::from_str_radix(h, 16).ok())
            .ok_or_else(|| Error::transport("malformed pkt-line header"))?;

        match len {
            0 => {
                self.pos += 4;
                Ok(Some(Packet::Flush))
            }
            1..=3 => Err(Error::transport(format!("invalid pkt-line length {}", len))),
            _ => {
                let start = self.pos + 4;
                let end = self.pos + len;
                let payload = self
                    .data
                    .get(start..end)
                    .ok_or_else(|| Error::transport("truncated pkt-line payload"))?;
                self.pos = end;
                Ok(Some(Packet::Data(payload)))
            }
        }
    }

    /// Whether the unread input starts with `prefix`.
    pub fn peek_raw(&self, prefix: &[u8]) -> bool {
        self.data[self.pos.min(self.data.len())..].starts_with(prefix)
    }

    /// Unread input, used for the raw pack that follows the negotiation.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}
