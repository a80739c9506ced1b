//! Pack file codec (version 2).
//!
//! Decoding resolves both delta forms (`OFS_DELTA`, `REF_DELTA`) against
//! bases in the same pack and verifies the SHA-1 trailer. Encoding writes
//! every object whole; packs we send are small enough that deltas are not
//! worth computing.

use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Read, Write};

use super::object::{ObjectId, ObjectKind, RawObject};
use crate::error::{Error, Result};

const SIGNATURE: &[u8; 4] = b"PACK";
const VERSION: u32 = 2;
const HEADER_LEN: usize = 12;

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// Serialize objects into a pack.
pub fn encode(objects: &[RawObject]) -> Result<Vec<u8>> {
    let count = u32::try_from(objects.len())
        .map_err(|_| Error::object("too many objects for one pack"))?;

    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());

    for object in objects {
        write_entry_header(&mut out, object.kind.pack_type(), object.data.len());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&object.data)?;
        out.extend_from_slice(&encoder.finish()?);
    }

    let trailer = Sha1::digest(&out);
    out.extend_from_slice(trailer.as_slice());
    Ok(out)
}

fn write_entry_header(out: &mut Vec<u8>, ty: u8, size: usize) {
    let mut size = size;
    let mut byte = (ty << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

/// An entry as stored, before delta resolution.
enum Entry {
    Whole(RawObject),
    OfsDelta { base_offset: usize, delta: Vec<u8> },
    RefDelta { base: ObjectId, delta: Vec<u8> },
}

/// Parse a pack and return every object it contains, deltas applied.
pub fn decode(pack: &[u8]) -> Result<Vec<RawObject>> {
    if pack.len() < HEADER_LEN + ObjectId::LEN || &pack[..4] != SIGNATURE {
        return Err(Error::object("not a pack file"));
    }
    let version = u32::from_be_bytes([pack[4], pack[5], pack[6], pack[7]]);
    if version != 2 && version != 3 {
        return Err(Error::object(format!("unsupported pack version {}", version)));
    }
    let count = u32::from_be_bytes([pack[8], pack[9], pack[10], pack[11]]) as usize;

    let body_end = pack.len() - ObjectId::LEN;
    let expected = Sha1::digest(&pack[..body_end]);
    if expected.as_slice() != &pack[body_end..] {
        return Err(Error::object("pack checksum mismatch"));
    }

    // Every entry takes at least one header byte.
    let mut entries: Vec<(usize, Entry)> = Vec::with_capacity(count.min(body_end - HEADER_LEN));
    let mut pos = HEADER_LEN;
    for _ in 0..count {
        let start = pos;
        let (ty, size, header_len) = read_entry_header(&pack[pos..body_end])?;
        pos += header_len;

        let entry = match ty {
            OFS_DELTA => {
                let (distance, used) = read_offset(&pack[pos..body_end])?;
                pos += used;
                let base_offset = start
                    .checked_sub(distance)
                    .ok_or_else(|| Error::object("delta base offset out of range"))?;
                let (delta, used) = inflate(&pack[pos..body_end], size)?;
                pos += used;
                Entry::OfsDelta { base_offset, delta }
            }
            REF_DELTA => {
                let id_end = pos + ObjectId::LEN;
                if id_end > body_end {
                    return Err(Error::object("truncated delta base id"));
                }
                let base = ObjectId::from_bytes(&pack[pos..id_end])?;
                pos = id_end;
                let (delta, used) = inflate(&pack[pos..body_end], size)?;
                pos += used;
                Entry::RefDelta { base, delta }
            }
            ty => {
                let kind = ObjectKind::from_pack_type(ty)
                    .ok_or_else(|| Error::object(format!("unknown pack entry type {}", ty)))?;
                let (data, used) = inflate(&pack[pos..body_end], size)?;
                pos += used;
                Entry::Whole(RawObject::new(kind, data))
            }
        };
        entries.push((start, entry));
    }

    resolve(entries)
}

// Delta chains may point forward (REF_DELTA), so resolve in passes until
// nothing changes.
fn resolve(entries: Vec<(usize, Entry)>) -> Result<Vec<RawObject>> {
    let mut by_offset: HashMap<usize, usize> = HashMap::new();
    let mut by_id: HashMap<ObjectId, usize> = HashMap::new();
    let mut resolved: Vec<Option<RawObject>> = Vec::with_capacity(entries.len());
    let mut pending: Vec<(usize, Entry)> = Vec::new();

    for (slot, (offset, entry)) in entries.into_iter().enumerate() {
        by_offset.insert(offset, slot);
        match entry {
            Entry::Whole(object) => {
                by_id.insert(object.id(), slot);
                resolved.push(Some(object));
            }
            delta => {
                resolved.push(None);
                pending.push((slot, delta));
            }
        }
    }

    while !pending.is_empty() {
        let before = pending.len();
        let mut still_pending = Vec::new();

        for (slot, entry) in pending {
            let base_slot = match &entry {
                Entry::OfsDelta { base_offset, .. } => by_offset.get(base_offset).copied(),
                Entry::RefDelta { base, .. } => by_id.get(base).copied(),
                Entry::Whole(_) => None,
            };
            let base = base_slot.and_then(|s| resolved[s].as_ref());

            match (base, &entry) {
                (Some(base), Entry::OfsDelta { delta, .. } | Entry::RefDelta { delta, .. }) => {
                    let object = RawObject::new(base.kind, apply_delta(&base.data, delta)?);
                    by_id.insert(object.id(), slot);
                    resolved[slot] = Some(object);
                }
                _ => still_pending.push((slot, entry)),
            }
        }

        if still_pending.len() == before {
            return Err(Error::object("pack references a missing delta base"));
        }
        pending = still_pending;
    }

    Ok(resolved.into_iter().flatten().collect())
}

fn read_entry_header(data: &[u8]) -> Result<(u8, usize, usize)> {
    let truncated = || Error::object("truncated pack entry header");

    let first = *data.first().ok_or_else(truncated)?;
    let ty = (first >> 4) & 0x07;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut used = 1;
    let mut byte = first;

    while byte & 0x80 != 0 {
        byte = *data.get(used).ok_or_else(truncated)?;
        if shift > 57 {
            return Err(Error::object("pack entry size overflow"));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        used += 1;
    }

    Ok((ty, size, used))
}

fn read_offset(data: &[u8]) -> Result<(usize, usize)> {
    let truncated = || Error::object("truncated delta offset");

    let mut byte = *data.first().ok_or_else(truncated)?;
    let mut offset = (byte & 0x7f) as usize;
    let mut used = 1;

    while byte & 0x80 != 0 {
        byte = *data.get(used).ok_or_else(truncated)?;
        offset = offset
            .checked_add(1)
            .and_then(|o| o.checked_mul(128))
            .ok_or_else(|| Error::object("delta offset overflow"))?
            | (byte & 0x7f) as usize;
        used += 1;
    }

    Ok((offset, used))
}

/// Inflate one zlib stream, returning the data and the compressed length.
///
/// The declared size comes from the remote: it bounds how much is read but
/// is never allocated up front.
fn inflate(data: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected.min(data.len()));
    let limit = u64::try_from(expected).unwrap_or(u64::MAX).saturating_add(1);
    (&mut decoder).take(limit).read_to_end(&mut out)?;

    if out.len() != expected {
        return Err(Error::object(format!(
            "pack entry size mismatch: expected {}, got {}",
            expected,
            out.len()
        )));
    }
    Ok((out, decoder.total_in() as usize))
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut value = 0usize;
    let mut shift = 0;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| Error::object("truncated delta header"))?;
        *pos += 1;
        if shift > 57 {
            return Err(Error::object("delta size overflow"));
        }
        value |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// Apply a git delta to `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let source_len = read_varint(delta, &mut pos)?;
    let target_len = read_varint(delta, &mut pos)?;
    if source_len != base.len() {
        return Err(Error::object(format!(
            "delta base size mismatch: expected {}, got {}",
            source_len,
            base.len()
        )));
    }

    let mut out = Vec::with_capacity(target_len.min(base.len().saturating_add(delta.len())));
    let overflow = || Error::object("delta result exceeds declared size");
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut offset = 0usize;
            let mut size = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| Error::object("truncated delta copy"))?;
                    offset |= (byte as usize) << (8 * i);
                    pos += 1;
                }
            }
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| Error::object("truncated delta copy"))?;
                    size |= (byte as usize) << (8 * i);
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|end| *end <= base.len())
                .ok_or_else(|| Error::object("delta copy out of range"))?;
            if out.len() + size > target_len {
                return Err(overflow());
            }
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let end = pos + cmd as usize;
            if end > delta.len() {
                return Err(Error::object("truncated delta insert"));
            }
            if out.len() + cmd as usize > target_len {
                return Err(overflow());
            }
            out.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            return Err(Error::object("reserved delta opcode"));
        }
    }

    if out.len() != target_len {
        return Err(Error::object(format!(
            "delta result size mismatch: expected {}, got {}",
            target_len,
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::git::object::{Tree, TreeEntry, MODE_FILE};

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn finish(mut pack: Vec<u8>) -> Vec<u8> {
        let trailer = Sha1::digest(&pack);
        pack.extend_from_slice(trailer.as_slice());
        pack
    }

    fn header(count: u32) -> Vec<u8> {
        let mut pack = b"PACK".to_vec();
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&count.to_be_bytes());
        pack
    }

    // "hello " copied from the base, then "rust" inserted
    const DELTA: &[u8] = &[11, 10, 0x90, 6, 4, b'r', b'u', b's', b't'];

    #[test]
    fn test_encode_decode() {
        let blob = RawObject::blob(vec![7u8; 300]);
        let tree = Tree {
            entries: vec![TreeEntry {
                mode: MODE_FILE,
                name: "seven".into(),
                id: blob.id(),
            }],
        }
        .encode();

        let pack = encode(&[blob.clone(), tree.clone()]).unwrap();
        assert_eq!(&pack[..4], b"PACK");
        assert_eq!(decode(&pack).unwrap(), vec![blob, tree]);
    }

    #[test]
    fn test_empty_pack() {
        let pack = encode(&[]).unwrap();
        assert_eq!(pack.len(), HEADER_LEN + ObjectId::LEN);
        assert!(decode(&pack).unwrap().is_empty());
    }

    #[test]
    fn test_apply_delta() {
        assert_eq!(apply_delta(b"hello world", DELTA).unwrap(), b"hello rust");
        assert!(apply_delta(b"short", DELTA).is_err());
        assert!(apply_delta(b"hello world", &[11, 10, 0x90, 60]).is_err());
    }

    #[test]
    fn test_decode_ofs_delta() {
        let mut pack = header(2);
        write_entry_header(&mut pack, 3, 11);
        pack.extend_from_slice(&compress(b"hello world"));

        let delta_start = pack.len();
        let distance = delta_start - HEADER_LEN;
        assert!(distance < 128);
        write_entry_header(&mut pack, OFS_DELTA, DELTA.len());
        pack.push(distance as u8);
        pack.extend_from_slice(&compress(DELTA));

        let objects = decode(&finish(pack)).unwrap();
        assert_eq!(objects[1], RawObject::blob(b"hello rust".to_vec()));
    }

    #[test]
    fn test_decode_forward_ref_delta() {
        let base = RawObject::blob(b"hello world".to_vec());

        let mut pack = header(2);
        write_entry_header(&mut pack, REF_DELTA, DELTA.len());
        pack.extend_from_slice(base.id().as_bytes());
        pack.extend_from_slice(&compress(DELTA));
        write_entry_header(&mut pack, 3, 11);
        pack.extend_from_slice(&compress(b"hello world"));

        let objects = decode(&finish(pack)).unwrap();
        assert_eq!(objects[0].data, b"hello rust");
        assert_eq!(objects[1], base);
    }

    #[test]
    fn test_missing_base() {
        let mut pack = header(1);
        write_entry_header(&mut pack, REF_DELTA, DELTA.len());
        pack.extend_from_slice(ObjectId::ZERO.as_bytes());
        pack.extend_from_slice(&compress(DELTA));

        let err = decode(&finish(pack)).unwrap_err();
        assert!(err.to_string().contains("missing delta base"));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut pack = encode(&[RawObject::blob(b"x".to_vec())]).unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0xff;
        assert!(decode(&pack).is_err());
    }

    #[test]
    fn test_oversized_declared_entry() {
        let mut pack = header(1);
        write_entry_header(&mut pack, 3, 1 << 46);
        pack.extend_from_slice(&compress(b"tiny"));

        let err = decode(&finish(pack)).unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn test_inflate_stops_at_declared_size() {
        let packed = compress(&[0u8; 4096]);
        let err = inflate(&packed, 16).unwrap_err();
        assert!(err.to_string().contains("expected 16, got 17"));
    }

    #[test]
    fn test_huge_entry_count() {
        let pack = finish(header(u32::MAX));
        let err = decode(&pack).unwrap_err();
        assert!(err.to_string().contains("truncated pack entry header"));
    }

    #[test]
    fn test_delta_with_huge_target() {
        // declares a 2^56 byte result, carries no commands
        let mut delta = vec![11];
        delta.extend_from_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(apply_delta(b"hello world", &delta).is_err());

        // declares 4 bytes, copies 6
        let mut delta = vec![11, 4];
        delta.extend_from_slice(&[0x90, 6, 0x90, 6]);
        let err = apply_delta(b"hello world", &delta).unwrap_err();
        assert!(err.to_string().contains("exceeds declared size"));
    }

    #[test]
    fn test_large_entry_header() {
        let mut out = Vec::new();
        write_entry_header(&mut out, 3, 100_000);
        let (ty, size, used) = read_entry_header(&out).unwrap();
        assert_eq!((ty, size, used), (3, 100_000, out.len()));
    }
}
