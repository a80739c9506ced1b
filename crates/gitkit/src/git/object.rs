//! Git object model: ids, raw objects, commits and trees.
//!
//! Objects are stored and exchanged in git's canonical encoding so that
//! ids computed here match the ids any other git implementation computes
//! for the same content.

use sha1::{Digest, Sha1};
use std::fmt;

use crate::error::{Error, Result};

/// A SHA-1 object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// The all-zero id git uses for "no object" in ref updates.
    pub const ZERO: ObjectId = ObjectId([0; 20]);

    /// Length of a raw id in bytes.
    pub const LEN: usize = 20;

    /// Build an id from 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::object(format!("invalid object id length {}", bytes.len())))?;
        Ok(Self(raw))
    }

    /// Parse a 40-character hex id.
    pub fn from_hex(hex_id: &str) -> Result<Self> {
        let bytes = hex::decode(hex_id.trim())
            .map_err(|_| Error::object(format!("invalid object id {:?}", hex_id)))?;
        Self::from_bytes(&bytes)
    }

    /// Compute the id of an object with the given kind and body.
    pub fn hash_object(kind: ObjectKind, data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", kind.as_str(), data.len()).as_bytes());
        hasher.update(data);
        let digest = hasher.finalize();

        let mut raw = [0u8; 20];
        raw.copy_from_slice(digest.as_slice());
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 20]
    }

    /// First seven hex digits, as shown by `git log --oneline`.
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// Kind of a git object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Tree => "tree",
            ObjectKind::Blob => "blob",
            ObjectKind::Tag => "tag",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "commit" => Some(ObjectKind::Commit),
            "tree" => Some(ObjectKind::Tree),
            "blob" => Some(ObjectKind::Blob),
            "tag" => Some(ObjectKind::Tag),
            _ => None,
        }
    }

    /// Type number used in pack entry headers.
    pub fn pack_type(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
        }
    }

    pub fn from_pack_type(ty: u8) -> Option<Self> {
        match ty {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Tree),
            3 => Some(ObjectKind::Blob),
            4 => Some(ObjectKind::Tag),
            _ => None,
        }
    }
}

/// An object body tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl RawObject {
    pub fn new(kind: ObjectKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn blob(data: impl Into<Vec<u8>>) -> Self {
        Self::new(ObjectKind::Blob, data)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::hash_object(self.kind, &self.data)
    }

    /// Uncompressed loose encoding: `"<kind> <len>\0<body>"`.
    pub fn to_loose(&self) -> Vec<u8> {
        let mut out = format!("{} {}\0", self.kind.as_str(), self.data.len()).into_bytes();
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_loose(bytes: &[u8]) -> Result<Self> {
        let nul = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::object("loose object header is not terminated"))?;
        let header = std::str::from_utf8(&bytes[..nul])
            .map_err(|_| Error::object("loose object header is not UTF-8"))?;
        let (kind, len) = header
            .split_once(' ')
            .ok_or_else(|| Error::object(format!("malformed object header {:?}", header)))?;
        let kind = ObjectKind::parse(kind)
            .ok_or_else(|| Error::object(format!("unknown object type {:?}", kind)))?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::object(format!("malformed object size {:?}", len)))?;

        let data = &bytes[nul + 1..];
        if data.len() != len {
            return Err(Error::object(format!(
                "object size mismatch: header says {}, body has {}",
                len,
                data.len()
            )));
        }
        Ok(Self::new(kind, data))
    }
}

/// Commit author/committer identity and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch
    pub when: i64,
    /// Offset from UTC in minutes
    pub offset_minutes: i32,
}

impl Signature {
    /// A signature stamped with the current local time.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = chrono::Local::now();
        Self {
            name: name.into(),
            email: email.into(),
            when: now.timestamp(),
            offset_minutes: now.offset().local_minus_utc() / 60,
        }
    }

    fn encode(&self) -> String {
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let offset = self.offset_minutes.abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.when,
            sign,
            offset / 60,
            offset % 60
        )
    }

    fn parse(value: &str) -> Result<Self> {
        let malformed = || Error::object(format!("malformed signature {:?}", value));

        let open = value.find('<').ok_or_else(malformed)?;
        let close = value[open..].find('>').map(|i| open + i).ok_or_else(malformed)?;
        let name = value[..open].trim_end().to_string();
        let email = value[open + 1..close].to_string();

        let mut rest = value[close + 1..].split_whitespace();
        let when = rest
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .unwrap_or(0);
        let offset_minutes = rest.next().map(parse_tz_offset).unwrap_or(0);

        Ok(Self {
            name,
            email,
            when,
            offset_minutes,
        })
    }
}

fn parse_tz_offset(tz: &str) -> i32 {
    let (sign, digits) = match tz.split_at_checked(1) {
        Some(("-", d)) => (-1, d),
        Some(("+", d)) => (1, d),
        _ => return 0,
    };
    let Ok(hhmm) = digits.parse::<i32>() else {
        return 0;
    };
    sign * ((hhmm / 100) * 60 + hhmm % 100)
}

/// A parsed commit object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn encode(&self) -> RawObject {
        let mut out = format!("tree {}\n", self.tree);
        for parent in &self.parents {
            out.push_str(&format!("parent {}\n", parent));
        }
        out.push_str(&format!("author {}\n", self.author.encode()));
        out.push_str(&format!("committer {}\n", self.committer.encode()));
        out.push('\n');
        out.push_str(&self.message);
        RawObject::new(ObjectKind::Commit, out)
    }

    pub fn parse(object: &RawObject) -> Result<Self> {
        if object.kind != ObjectKind::Commit {
            return Err(Error::object(format!(
                "expected commit, found {}",
                object.kind.as_str()
            )));
        }
        let text = String::from_utf8_lossy(&object.data);
        let (headers, message) = text.split_once("\n\n").unwrap_or((&text, ""));

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // Continuation lines belong to multi-line headers such as gpgsig.
            if line.starts_with(' ') {
                continue;
            }
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value)?),
                "parent" => parents.push(ObjectId::from_hex(value)?),
                "author" => author = Some(Signature::parse(value)?),
                "committer" => committer = Some(Signature::parse(value)?),
                _ => {}
            }
        }

        let tree = tree.ok_or_else(|| Error::object("commit has no tree"))?;
        let author = author.ok_or_else(|| Error::object("commit has no author"))?;
        Ok(Self {
            tree,
            parents,
            committer: committer.unwrap_or_else(|| author.clone()),
            author,
            message: message.to_string(),
        })
    }
}

/// Mode of a regular, non-executable file.
pub const MODE_FILE: u32 = 0o100644;
/// Mode of an executable file.
pub const MODE_EXECUTABLE: u32 = 0o100755;
/// Mode of a symbolic link; the blob holds the target path.
pub const MODE_SYMLINK: u32 = 0o120000;
/// Mode of a sub-tree.
pub const MODE_TREE: u32 = 0o040000;
/// Mode of a submodule link.
pub const MODE_GITLINK: u32 = 0o160000;

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub name: String,
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn is_tree(&self) -> bool {
        self.mode == MODE_TREE
    }

    // Git orders tree entries as if directory names ended in '/'.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }
}

/// A parsed tree object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn encode(&self) -> RawObject {
        let mut entries = self.entries.clone();
        entries.sort_by_key(TreeEntry::sort_key);

        let mut out = Vec::new();
        for entry in &entries {
            out.extend_from_slice(format!("{:o} {}\0", entry.mode, entry.name).as_bytes());
            out.extend_from_slice(entry.id.as_bytes());
        }
        RawObject::new(ObjectKind::Tree, out)
    }

    pub fn parse(object: &RawObject) -> Result<Self> {
        if object.kind != ObjectKind::Tree {
            return Err(Error::object(format!(
                "expected tree, found {}",
                object.kind.as_str()
            )));
        }

        let data = &object.data;
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|b| *b == b' ')
                .map(|i| pos + i)
                .ok_or_else(|| Error::object("truncated tree entry mode"))?;
            let nul = data[space..]
                .iter()
                .position(|b| *b == 0)
                .map(|i| space + i)
                .ok_or_else(|| Error::object("truncated tree entry name"))?;
            let id_end = nul + 1 + ObjectId::LEN;
            if id_end > data.len() {
                return Err(Error::object("truncated tree entry id"));
            }

            let mode = std::str::from_utf8(&data[pos..space])
                .ok()
                .and_then(|m| u32::from_str_radix(m, 8).ok())
                .ok_or_else(|| Error::object("malformed tree entry mode"))?;
            let name = String::from_utf8_lossy(&data[space + 1..nul]).into_owned();
            let id = ObjectId::from_bytes(&data[nul + 1..id_end])?;

            entries.push(TreeEntry { mode, name, id });
            pos = id_end;
        }

        Ok(Self { entries })
    }
}
