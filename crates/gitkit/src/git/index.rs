//! Staging area.
//!
//! Stored at `.git/index` as one `<mode> <id> <path>` line per entry,
//! sorted by path. This is not git's binary index format; it only has to
//! be read back by this engine.

use std::collections::BTreeMap;

use super::object::ObjectId;
use crate::error::{Error, Result};

/// A staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub mode: u32,
    pub id: ObjectId,
}

/// Staged content keyed by worktree-relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: BTreeMap<String, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(path.into(), entry)
    }

    pub fn remove(&mut self, path: &str) -> Option<IndexEntry> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    /// Paths staged at or below `dir` ("" means everything).
    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        if dir.is_empty() {
            return self.entries.keys().cloned().collect();
        }
        let prefix = format!("{}/", dir);
        self.entries
            .keys()
            .filter(|path| path.as_str() == dir || path.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        for (path, entry) in &self.entries {
            out.push_str(&format!("{:o} {} {}\n", entry.mode, entry.id, path));
        }
        out.into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        let mut index = Self::new();

        for line in text.lines().filter(|l| !l.is_empty()) {
            let mut parts = line.splitn(3, ' ');
            let (Some(mode), Some(id), Some(path)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(Error::object(format!("malformed index line {:?}", line)));
            };
            let mode = u32::from_str_radix(mode, 8)
                .map_err(|_| Error::object(format!("malformed index mode {:?}", mode)))?;
            index.insert(
                path,
                IndexEntry {
                    mode,
                    id: ObjectId::from_hex(id)?,
                },
            );
        }

        Ok(index)
    }
}
