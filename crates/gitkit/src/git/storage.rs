//! Repository storage bound to a `.git` directory of the virtual filesystem.
//!
//! Layout:
//! - `objects/xx/yyyy…`: zlib-compressed loose objects
//! - `HEAD`, `refs/heads/*`, `refs/remotes/<remote>/*`
//! - `config`: INI file with `[core]`, `[remote "…"]` and `[branch "…"]`
//! - `index`: the staging area (see [`Index`])
//!
//! Reads go through a bounded [`ObjectCache`]. Every method is a plain
//! sequence of filesystem calls; nothing here serializes concurrent
//! writers.

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::cache::ObjectCache;
use super::index::Index;
use super::object::{Commit, ObjectId, RawObject, Tree};
use crate::error::{Error, PathError, Result};
use crate::fs::{ChrootFs, FileSystem};

/// Where HEAD points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// Symbolic ref to `refs/heads/<name>`
    Branch(String),
    /// Detached at a commit
    Detached(ObjectId),
}

/// Object, ref, config and index storage for one repository.
pub struct Storage {
    fs: ChrootFs,
    cache: ObjectCache,
}

impl Storage {
    /// Bind storage to `fs`, which must be rooted at the `.git` directory.
    ///
    /// Never fails: an unusable location only shows up on first access.
    pub fn new(fs: ChrootFs, cache: ObjectCache) -> Self {
        Self { fs, cache }
    }

    pub fn fs(&self) -> &ChrootFs {
        &self.fs
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Whether a repository has been initialized here.
    pub async fn exists(&self) -> Result<bool> {
        self.fs.exists(Path::new("HEAD")).await
    }

    /// Create the directory skeleton and a default config.
    ///
    /// HEAD is written separately by the caller once the repository is
    /// complete, so a half-finished clone does not look like a repository.
    pub async fn init_layout(&self) -> Result<()> {
        for dir in ["objects", "refs/heads", "refs/tags", "refs/remotes"] {
            self.fs.mkdir(Path::new(dir), true).await?;
        }
        if !self.fs.exists(Path::new("config")).await? {
            let config = "[core]\n\
                          \trepositoryformatversion = 0\n\
                          \tfilemode = true\n\
                          \tbare = false\n";
            self.fs
                .write_file(Path::new("config"), config.as_bytes())
                .await?;
        }
        Ok(())
    }

    // ==================== Objects ====================

    fn object_path(id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        PathBuf::from("objects").join(&hex[..2]).join(&hex[2..])
    }

    pub async fn has_object(&self, id: &ObjectId) -> Result<bool> {
        if self.cache.get(id).is_some() {
            return Ok(true);
        }
        self.fs.exists(&Self::object_path(id)).await
    }

    pub async fn read_object(&self, id: &ObjectId) -> Result<Arc<RawObject>> {
        if let Some(object) = self.cache.get(id) {
            return Ok(object);
        }

        let compressed = match self.fs.read_file(&Self::object_path(id)).await {
            Ok(bytes) => bytes,
            Err(Error::Path(PathError::NotFound(_))) => {
                return Err(Error::object(format!("object not found: {}", id)));
            }
            Err(e) => return Err(e),
        };

        let mut loose = Vec::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut loose)?;
        let object = Arc::new(RawObject::from_loose(&loose)?);

        if object.id() != *id {
            return Err(Error::object(format!("object {} is corrupt", id)));
        }
        self.cache.put(*id, Arc::clone(&object));
        Ok(object)
    }

    /// Store an object, returning its id. Existing objects are left alone.
    pub async fn write_object(&self, object: RawObject) -> Result<ObjectId> {
        let id = object.id();
        let path = Self::object_path(&id);

        if !self.fs.exists(&path).await? {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&object.to_loose())?;
            let compressed = encoder.finish()?;
            self.fs.write_file(&path, &compressed).await?;
        }

        self.cache.put(id, Arc::new(object));
        Ok(id)
    }

    pub async fn read_commit(&self, id: &ObjectId) -> Result<Commit> {
        Commit::parse(&*self.read_object(id).await?)
    }

    pub async fn read_tree(&self, id: &ObjectId) -> Result<Tree> {
        Tree::parse(&*self.read_object(id).await?)
    }

    // ==================== Refs ====================

    pub async fn head(&self) -> Result<Head> {
        let content = match self.fs.read_file(Path::new("HEAD")).await {
            Ok(content) => content,
            Err(Error::Path(PathError::NotFound(_))) => {
                return Err(Error::state("repository does not exist"));
            }
            Err(e) => return Err(e),
        };
        let content = String::from_utf8_lossy(&content);
        let content = content.trim();

        match content.strip_prefix("ref: refs/heads/") {
            Some(branch) => Ok(Head::Branch(branch.to_string())),
            None => Ok(Head::Detached(ObjectId::from_hex(content)?)),
        }
    }

    pub async fn set_head_branch(&self, branch: &str) -> Result<()> {
        let content = format!("ref: refs/heads/{}\n", branch);
        self.fs
            .write_file(Path::new("HEAD"), content.as_bytes())
            .await
    }

    /// Resolve a full ref name such as `refs/heads/main`.
    pub async fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.fs.read_file(Path::new(name)).await {
            Ok(content) => {
                let content = String::from_utf8_lossy(&content);
                Ok(Some(ObjectId::from_hex(content.trim())?))
            }
            Err(Error::Path(PathError::NotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write_ref(&self, name: &str, id: &ObjectId) -> Result<()> {
        let content = format!("{}\n", id);
        self.fs.write_file(Path::new(name), content.as_bytes()).await
    }

    /// The commit HEAD resolves to, if any.
    pub async fn head_commit(&self) -> Result<Option<ObjectId>> {
        match self.head().await? {
            Head::Branch(branch) => self.read_ref(&format!("refs/heads/{}", branch)).await,
            Head::Detached(id) => Ok(Some(id)),
        }
    }

    // ==================== Config ====================

    /// Get a config value by dotted key (`core.bare`, `remote.origin.url`).
    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let Some((section, name)) = ConfigKey::parse(key) else {
            return Ok(None);
        };
        let content = self.read_config().await?;

        let mut in_section = false;
        for line in content.lines() {
            let line = line.trim();

            if line.starts_with('[') && line.ends_with(']') {
                in_section = section.matches_header(line);
                continue;
            }

            if in_section {
                if let Some((k, v)) = line.split_once('=') {
                    if k.trim().eq_ignore_ascii_case(&name) {
                        return Ok(Some(v.trim().to_string()));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Set a config value, adding the section if needed.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let (section, name) = ConfigKey::parse(key)
            .ok_or_else(|| Error::state(format!("invalid config key: {}", key)))?;
        let content = self.read_config().await?;

        let mut new_content = String::new();
        let mut in_section = false;
        let mut found = false;
        let mut section_exists = false;

        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                // Leaving the target section without finding the key: add it here
                if in_section && !found {
                    new_content.push_str(&format!("\t{} = {}\n", name, value));
                    found = true;
                }

                in_section = section.matches_header(trimmed);
                section_exists |= in_section;
                new_content.push_str(line);
                new_content.push('\n');
                continue;
            }

            if in_section {
                if let Some((k, _)) = trimmed.split_once('=') {
                    if k.trim().eq_ignore_ascii_case(&name) {
                        new_content.push_str(&format!("\t{} = {}\n", name, value));
                        found = true;
                        continue;
                    }
                }
            }

            new_content.push_str(line);
            new_content.push('\n');
        }

        if in_section && !found {
            new_content.push_str(&format!("\t{} = {}\n", name, value));
        } else if !section_exists {
            new_content.push_str(&format!("{}\n\t{} = {}\n", section.header(), name, value));
        }

        self.fs
            .write_file(Path::new("config"), new_content.as_bytes())
            .await
    }

    async fn read_config(&self) -> Result<String> {
        match self.fs.read_file(Path::new("config")).await {
            Ok(content) => Ok(String::from_utf8_lossy(&content).into_owned()),
            Err(Error::Path(PathError::NotFound(_))) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    // ==================== Index ====================

    pub async fn read_index(&self) -> Result<Index> {
        match self.fs.read_file(Path::new("index")).await {
            Ok(content) => Index::parse(&content),
            Err(Error::Path(PathError::NotFound(_))) => Ok(Index::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn write_index(&self, index: &Index) -> Result<()> {
        self.fs.write_file(Path::new("index"), &index.encode()).await
    }
}

/// Section part of a dotted config key.
struct ConfigKey {
    section: String,
    subsection: Option<String>,
}

impl ConfigKey {
    /// Split `remote.origin.url` into (`remote`/`origin`, `url`).
    fn parse(key: &str) -> Option<(Self, String)> {
        let (head, name) = key.rsplit_once('.')?;
        let (section, subsection) = match head.split_once('.') {
            Some((section, sub)) => (section, Some(sub.to_string())),
            None => (head, None),
        };
        if section.is_empty() || name.is_empty() {
            return None;
        }
        Some((
            Self {
                section: section.to_lowercase(),
                subsection,
            },
            name.to_lowercase(),
        ))
    }

    fn header(&self) -> String {
        match &self.subsection {
            Some(sub) => format!("[{} \"{}\"]", self.section, sub),
            None => format!("[{}]", self.section),
        }
    }

    fn matches_header(&self, line: &str) -> bool {
        let inner = &line[1..line.len() - 1];
        let (section, subsection) = match inner.split_once(' ') {
            Some((s, sub)) => (s, Some(sub.trim().trim_matches('"'))),
            None => (inner, None),
        };
        section.eq_ignore_ascii_case(&self.section) && subsection == self.subsection.as_deref()
    }
}
