//! Filesystem trait definitions

use async_trait::async_trait;
use std::path::Path;
use std::time::SystemTime;

use crate::error::Result;

/// Async filesystem trait.
///
/// All filesystem implementations must implement this trait. Paths are
/// logical and rooted: relative paths resolve against `/`.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Full contents of a regular file.
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace a file's contents, creating it and any missing parent
    /// directories.
    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Append contents to a file, creating it if absent.
    async fn append_file(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Create an empty file, materializing missing parent directories.
    ///
    /// With `exclusive` set, fails if anything already exists at `path`.
    /// Otherwise an existing regular file is truncated.
    async fn create_file(&self, path: &Path, exclusive: bool) -> Result<()>;

    /// Create a directory; with `recursive`, also its missing parents
    /// and no error if it already exists.
    async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Remove a file, or a directory (non-empty only with `recursive`).
    async fn remove(&self, path: &Path, recursive: bool) -> Result<()>;

    async fn stat(&self, path: &Path) -> Result<Metadata>;

    /// Read directory entries, sorted by name.
    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    async fn exists(&self, path: &Path) -> Result<bool>;
}

/// Size and type of a filesystem entry.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub file_type: FileType,
    /// Content length; always 0 for directories
    pub size: u64,
    pub modified: SystemTime,
}

impl Metadata {
    pub(crate) fn file(size: u64) -> Self {
        Self {
            file_type: FileType::File,
            size,
            modified: SystemTime::now(),
        }
    }

    pub(crate) fn directory() -> Self {
        Self {
            file_type: FileType::Directory,
            size: 0,
            modified: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_file(self) -> bool {
        self == FileType::File
    }

    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }
}

/// One child of a directory, as returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Base name, without the parent path
    pub name: String,
    pub metadata: Metadata,
}
