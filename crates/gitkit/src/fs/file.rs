//! Writable file handles

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::traits::FileSystem;
use crate::error::Result;

/// Handle to a file opened for writing.
///
/// Obtained from [`FileHandle::create`] (create or truncate) or
/// [`FileHandle::create_new`] (exclusive). Each `write` appends at the end
/// of what this handle has written so far, so the bytes written through a
/// fresh handle form the file's full content.
pub struct FileHandle {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    written: u64,
}

impl FileHandle {
    /// Create `path` (truncating an existing file) and open it for writing.
    pub async fn create(fs: Arc<dyn FileSystem>, path: impl AsRef<Path>) -> Result<Self> {
        Self::open(fs, path.as_ref(), false).await
    }

    /// Create `path`, failing if anything already exists there.
    pub async fn create_new(fs: Arc<dyn FileSystem>, path: impl AsRef<Path>) -> Result<Self> {
        Self::open(fs, path.as_ref(), true).await
    }

    async fn open(fs: Arc<dyn FileSystem>, path: &Path, exclusive: bool) -> Result<Self> {
        fs.create_file(path, exclusive).await?;
        Ok(Self {
            fs,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Append `buf` to the file. Returns the number of bytes written.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.fs.append_file(&self.path, buf).await?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    /// Path this handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written through this handle.
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    #[tokio::test]
    async fn test_writes_accumulate() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());

        let mut handle = FileHandle::create(Arc::clone(&fs), "/notes.txt")
            .await
            .unwrap();
        handle.write(b"hello ").await.unwrap();
        handle.write(b"world").await.unwrap();

        assert_eq!(handle.written(), 11);
        let content = fs.read_file(Path::new("/notes.txt")).await.unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_recreate_discards_old_content() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        fs.write_file(Path::new("/notes.txt"), b"stale").await.unwrap();

        let mut handle = FileHandle::create(Arc::clone(&fs), "/notes.txt")
            .await
            .unwrap();
        handle.write(b"fresh").await.unwrap();

        let content = fs.read_file(Path::new("/notes.txt")).await.unwrap();
        assert_eq!(content, b"fresh");
    }
}
