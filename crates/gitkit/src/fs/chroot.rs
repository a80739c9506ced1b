//! Sub-tree view of another filesystem
//!
//! Binding a repository to its worktree root and to its `.git` directory
//! is pure path arithmetic: a [`ChrootFs`] rewrites every path into its
//! base directory and forwards the call. Construction never touches the
//! underlying filesystem, so an invalid base only surfaces on first use.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::memory::InMemoryFs;
use super::traits::{DirEntry, FileSystem, Metadata};
use crate::error::Result;

/// Filesystem view rooted at a directory of another filesystem.
///
/// Paths are normalized inside the view before being joined to the base,
/// so `..` cannot reach outside it.
#[derive(Clone)]
pub struct ChrootFs {
    inner: Arc<dyn FileSystem>,
    base: PathBuf,
}

impl ChrootFs {
    /// Bind `base` of `inner` as the root of a new view.
    pub fn new(inner: Arc<dyn FileSystem>, base: impl AsRef<Path>) -> Self {
        Self {
            inner,
            base: InMemoryFs::normalize_path(base.as_ref()),
        }
    }

    /// The base directory in the underlying filesystem.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Narrow this view further to one of its sub-directories.
    pub fn chroot(&self, sub: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            base: self.resolve(sub.as_ref()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        let inside = InMemoryFs::normalize_path(path);
        match inside.strip_prefix("/") {
            Ok(rel) if !rel.as_os_str().is_empty() => self.base.join(rel),
            _ => self.base.clone(),
        }
    }
}

#[async_trait]
impl FileSystem for ChrootFs {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read_file(&self.resolve(path)).await
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner.write_file(&self.resolve(path), content).await
    }

    async fn append_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner.append_file(&self.resolve(path), content).await
    }

    async fn create_file(&self, path: &Path, exclusive: bool) -> Result<()> {
        self.inner.create_file(&self.resolve(path), exclusive).await
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
        self.inner.mkdir(&self.resolve(path), recursive).await
    }

    async fn remove(&self, path: &Path, recursive: bool) -> Result<()> {
        self.inner.remove(&self.resolve(path), recursive).await
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        self.inner.stat(&self.resolve(path)).await
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        self.inner.read_dir(&self.resolve(path)).await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(&self.resolve(path)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paths_land_under_base() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let view = ChrootFs::new(Arc::clone(&fs), "repo");

        view.write_file(Path::new("src/main.rs"), b"fn main() {}")
            .await
            .unwrap();

        let content = fs.read_file(Path::new("/repo/src/main.rs")).await.unwrap();
        assert_eq!(content, b"fn main() {}");
    }

    #[tokio::test]
    async fn test_cannot_escape_base() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let view = ChrootFs::new(Arc::clone(&fs), "/repo/.git");

        view.write_file(Path::new("../../outside"), b"x").await.unwrap();

        assert!(fs.exists(Path::new("/repo/.git/outside")).await.unwrap());
        assert!(!fs.exists(Path::new("/outside")).await.unwrap());
    }

    #[tokio::test]
    async fn test_construction_is_lazy() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let view = ChrootFs::new(Arc::clone(&fs), "/missing");

        assert!(!fs.exists(Path::new("/missing")).await.unwrap());
        assert!(view.read_dir(Path::new("/")).await.is_err());
    }

    #[tokio::test]
    async fn test_nested_chroot() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let worktree = ChrootFs::new(Arc::clone(&fs), "/repo");
        let dot_git = worktree.chroot(".git");

        assert_eq!(dot_git.base(), Path::new("/repo/.git"));
    }
}
