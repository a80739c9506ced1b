//! In-memory filesystem implementation

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use super::traits::{DirEntry, FileSystem, Metadata};
use crate::error::{PathError, Result};

/// In-memory filesystem.
///
/// Stores all files and directories in memory, keyed by normalized
/// absolute path. A `BTreeMap` keeps siblings in name order so directory
/// listings are stable. Each primitive operation takes the lock once;
/// sequences of operations are not atomic.
pub struct InMemoryFs {
    entries: RwLock<BTreeMap<PathBuf, FsEntry>>,
}

#[derive(Debug, Clone)]
enum FsEntry {
    File { content: Vec<u8>, metadata: Metadata },
    Directory { metadata: Metadata },
}

impl FsEntry {
    fn metadata(&self) -> &Metadata {
        match self {
            FsEntry::File { metadata, .. } | FsEntry::Directory { metadata } => metadata,
        }
    }

    fn empty_file() -> Self {
        FsEntry::File {
            content: Vec::new(),
            metadata: Metadata::file(0),
        }
    }
}

type Entries = BTreeMap<PathBuf, FsEntry>;

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFs {
    /// Create a new in-memory filesystem containing only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            PathBuf::from("/"),
            FsEntry::Directory {
                metadata: Metadata::directory(),
            },
        );

        Self {
            entries: RwLock::new(entries),
        }
    }

    // Entries are only mutated through single inserts/removes, so a poisoned
    // lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a logical path to its absolute, normalized form.
    ///
    /// `..` never climbs above the root.
    pub(crate) fn normalize_path(path: &Path) -> PathBuf {
        let mut result = PathBuf::from("/");

        for component in path.components() {
            match component {
                Component::Normal(name) => result.push(name),
                Component::ParentDir => {
                    result.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }

        result
    }

    fn display(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    /// Materialize every missing ancestor of `path` as a directory.
    fn ensure_parents(entries: &mut Entries, path: &Path) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        let mut current = PathBuf::from("/");
        for component in parent.components().skip(1) {
            current.push(component);
            match entries.get(&current) {
                Some(FsEntry::Directory { .. }) => {}
                Some(FsEntry::File { .. }) => {
                    return Err(PathError::NotADirectory(Self::display(&current)).into());
                }
                None => {
                    entries.insert(
                        current.clone(),
                        FsEntry::Directory {
                            metadata: Metadata::directory(),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    fn file_path(path: &Path) -> Result<PathBuf> {
        let path = Self::normalize_path(path);
        if path == Path::new("/") {
            return Err(PathError::InvalidPath(Self::display(&path)).into());
        }
        Ok(path)
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        let entries = self.read();

        match entries.get(&path) {
            Some(FsEntry::File { content, .. }) => Ok(content.clone()),
            Some(FsEntry::Directory { .. }) => {
                Err(PathError::IsADirectory(Self::display(&path)).into())
            }
            None => Err(PathError::NotFound(Self::display(&path)).into()),
        }
    }

    async fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        let path = Self::file_path(path)?;
        let mut entries = self.write();

        if let Some(FsEntry::Directory { .. }) = entries.get(&path) {
            return Err(PathError::IsADirectory(Self::display(&path)).into());
        }
        Self::ensure_parents(&mut entries, &path)?;

        entries.insert(
            path,
            FsEntry::File {
                content: content.to_vec(),
                metadata: Metadata::file(content.len() as u64),
            },
        );

        Ok(())
    }

    async fn append_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        let path = Self::file_path(path)?;
        let mut entries = self.write();

        match entries.get_mut(&path) {
            Some(FsEntry::File {
                content: existing,
                metadata,
            }) => {
                existing.extend_from_slice(content);
                metadata.size = existing.len() as u64;
                metadata.modified = SystemTime::now();
                return Ok(());
            }
            Some(FsEntry::Directory { .. }) => {
                return Err(PathError::IsADirectory(Self::display(&path)).into());
            }
            None => {}
        }

        Self::ensure_parents(&mut entries, &path)?;
        entries.insert(
            path,
            FsEntry::File {
                content: content.to_vec(),
                metadata: Metadata::file(content.len() as u64),
            },
        );
        Ok(())
    }

    async fn create_file(&self, path: &Path, exclusive: bool) -> Result<()> {
        let path = Self::file_path(path)?;
        let mut entries = self.write();

        match entries.get(&path) {
            Some(_) if exclusive => {
                return Err(PathError::AlreadyExists(Self::display(&path)).into());
            }
            Some(FsEntry::Directory { .. }) => {
                return Err(PathError::IsADirectory(Self::display(&path)).into());
            }
            Some(FsEntry::File { .. }) | None => {}
        }

        Self::ensure_parents(&mut entries, &path)?;
        entries.insert(path, FsEntry::empty_file());
        Ok(())
    }

    async fn mkdir(&self, path: &Path, recursive: bool) -> Result<()> {
        let path = Self::normalize_path(path);
        let mut entries = self.write();

        match entries.get(&path) {
            Some(FsEntry::Directory { .. }) if recursive => return Ok(()),
            Some(FsEntry::Directory { .. }) => {
                return Err(PathError::AlreadyExists(Self::display(&path)).into());
            }
            Some(FsEntry::File { .. }) => {
                return Err(PathError::NotADirectory(Self::display(&path)).into());
            }
            None => {}
        }

        if recursive {
            Self::ensure_parents(&mut entries, &path)?;
        } else if let Some(parent) = path.parent() {
            match entries.get(parent) {
                Some(FsEntry::Directory { .. }) => {}
                Some(FsEntry::File { .. }) => {
                    return Err(PathError::NotADirectory(Self::display(parent)).into());
                }
                None => return Err(PathError::NotFound(Self::display(parent)).into()),
            }
        }

        entries.insert(
            path,
            FsEntry::Directory {
                metadata: Metadata::directory(),
            },
        );
        Ok(())
    }

    async fn remove(&self, path: &Path, recursive: bool) -> Result<()> {
        let path = Self::file_path(path)?;
        let mut entries = self.write();

        match entries.get(&path) {
            Some(FsEntry::Directory { .. }) => {
                let children: Vec<PathBuf> = entries
                    .range(path.clone()..)
                    .map(|(p, _)| p)
                    .take_while(|p| p.starts_with(&path))
                    .filter(|p| *p != &path)
                    .cloned()
                    .collect();

                if !children.is_empty() && !recursive {
                    return Err(crate::Error::Io(std::io::Error::other(format!(
                        "directory not empty: {}",
                        Self::display(&path)
                    ))));
                }

                for child in children {
                    entries.remove(&child);
                }
                entries.remove(&path);
            }
            Some(FsEntry::File { .. }) => {
                entries.remove(&path);
            }
            None => return Err(PathError::NotFound(Self::display(&path)).into()),
        }

        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<Metadata> {
        let path = Self::normalize_path(path);
        let entries = self.read();

        entries
            .get(&path)
            .map(|entry| entry.metadata().clone())
            .ok_or_else(|| PathError::NotFound(Self::display(&path)).into())
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let path = Self::normalize_path(path);
        let entries = self.read();

        match entries.get(&path) {
            Some(FsEntry::Directory { .. }) => {
                let result = entries
                    .range(path.clone()..)
                    .take_while(|(p, _)| p.starts_with(&path))
                    .filter(|(p, _)| p.parent() == Some(path.as_path()))
                    .map(|(p, entry)| DirEntry {
                        name: p
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        metadata: entry.metadata().clone(),
                    })
                    .collect();
                Ok(result)
            }
            Some(FsEntry::File { .. }) => {
                Err(PathError::NotADirectory(Self::display(&path)).into())
            }
            None => Err(PathError::NotFound(Self::display(&path)).into()),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = Self::normalize_path(path);
        Ok(self.read().contains_key(&path))
    }
}
