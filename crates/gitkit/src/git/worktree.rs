//! Working tree: staging files and recording commits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::index::{Index, IndexEntry};
use super::object::{
    Commit, MODE_FILE, MODE_GITLINK, MODE_TREE, ObjectId, RawObject, Signature, Tree, TreeEntry,
};
use super::storage::{Head, Storage};
use crate::error::{Error, Result};
use crate::fs::{ChrootFs, FileSystem};

/// Files of one repository, bound to the repository root.
pub struct Worktree {
    storage: Arc<Storage>,
    fs: ChrootFs,
}

impl Worktree {
    pub(crate) fn new(storage: Arc<Storage>, fs: ChrootFs) -> Self {
        Self { storage, fs }
    }

    pub fn fs(&self) -> &ChrootFs {
        &self.fs
    }

    /// Stage a file or directory. `.` stages the whole tree.
    ///
    /// Paths that are gone from disk but present in the index are staged
    /// as deletions. Staged files keep their mode; new files are staged as
    /// regular files. Submodule links stay as they are while their
    /// directory exists. Returns the number of index entries touched.
    pub async fn add(&self, path: &str) -> Result<usize> {
        let rel = normalize_rel(path)?;
        let mut index = self.storage.read_index().await?;
        let mut touched = 0;

        let on_disk = if rel.is_empty() {
            true
        } else {
            self.fs.exists(Path::new(&rel)).await?
        };

        if !on_disk {
            let gone = index.paths_under(&rel);
            if gone.is_empty() {
                return Err(Error::state(format!("entry not found: {}", rel)));
            }
            for p in gone {
                index.remove(&p);
                touched += 1;
            }
            self.storage.write_index(&index).await?;
            return Ok(touched);
        }

        let meta = if rel.is_empty() {
            None
        } else {
            Some(self.fs.stat(Path::new(&rel)).await?)
        };

        let (files, gitlinks) = match meta {
            Some(m) if m.file_type.is_file() => (vec![rel.clone()], Vec::new()),
            _ => self.walk(&rel, &index).await?,
        };

        // Anything staged below `rel` that the walk did not see was deleted
        for staged in index.paths_under(&rel) {
            if !files.contains(&staged) && !gitlinks.contains(&staged) {
                index.remove(&staged);
                touched += 1;
            }
        }

        for file in files {
            let content = self.fs.read_file(Path::new(&file)).await?;
            let id = self.storage.write_object(RawObject::blob(content)).await?;
            let mode = match index.get(&file) {
                Some(staged) if staged.mode != MODE_GITLINK => staged.mode,
                _ => MODE_FILE,
            };
            let entry = IndexEntry { mode, id };
            if index.insert(file, entry) != Some(entry) {
                touched += 1;
            }
        }

        self.storage.write_index(&index).await?;

        #[cfg(feature = "logging")]
        tracing::debug!(path = %rel, touched, "staged");

        Ok(touched)
    }

    /// Record the index as a new commit on the current branch.
    ///
    /// Fails when the resulting tree equals the tree of HEAD.
    pub async fn commit(
        &self,
        message: &str,
        author: Signature,
        committer: Signature,
    ) -> Result<ObjectId> {
        let index = self.storage.read_index().await?;
        let parent = self.storage.head_commit().await?;

        let mut objects = Vec::new();
        let tree = TreeBuilder::from_index(&index).build(&mut objects);

        let unchanged = match parent {
            Some(parent) => self.storage.read_commit(&parent).await?.tree == tree,
            None => index.is_empty(),
        };
        if unchanged {
            return Err(Error::state(
                "cannot create empty commit: clean working tree",
            ));
        }

        for object in objects {
            self.storage.write_object(object).await?;
        }

        let mut message = message.to_string();
        if !message.ends_with('\n') {
            message.push('\n');
        }
        let commit = Commit {
            tree,
            parents: parent.into_iter().collect(),
            author,
            committer,
            message,
        };
        let id = self.storage.write_object(commit.encode()).await?;

        match self.storage.head().await? {
            Head::Branch(branch) => {
                self.storage
                    .write_ref(&format!("refs/heads/{}", branch), &id)
                    .await?
            }
            Head::Detached(_) => self.storage.write_ref("HEAD", &id).await?,
        }

        #[cfg(feature = "logging")]
        tracing::debug!(commit = %id.short(), "committed");

        Ok(id)
    }

    /// Write every file of `tree` into the worktree and return the
    /// matching index. Submodules are not fetched: each gets an empty
    /// directory and keeps its link in the index.
    pub(crate) async fn checkout_tree(&self, tree: &ObjectId) -> Result<Index> {
        let mut index = Index::new();
        let mut pending = vec![(String::new(), *tree)];

        while let Some((prefix, id)) = pending.pop() {
            let tree = self.storage.read_tree(&id).await?;
            for entry in tree.entries {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };

                if entry.is_tree() {
                    self.fs.mkdir(Path::new(&path), true).await?;
                    pending.push((path, entry.id));
                    continue;
                }

                if entry.mode == MODE_GITLINK {
                    self.fs.mkdir(Path::new(&path), true).await?;
                } else {
                    let blob = self.storage.read_object(&entry.id).await?;
                    self.fs.write_file(Path::new(&path), &blob.data).await?;
                }
                index.insert(
                    path,
                    IndexEntry {
                        mode: entry.mode,
                        id: entry.id,
                    },
                );
            }
        }

        Ok(index)
    }

    // Files below `dir` ("" for the root), skipping the repository's own
    // `.git` directory. Directories staged as submodule links are returned
    // separately and not descended into.
    async fn walk(&self, dir: &str, index: &Index) -> Result<(Vec<String>, Vec<String>)> {
        let mut files = Vec::new();
        let mut gitlinks = Vec::new();
        let mut pending = vec![dir.to_string()];

        while let Some(current) = pending.pop() {
            if index.get(&current).is_some_and(|e| e.mode == MODE_GITLINK) {
                gitlinks.push(current);
                continue;
            }
            let path = if current.is_empty() {
                PathBuf::from("/")
            } else {
                PathBuf::from(&current)
            };
            for entry in self.fs.read_dir(&path).await? {
                if current.is_empty() && entry.name == ".git" {
                    continue;
                }
                let child = if current.is_empty() {
                    entry.name
                } else {
                    format!("{}/{}", current, entry.name)
                };
                if entry.metadata.file_type.is_dir() {
                    pending.push(child);
                } else {
                    files.push(child);
                }
            }
        }

        files.sort();
        Ok((files, gitlinks))
    }
}

/// Normalize a host-supplied path to the index form (`a/b.txt`).
fn normalize_rel(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(Error::state(format!("path outside repository: {}", path)));
                }
            }
            p => parts.push(p),
        }
    }
    if parts.first() == Some(&".git") {
        return Err(Error::state(format!("invalid path: {}", path)));
    }
    Ok(parts.join("/"))
}

/// Nested view of the index used to emit tree objects bottom-up.
#[derive(Default)]
pub(crate) struct TreeBuilder {
    files: BTreeMap<String, IndexEntry>,
    dirs: BTreeMap<String, TreeBuilder>,
}

impl TreeBuilder {
    pub(crate) fn from_index(index: &Index) -> Self {
        let mut root = Self::default();
        for (path, entry) in index.iter() {
            let mut node = &mut root;
            let mut components: Vec<&str> = path.split('/').collect();
            let Some(name) = components.pop() else {
                continue;
            };
            for dir in components {
                node = node.dirs.entry(dir.to_string()).or_default();
            }
            node.files.insert(name.to_string(), *entry);
        }
        root
    }

    /// Encode this directory and its children, appending every new tree
    /// object to `out`. Returns the id of this directory's tree.
    pub(crate) fn build(&self, out: &mut Vec<RawObject>) -> ObjectId {
        let mut entries = Vec::with_capacity(self.files.len() + self.dirs.len());
        for (name, child) in &self.dirs {
            entries.push(TreeEntry {
                mode: MODE_TREE,
                name: name.clone(),
                id: child.build(out),
            });
        }
        for (name, entry) in &self.files {
            entries.push(TreeEntry {
                mode: entry.mode,
                name: name.clone(),
                id: entry.id,
            });
        }

        let object = Tree { entries }.encode();
        let id = object.id();
        out.push(object);
        id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::git::cache::ObjectCache;
    use crate::git::object::{MODE_EXECUTABLE, MODE_SYMLINK};

    async fn worktree() -> (Arc<Storage>, Worktree) {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let root = ChrootFs::new(fs, "/repo");
        let storage = Arc::new(Storage::new(root.chroot(".git"), ObjectCache::default()));
        storage.init_layout().await.unwrap();
        storage.set_head_branch("master").await.unwrap();
        (Arc::clone(&storage), Worktree::new(storage, root))
    }

    fn sig() -> Signature {
        Signature {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            when: 1_700_000_000,
            offset_minutes: 0,
        }
    }

    #[test]
    fn test_normalize_rel() {
        assert_eq!(normalize_rel("./a//b/").unwrap(), "a/b");
        assert_eq!(normalize_rel("/a/../b").unwrap(), "b");
        assert_eq!(normalize_rel(".").unwrap(), "");
        assert!(normalize_rel("..").is_err());
        assert!(normalize_rel(".git/config").is_err());
    }

    #[tokio::test]
    async fn test_add_and_commit() {
        let (storage, wt) = worktree().await;
        wt.fs()
            .write_file(Path::new("src/main.rs"), b"fn main() {}\n")
            .await
            .unwrap();
        wt.fs().write_file(Path::new("README"), b"hi\n").await.unwrap();

        assert_eq!(wt.add(".").await.unwrap(), 2);
        let id = wt.commit("initial", sig(), sig()).await.unwrap();

        assert_eq!(storage.head_commit().await.unwrap(), Some(id));
        let commit = storage.read_commit(&id).await.unwrap();
        assert_eq!(commit.message, "initial\n");
        assert!(commit.parents.is_empty());

        let tree = storage.read_tree(&commit.tree).await.unwrap();
        let names: Vec<_> = tree.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["README", "src"]);
    }

    #[tokio::test]
    async fn test_empty_commit_rejected() {
        let (_, wt) = worktree().await;
        let err = wt.commit("nothing", sig(), sig()).await.unwrap_err();
        assert!(err.to_string().contains("clean working tree"));

        wt.fs().write_file(Path::new("a"), b"1").await.unwrap();
        wt.add("a").await.unwrap();
        wt.commit("one", sig(), sig()).await.unwrap();

        wt.add("a").await.unwrap();
        assert!(wt.commit("again", sig(), sig()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_missing_path() {
        let (_, wt) = worktree().await;
        let err = wt.add("nope.txt").await.unwrap_err();
        assert_eq!(err.to_string(), "entry not found: nope.txt");
    }

    #[tokio::test]
    async fn test_add_stages_deletion() {
        let (storage, wt) = worktree().await;
        wt.fs().write_file(Path::new("a"), b"1").await.unwrap();
        wt.fs().write_file(Path::new("b"), b"2").await.unwrap();
        wt.add(".").await.unwrap();
        wt.commit("two files", sig(), sig()).await.unwrap();

        wt.fs().remove(Path::new("a"), false).await.unwrap();
        assert_eq!(wt.add("a").await.unwrap(), 1);
        let second = wt.commit("drop a", sig(), sig()).await.unwrap();

        let commit = storage.read_commit(&second).await.unwrap();
        assert_eq!(commit.parents.len(), 1);
        let tree = storage.read_tree(&commit.tree).await.unwrap();
        assert_eq!(tree.entries.len(), 1);
        assert_eq!(tree.entries[0].name, "b");
    }

    #[tokio::test]
    async fn test_checkout_tree_round_trip() {
        let (storage, wt) = worktree().await;
        wt.fs().write_file(Path::new("d/e/f.txt"), b"deep").await.unwrap();
        wt.add("d").await.unwrap();
        let id = wt.commit("deep", sig(), sig()).await.unwrap();
        let tree = storage.read_commit(&id).await.unwrap().tree;

        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let other = Worktree::new(Arc::clone(&storage), ChrootFs::new(fs, "/copy"));
        let index = other.checkout_tree(&tree).await.unwrap();

        assert!(index.contains("d/e/f.txt"));
        assert_eq!(
            other.fs().read_file(Path::new("d/e/f.txt")).await.unwrap(),
            b"deep"
        );
    }

    /// Checks out a tree with a script, a symlink and a submodule, and
    /// returns the submodule's commit id.
    async fn checkout_mixed_modes(storage: &Storage, wt: &Worktree) -> ObjectId {
        let mut ids = Vec::new();
        for content in [&b"v1\n"[..], &b"../target"[..], &b"#!/bin/sh\n"[..]] {
            ids.push(storage.write_object(RawObject::blob(content.to_vec())).await.unwrap());
        }
        let submodule = RawObject::blob(b"never fetched".to_vec()).id();
        let entry = |mode, name: &str, id| TreeEntry {
            mode,
            name: name.into(),
            id,
        };
        let tree = Tree {
            entries: vec![
                entry(MODE_FILE, "README", ids[0]),
                entry(MODE_SYMLINK, "latest", ids[1]),
                entry(MODE_EXECUTABLE, "run.sh", ids[2]),
                entry(MODE_GITLINK, "vendor", submodule),
            ],
        };
        let tree = storage.write_object(tree.encode()).await.unwrap();

        let index = wt.checkout_tree(&tree).await.unwrap();
        assert_eq!(index.get("vendor").unwrap().mode, MODE_GITLINK);
        storage.write_index(&index).await.unwrap();
        submodule
    }

    #[tokio::test]
    async fn test_commit_after_checkout_keeps_modes_and_submodules() {
        let (storage, wt) = worktree().await;
        let submodule = checkout_mixed_modes(&storage, &wt).await;
        assert!(wt.fs().stat(Path::new("vendor")).await.unwrap().file_type.is_dir());

        wt.fs().write_file(Path::new("README"), b"v2\n").await.unwrap();
        assert_eq!(wt.add(".").await.unwrap(), 1);
        let id = wt.commit("edit readme", sig(), sig()).await.unwrap();

        let commit = storage.read_commit(&id).await.unwrap();
        let tree = storage.read_tree(&commit.tree).await.unwrap();
        let modes: Vec<_> = tree
            .entries
            .iter()
            .map(|e| (e.name.as_str(), e.mode))
            .collect();
        assert_eq!(
            modes,
            vec![
                ("README", MODE_FILE),
                ("latest", MODE_SYMLINK),
                ("run.sh", MODE_EXECUTABLE),
                ("vendor", MODE_GITLINK),
            ]
        );
        assert_eq!(tree.entries[3].id, submodule);
    }

    #[tokio::test]
    async fn test_add_single_path_keeps_mode() {
        let (storage, wt) = worktree().await;
        checkout_mixed_modes(&storage, &wt).await;

        wt.fs().write_file(Path::new("run.sh"), b"#!/bin/sh\nexit 1\n").await.unwrap();
        assert_eq!(wt.add("run.sh").await.unwrap(), 1);
        assert_eq!(wt.add("vendor").await.unwrap(), 0);
        wt.fs().write_file(Path::new("new.sh"), b"echo\n").await.unwrap();
        wt.add("new.sh").await.unwrap();

        let index = storage.read_index().await.unwrap();
        assert_eq!(index.get("run.sh").unwrap().mode, MODE_EXECUTABLE);
        assert_eq!(index.get("vendor").unwrap().mode, MODE_GITLINK);
        assert_eq!(index.get("new.sh").unwrap().mode, MODE_FILE);
    }

    #[tokio::test]
    async fn test_removed_submodule_directory_staged_as_deletion() {
        let (storage, wt) = worktree().await;
        checkout_mixed_modes(&storage, &wt).await;

        wt.fs().remove(Path::new("vendor"), true).await.unwrap();
        assert_eq!(wt.add("vendor").await.unwrap(), 1);
        assert!(!storage.read_index().await.unwrap().contains("vendor"));
    }
}
