//! Repository-level operations: clone, open, push, log.

use std::collections::HashSet;
use std::sync::Arc;

use super::config::GitConfig;
use super::object::{Commit, MODE_GITLINK, ObjectId};
use super::pack;
use super::storage::{Head, Storage};
use super::transport::{BasicAuth, RefUpdate, Service, Transport};
use super::worktree::Worktree;
use crate::error::{Error, Result};
use crate::fs::ChrootFs;
#[cfg(feature = "logging")]
use crate::logging::LogConfig;

/// Name under which the clone source is recorded.
pub const ORIGIN: &str = "origin";

/// An opened repository: storage plus the worktree root it belongs to.
pub struct Repository {
    storage: Arc<Storage>,
    root: ChrootFs,
}

impl Repository {
    /// Clone `url` into empty storage.
    ///
    /// HEAD is written last: if any step fails the storage may hold
    /// orphan objects but is still not a repository, so a later clone can
    /// retry.
    pub async fn clone_into(
        storage: Arc<Storage>,
        root: ChrootFs,
        transport: &dyn Transport,
        config: &GitConfig,
        url: &str,
        auth: Option<&BasicAuth>,
    ) -> Result<Self> {
        if storage.exists().await? {
            return Err(Error::state("repository already exists"));
        }
        config.is_url_allowed(url)?;

        let adv = transport.discover(url, Service::UploadPack, auth).await?;
        if adv.is_empty() {
            return Err(Error::transport("remote repository is empty"));
        }

        let branch = adv
            .head_branch()
            .unwrap_or_else(|| config.branch().to_string());
        let head_id = adv
            .get(&format!("refs/heads/{}", branch))
            .or_else(|| adv.get("HEAD"))
            .ok_or_else(|| {
                Error::transport(format!("remote HEAD refers to nonexistent ref: {}", branch))
            })?;

        let mut wants: Vec<ObjectId> = adv.branches().map(|(_, id)| id).collect();
        wants.push(head_id);
        wants.sort();
        wants.dedup();

        let pack = transport.fetch(url, &wants, auth).await?;
        let objects = pack::decode(&pack)?;

        #[cfg(feature = "logging")]
        tracing::debug!(
            url = %LogConfig::new().redact_url(url),
            objects = objects.len(),
            bytes = pack.len(),
            "fetched pack"
        );

        storage.init_layout().await?;
        for object in objects {
            storage.write_object(object).await?;
        }
        if !storage.has_object(&head_id).await? {
            return Err(Error::transport(format!(
                "remote did not send {}",
                head_id
            )));
        }

        storage
            .write_ref(&format!("refs/heads/{}", branch), &head_id)
            .await?;
        for (name, id) in adv.branches() {
            storage
                .write_ref(&format!("refs/remotes/{}/{}", ORIGIN, name), &id)
                .await?;
        }

        storage.config_set("remote.origin.url", url).await?;
        storage
            .config_set("remote.origin.fetch", "+refs/heads/*:refs/remotes/origin/*")
            .await?;
        storage
            .config_set(&format!("branch.{}.remote", branch), ORIGIN)
            .await?;
        storage
            .config_set(&format!("branch.{}.merge", branch), &format!("refs/heads/{}", branch))
            .await?;

        let repo = Self { storage, root };
        let tree = repo.storage.read_commit(&head_id).await?.tree;
        let index = repo.worktree().checkout_tree(&tree).await?;
        repo.storage.write_index(&index).await?;

        repo.storage.set_head_branch(&branch).await?;
        Ok(repo)
    }

    /// Open the repository already present in storage.
    pub async fn open(storage: Arc<Storage>, root: ChrootFs) -> Result<Self> {
        if !storage.exists().await? {
            return Err(Error::state("repository does not exist"));
        }
        Ok(Self { storage, root })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn worktree(&self) -> Worktree {
        Worktree::new(Arc::clone(&self.storage), self.root.clone())
    }

    /// Name of the checked-out branch.
    pub async fn current_branch(&self) -> Result<String> {
        match self.storage.head().await? {
            Head::Branch(branch) => Ok(branch),
            Head::Detached(_) => Err(Error::state("HEAD is detached")),
        }
    }

    /// Push the current branch to the same branch on `url`.
    ///
    /// Returns the commit the remote branch now points at.
    pub async fn push(
        &self,
        transport: &dyn Transport,
        config: &GitConfig,
        url: &str,
        auth: Option<&BasicAuth>,
    ) -> Result<ObjectId> {
        config.is_url_allowed(url)?;

        let branch = self.current_branch().await?;
        let refname = format!("refs/heads/{}", branch);
        let local = self
            .storage
            .read_ref(&refname)
            .await?
            .ok_or_else(|| Error::state(format!("branch {} has no commits", branch)))?;

        let adv = transport.discover(url, Service::ReceivePack, auth).await?;
        let remote = adv.get(&refname).unwrap_or(ObjectId::ZERO);

        if remote == local {
            return Err(Error::state("already up-to-date"));
        }
        if !remote.is_zero() && !self.is_ancestor(&remote, &local).await? {
            return Err(Error::state(format!("non-fast-forward update: {}", refname)));
        }

        // Everything the remote already has is left out of the pack
        let mut known = Vec::new();
        for id in adv.refs.values() {
            if self.storage.has_object(id).await? {
                known.push(*id);
            }
        }
        let exclude: HashSet<ObjectId> = self
            .reachable(&known, &HashSet::new())
            .await?
            .into_iter()
            .collect();
        let missing = self.reachable(&[local], &exclude).await?;

        let mut objects = Vec::with_capacity(missing.len());
        for id in &missing {
            objects.push((*self.storage.read_object(id).await?).clone());
        }
        let pack = pack::encode(&objects)?;

        #[cfg(feature = "logging")]
        tracing::debug!(
            url = %LogConfig::new().redact_url(url),
            refname = %refname,
            objects = objects.len(),
            "sending pack"
        );

        let update = RefUpdate {
            name: refname,
            old: remote,
            new: local,
        };
        transport.push(url, &update, pack, auth).await?;

        if self.storage.config_get("remote.origin.url").await?.as_deref() == Some(url) {
            self.storage
                .write_ref(&format!("refs/remotes/{}/{}", ORIGIN, branch), &local)
                .await?;
        }

        Ok(local)
    }

    /// First-parent history from HEAD, newest first.
    pub async fn log(&self) -> Result<Vec<(ObjectId, Commit)>> {
        let mut history = Vec::new();
        let mut next = self.storage.head_commit().await?;
        while let Some(id) = next {
            let commit = self.storage.read_commit(&id).await?;
            next = commit.parents.first().copied();
            history.push((id, commit));
        }
        Ok(history)
    }

    async fn is_ancestor(&self, ancestor: &ObjectId, tip: &ObjectId) -> Result<bool> {
        if !self.storage.has_object(ancestor).await? {
            return Ok(false);
        }
        let mut seen = HashSet::new();
        let mut pending = vec![*tip];
        while let Some(id) = pending.pop() {
            if id == *ancestor {
                return Ok(true);
            }
            if seen.insert(id) {
                pending.extend(self.storage.read_commit(&id).await?.parents);
            }
        }
        Ok(false)
    }

    /// Ids of every object reachable from `tips`, not descending into
    /// anything in `stop`.
    async fn reachable(
        &self,
        tips: &[ObjectId],
        stop: &HashSet<ObjectId>,
    ) -> Result<Vec<ObjectId>> {
        enum Item {
            Commit(ObjectId),
            Tree(ObjectId),
            Blob(ObjectId),
        }

        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut out = Vec::new();
        let mut pending: Vec<Item> = tips.iter().copied().map(Item::Commit).collect();

        while let Some(item) = pending.pop() {
            let id = match &item {
                Item::Commit(id) | Item::Tree(id) | Item::Blob(id) => *id,
            };
            if stop.contains(&id) || !seen.insert(id) {
                continue;
            }
            match item {
                Item::Commit(id) => {
                    let commit = self.storage.read_commit(&id).await?;
                    pending.push(Item::Tree(commit.tree));
                    pending.extend(commit.parents.into_iter().map(Item::Commit));
                }
                Item::Tree(id) => {
                    let tree = self.storage.read_tree(&id).await?;
                    for entry in tree.entries {
                        if entry.is_tree() {
                            pending.push(Item::Tree(entry.id));
                        } else if entry.mode != MODE_GITLINK {
                            pending.push(Item::Blob(entry.id));
                        }
                    }
                }
                Item::Blob(_) => {}
            }
            out.push(id);
        }

        Ok(out)
    }
}
