//! In-process remotes.
//!
//! A [`MemoryRemote`] is a bare repository held in a map. Fetch and push
//! still go through pack bytes, so the local side is exercised exactly as
//! against a network remote.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BasicAuth, RefAdvertisement, RefUpdate, Service, Transport};
use crate::error::{Error, Result};
use crate::git::index::{Index, IndexEntry};
use crate::git::object::{
    Commit, MODE_FILE, ObjectId, ObjectKind, RawObject, Signature, Tree,
};
use crate::git::pack;
use crate::git::worktree::TreeBuilder;
use crate::logging::LogConfig;

/// Remotes keyed by URL. Cloning the transport shares the registry.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    remotes: Arc<Mutex<HashMap<String, Arc<MemoryRemote>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<MemoryRemote>>> {
        self.remotes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `remote` at `url`, replacing any remote already there.
    pub fn register(&self, url: impl Into<String>, remote: MemoryRemote) -> Arc<MemoryRemote> {
        let remote = Arc::new(remote);
        self.lock().insert(url.into(), Arc::clone(&remote));
        remote
    }

    pub fn remote(&self, url: &str) -> Option<Arc<MemoryRemote>> {
        self.lock().get(url).cloned()
    }

    fn lookup(&self, url: &str) -> Result<Arc<MemoryRemote>> {
        self.remote(url).ok_or_else(|| {
            Error::transport(format!(
                "repository not found: {}",
                LogConfig::new().redact_url(url)
            ))
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn discover(
        &self,
        url: &str,
        service: Service,
        auth: Option<&BasicAuth>,
    ) -> Result<RefAdvertisement> {
        let remote = self.lookup(url)?;
        if service == Service::ReceivePack {
            remote.authorize(auth)?;
        }
        Ok(remote.advertise())
    }

    async fn fetch(
        &self,
        url: &str,
        wants: &[ObjectId],
        _auth: Option<&BasicAuth>,
    ) -> Result<Vec<u8>> {
        self.lookup(url)?.upload_pack(wants)
    }

    async fn push(
        &self,
        url: &str,
        update: &RefUpdate,
        pack: Vec<u8>,
        auth: Option<&BasicAuth>,
    ) -> Result<()> {
        let remote = self.lookup(url)?;
        remote.authorize(auth)?;
        remote.receive_pack(update, &pack)
    }
}

struct RemoteState {
    objects: HashMap<ObjectId, RawObject>,
    refs: BTreeMap<String, ObjectId>,
    head: String,
}

/// A bare repository living in memory.
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    credentials: Option<BasicAuth>,
}

impl MemoryRemote {
    /// An empty remote whose HEAD points at `default_branch`.
    pub fn new(default_branch: &str) -> Self {
        Self {
            state: Mutex::new(RemoteState {
                objects: HashMap::new(),
                refs: BTreeMap::new(),
                head: format!("refs/heads/{}", default_branch),
            }),
            credentials: None,
        }
    }

    /// Require these credentials for pushes.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(BasicAuth::new(username, password));
        self
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit `files` on top of `branch`, replacing the whole tree.
    pub fn commit_files(&self, branch: &str, files: &[(&str, &[u8])], message: &str) -> ObjectId {
        let mut state = self.lock();
        let mut index = Index::new();
        for (path, content) in files {
            let blob = RawObject::blob(content.to_vec());
            index.insert(
                *path,
                IndexEntry {
                    mode: MODE_FILE,
                    id: blob.id(),
                },
            );
            state.objects.insert(blob.id(), blob);
        }

        let mut trees = Vec::new();
        let tree = TreeBuilder::from_index(&index).build(&mut trees);
        for object in trees {
            state.objects.insert(object.id(), object);
        }

        let name = format!("refs/heads/{}", branch);
        let author = Signature {
            name: "Remote".into(),
            email: "remote@example.com".into(),
            when: 1_700_000_000,
            offset_minutes: 0,
        };
        let commit = Commit {
            tree,
            parents: state.refs.get(&name).copied().into_iter().collect(),
            committer: author.clone(),
            author,
            message: format!("{}\n", message.trim_end()),
        }
        .encode();
        let id = commit.id();
        state.objects.insert(id, commit);
        state.refs.insert(name, id);
        id
    }

    /// Tip of `branch`.
    pub fn branch(&self, branch: &str) -> Option<ObjectId> {
        self.lock().refs.get(&format!("refs/heads/{}", branch)).copied()
    }

    pub fn has_object(&self, id: &ObjectId) -> bool {
        self.lock().objects.contains_key(id)
    }

    /// Commit message of `id`, if it is a commit held by this remote.
    pub fn commit_message(&self, id: &ObjectId) -> Option<String> {
        let state = self.lock();
        let object = state.objects.get(id)?;
        Commit::parse(object).ok().map(|c| c.message)
    }

    fn authorize(&self, auth: Option<&BasicAuth>) -> Result<()> {
        match (&self.credentials, auth) {
            (None, _) => Ok(()),
            (Some(_), None) => Err(Error::transport("authentication required")),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            (Some(_), Some(_)) => Err(Error::transport("authorization failed")),
        }
    }

    fn advertise(&self) -> RefAdvertisement {
        let state = self.lock();
        let mut refs = state.refs.clone();
        let head = if let Some(id) = refs.get(&state.head).copied() {
            refs.insert("HEAD".to_string(), id);
            Some(state.head.clone())
        } else {
            None
        };
        RefAdvertisement {
            refs,
            head,
            capabilities: vec!["report-status".to_string(), "ofs-delta".to_string()],
        }
    }

    fn upload_pack(&self, wants: &[ObjectId]) -> Result<Vec<u8>> {
        let state = self.lock();
        let mut seen = HashSet::new();
        let mut pending: Vec<ObjectId> = wants.to_vec();
        let mut objects = Vec::new();

        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            let object = state
                .objects
                .get(&id)
                .ok_or_else(|| Error::transport(format!("upload-pack: not our ref {}", id)))?;
            match object.kind {
                ObjectKind::Commit => {
                    let commit = Commit::parse(object)?;
                    pending.push(commit.tree);
                    pending.extend(commit.parents);
                }
                ObjectKind::Tree => {
                    let tree = Tree::parse(object)?;
                    pending.extend(
                        tree.entries
                            .iter()
                            .filter(|e| e.mode != crate::git::object::MODE_GITLINK)
                            .map(|e| e.id),
                    );
                }
                ObjectKind::Blob | ObjectKind::Tag => {}
            }
            objects.push(object.clone());
        }

        pack::encode(&objects)
    }

    fn receive_pack(&self, update: &RefUpdate, data: &[u8]) -> Result<()> {
        let objects = pack::decode(data)?;
        let mut state = self.lock();

        let current = state.refs.get(&update.name).copied().unwrap_or(ObjectId::ZERO);
        if current != update.old {
            return Err(Error::transport(format!(
                "failed to update ref {}: fetch first",
                update.name
            )));
        }
        if update.new.is_zero() {
            return Err(Error::transport("ref deletion is not supported"));
        }

        for object in objects {
            state.objects.insert(object.id(), object);
        }
        if !state.objects.contains_key(&update.new) {
            return Err(Error::transport(format!(
                "failed to update ref {}: missing object {}",
                update.name, update.new
            )));
        }
        state.refs.insert(update.name.clone(), update.new);
        Ok(())
    }
}
