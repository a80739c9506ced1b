//! Repository session: the one repository a context works on.
//!
//! A session owns the storage handle (bound to `<location>/.git`) and the
//! worktree handle (bound to `<location>`) and runs the multi-step clone
//! and push flows on top of them.
//!
//! Multi-step operations are not serialized. Two pushes racing on the same
//! session interleave their filesystem writes; callers must not issue
//! concurrent mutating calls against one session.
//!
//! A push whose transport step fails keeps its staged file and its new
//! local commit. Nothing is rolled back.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::fs::{ChrootFs, FileSystem};
use crate::git::{
    BasicAuth, Commit, GitConfig, ObjectCache, ObjectId, Repository, Signature, Storage, Transport,
};
use crate::logging::LogConfig;

/// Default repository root inside the virtual filesystem.
pub const DEFAULT_REPO_LOCATION: &str = "/repo";

/// Where the repository lives: the worktree root and its `.git` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLocation {
    root: PathBuf,
}

impl Default for RepositoryLocation {
    fn default() -> Self {
        Self::new(DEFAULT_REPO_LOCATION)
    }
}

impl RepositoryLocation {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: crate::fs::InMemoryFs::normalize_path(root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Always `root/.git`.
    pub fn git_dir(&self) -> PathBuf {
        self.root.join(".git")
    }
}

/// Progress of the session through clone/open and push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Cloned,
    Opened,
    Staged,
    Committed,
    Pushed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Cloned => "cloned",
            SessionState::Opened => "opened",
            SessionState::Staged => "staged",
            SessionState::Committed => "committed",
            SessionState::Pushed => "pushed",
        };
        f.write_str(name)
    }
}

/// Arguments of a push, in host order.
#[derive(Clone)]
pub struct PushRequest {
    pub url: String,
    pub access_token: String,
    pub username: String,
    pub email: String,
    /// Worktree-relative path to stage
    pub file: String,
    pub commit_message: String,
}

impl fmt::Debug for PushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRequest")
            .field("url", &LogConfig::new().redact_url(&self.url))
            .field("access_token", &"[REDACTED]")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("file", &self.file)
            .field("commit_message", &self.commit_message)
            .finish()
    }
}

/// One repository's storage and worktree within a filesystem.
pub struct RepositorySession {
    location: RepositoryLocation,
    storage: Arc<Storage>,
    root: ChrootFs,
    transport: Arc<dyn Transport>,
    git: GitConfig,
    log: LogConfig,
    state: Mutex<SessionState>,
}

impl RepositorySession {
    /// Bind a session to `location` of `fs`. Never fails; an unusable
    /// location surfaces on first use.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        location: RepositoryLocation,
        cache: ObjectCache,
        transport: Arc<dyn Transport>,
        git: GitConfig,
        log: LogConfig,
    ) -> Self {
        let root = ChrootFs::new(fs, location.root());
        let storage = Arc::new(Storage::new(root.chroot(".git"), cache));
        Self {
            location,
            storage,
            root,
            transport,
            git,
            log,
            state: Mutex::new(SessionState::Uninitialized),
        }
    }

    pub fn location(&self) -> &RepositoryLocation {
        &self.location
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Clone `url` into the session's location.
    ///
    /// Only valid on an uninitialized session. On failure the session
    /// stays uninitialized; objects fetched before the failure are left in
    /// storage.
    pub async fn clone_repo(&self, url: &str) -> Result<()> {
        let state = self.state();
        if state != SessionState::Uninitialized {
            return Err(crate::Error::state(format!(
                "repository already exists (session is {})",
                state
            )));
        }

        #[cfg(feature = "logging")]
        tracing::info!(
            url = %self.log.redact_url(url),
            location = %self.location.root().display(),
            "cloning repository"
        );

        Repository::clone_into(
            Arc::clone(&self.storage),
            self.root.clone(),
            self.transport.as_ref(),
            &self.git,
            url,
            None,
        )
        .await?;
        self.set_state(SessionState::Cloned);

        #[cfg(feature = "logging")]
        tracing::info!(url = %self.log.redact_url(url), "repository cloned");

        Ok(())
    }

    /// Open the repository already present at the session's location.
    pub async fn open(&self) -> Result<Repository> {
        let repo = Repository::open(Arc::clone(&self.storage), self.root.clone()).await?;
        self.set_state(SessionState::Opened);

        #[cfg(feature = "logging")]
        tracing::debug!(location = %self.location.root().display(), "repository opened");

        Ok(repo)
    }

    /// Stage `request.file`, commit it and push the current branch.
    ///
    /// The repository is re-opened on every call. Each step's error is
    /// returned as-is; earlier steps are not undone.
    pub async fn push(&self, request: &PushRequest) -> Result<ObjectId> {
        #[cfg(feature = "logging")]
        tracing::info!(
            url = %self.log.redact_url(&request.url),
            token = %self.log.redact_secret(&request.access_token),
            file = %self.log.redact_value(&request.file),
            "pushing"
        );

        let repo = self.open().await?;
        let worktree = repo.worktree();

        worktree.add(&request.file).await?;
        self.set_state(SessionState::Staged);

        let signature = Signature::now(&request.username, &request.email);
        let commit = worktree
            .commit(&request.commit_message, signature.clone(), signature)
            .await?;
        self.set_state(SessionState::Committed);

        let auth = BasicAuth::new(&request.username, &request.access_token);
        repo.push(self.transport.as_ref(), &self.git, &request.url, Some(&auth))
            .await?;
        self.set_state(SessionState::Pushed);

        #[cfg(feature = "logging")]
        tracing::info!(commit = %commit.short(), "pushed");

        Ok(commit)
    }

    /// First-parent history of HEAD, newest first.
    pub async fn log(&self) -> Result<Vec<(ObjectId, Commit)>> {
        Repository::open(Arc::clone(&self.storage), self.root.clone())
            .await?
            .log()
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::git::{MemoryRemote, MemoryTransport, NoTransport};

    const URL: &str = "mem://origin";

    fn session(transport: Arc<dyn Transport>) -> (Arc<dyn FileSystem>, RepositorySession) {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let session = RepositorySession::new(
            Arc::clone(&fs),
            RepositoryLocation::default(),
            ObjectCache::default(),
            transport,
            GitConfig::new(),
            LogConfig::new(),
        );
        (fs, session)
    }

    fn request(file: &str) -> PushRequest {
        PushRequest {
            url: URL.to_string(),
            access_token: "ghp_token".to_string(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            file: file.to_string(),
            commit_message: "update".to_string(),
        }
    }

    #[test]
    fn test_location() {
        let location = RepositoryLocation::new("/work/../repo/");
        assert_eq!(location.root(), Path::new("/repo"));
        assert_eq!(location.git_dir(), PathBuf::from("/repo/.git"));
    }

    #[test]
    fn test_push_request_debug_hides_token() {
        let debug = format!("{:?}", request("a.txt"));
        assert!(!debug.contains("ghp_token"));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let transport = MemoryTransport::new();
        let remote = transport.register(URL, MemoryRemote::new("master"));
        remote.commit_files("master", &[("README", b"hi")], "init");
        let (fs, session) = session(Arc::new(transport));

        assert_eq!(session.state(), SessionState::Uninitialized);
        session.clone_repo(URL).await.unwrap();
        assert_eq!(session.state(), SessionState::Cloned);

        fs.write_file(Path::new("/repo/new.txt"), b"new").await.unwrap();
        session.push(&request("new.txt")).await.unwrap();
        assert_eq!(session.state(), SessionState::Pushed);
        assert_eq!(session.log().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clone_requires_uninitialized() {
        let transport = MemoryTransport::new();
        transport
            .register(URL, MemoryRemote::new("master"))
            .commit_files("master", &[("README", b"hi")], "init");
        let (_, session) = session(Arc::new(transport));

        session.clone_repo(URL).await.unwrap();
        let err = session.clone_repo(URL).await.unwrap_err();
        assert!(err.to_string().starts_with("repository already exists"));
    }

    #[tokio::test]
    async fn test_failed_clone_stays_uninitialized() {
        let (_, session) = session(Arc::new(NoTransport));
        assert!(session.clone_repo(URL).await.is_err());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_push_before_clone() {
        let (_, session) = session(Arc::new(NoTransport));
        let err = session.push(&request("a.txt")).await.unwrap_err();
        assert_eq!(err.to_string(), "repository does not exist");
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}
