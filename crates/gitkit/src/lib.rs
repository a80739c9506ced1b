//! Gitkit - Embedded git client over a virtual filesystem
//!
//! A [`GitKit`] context owns an in-memory filesystem, one repository
//! session and an async call bridge. Every operation returns a
//! [`PendingCall`] right away and settles it exactly once, from a
//! background tokio task.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gitkit::GitKit;
//! use gitkit::git::{MemoryRemote, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = MemoryTransport::new();
//!     transport
//!         .register("mem://docs", MemoryRemote::new("master"))
//!         .commit_files("master", &[("README.md", b"# docs\n")], "init");
//!
//!     let kit = GitKit::builder().transport(Arc::new(transport)).build();
//!     assert_eq!(kit.clone_repo("mem://docs").await?.as_text(), Some("Repo cloned"));
//!
//!     let entries = kit.list_dir("/repo").await?;
//!     assert!(entries.as_list().unwrap().contains(&"README.md".to_string()));
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `logging` (default): structured `tracing` events with secret redaction
//! - `http_client`: smart-HTTP transport for real git servers

mod bridge;
pub mod cipher;
mod dispatch;
mod error;
mod files;
pub mod fs;
pub mod git;
mod logging;
mod session;

pub use bridge::{Bridge, CallValue, Outcome, PendingCall, Rejection, Resolver};
pub use dispatch::Operation;
pub use error::{CipherError, Error, PathError, Result};
pub use files::{FILE_CREATED, FileOps};
pub use logging::{LogConfig, sanitize_for_log};
pub use session::{
    DEFAULT_REPO_LOCATION, PushRequest, RepositoryLocation, RepositorySession, SessionState,
};

use std::sync::Arc;
use tokio::runtime::Handle;

use fs::{FileSystem, InMemoryFs};
use git::{GitConfig, NoTransport, ObjectCache, Transport};

/// Value a successful clone resolves with.
pub const REPO_CLONED: &str = "Repo cloned";

/// Value a successful push resolves with.
pub const PUSHED: &str = "Pushed";

/// Main entry point for Gitkit.
///
/// Contexts are independent: each has its own filesystem and session, so
/// tests and tenants can run side by side in one process.
pub struct GitKit {
    fs: Arc<dyn FileSystem>,
    session: Arc<RepositorySession>,
    files: FileOps,
    bridge: Bridge,
}

impl Default for GitKit {
    fn default() -> Self {
        Self::new()
    }
}

impl GitKit {
    /// Create a context with an empty in-memory filesystem and default
    /// settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a GitKitBuilder for customized configuration.
    pub fn builder() -> GitKitBuilder {
        GitKitBuilder::default()
    }

    pub fn fs(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.fs)
    }

    pub fn session(&self) -> &RepositorySession {
        &self.session
    }

    pub fn files(&self) -> &FileOps {
        &self.files
    }

    /// Clone `url` into the repository location. Resolves with
    /// [`REPO_CLONED`].
    pub fn clone_repo(&self, url: &str) -> PendingCall {
        let session = Arc::clone(&self.session);
        let url = url.to_string();
        self.bridge.spawn(Operation::Clone.name(), async move {
            session.clone_repo(&url).await?;
            Ok(REPO_CLONED)
        })
    }

    /// Stage, commit and push one file. Resolves with [`PUSHED`] once the
    /// remote accepted the update.
    pub fn push(&self, request: PushRequest) -> PendingCall {
        let session = Arc::clone(&self.session);
        self.bridge.spawn(Operation::Push.name(), async move {
            session.push(&request).await?;
            Ok(PUSHED)
        })
    }

    pub fn create_file(&self, path: &str) -> PendingCall {
        let files = self.files.clone();
        let path = path.to_string();
        self.bridge.spawn(Operation::CreateFile.name(), async move {
            files.create_file(&path).await
        })
    }

    pub fn write_new_file(&self, path: &str, content: &str) -> PendingCall {
        let files = self.files.clone();
        let (path, content) = (path.to_string(), content.to_string());
        self.bridge.spawn(Operation::WriteNewFile.name(), async move {
            files.write_new_file(&path, &content).await
        })
    }

    pub fn list_dir(&self, path: &str) -> PendingCall {
        let files = self.files.clone();
        let path = path.to_string();
        self.bridge.spawn(Operation::ListDir.name(), async move {
            files.list_dir(&path).await
        })
    }

    /// Encrypt with the key-derived AES-CTR stream. See [`cipher`].
    pub fn encrypt(&self, plaintext: &str, hex_key: &str) -> PendingCall {
        let (plaintext, hex_key) = (plaintext.to_string(), hex_key.to_string());
        self.bridge.spawn(Operation::Encrypt.name(), async move {
            Ok(cipher::encrypt(&plaintext, &hex_key)?)
        })
    }

    pub fn decrypt(&self, hex_ciphertext: &str, hex_key: &str) -> PendingCall {
        let (ciphertext, hex_key) = (hex_ciphertext.to_string(), hex_key.to_string());
        self.bridge.spawn(Operation::Decrypt.name(), async move {
            Ok(cipher::decrypt(&ciphertext, &hex_key)?)
        })
    }
}

/// Builder for customized GitKit configuration.
#[derive(Default)]
pub struct GitKitBuilder {
    fs: Option<Arc<dyn FileSystem>>,
    location: Option<RepositoryLocation>,
    git: GitConfig,
    log: LogConfig,
    transport: Option<Arc<dyn Transport>>,
    cache_bytes: Option<usize>,
    runtime: Option<Handle>,
}

impl GitKitBuilder {
    /// Set a custom filesystem.
    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Set the repository root. Defaults to [`DEFAULT_REPO_LOCATION`].
    pub fn repo_location(mut self, root: impl AsRef<std::path::Path>) -> Self {
        self.location = Some(RepositoryLocation::new(root));
        self
    }

    pub fn git_config(mut self, config: GitConfig) -> Self {
        self.git = config;
        self
    }

    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log = config;
        self
    }

    /// Set the transport used to reach remotes.
    ///
    /// Defaults to the HTTP transport when the `http_client` feature is
    /// enabled, and to a transport that refuses all network access
    /// otherwise.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Byte budget of the decoded object cache.
    pub fn cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = Some(bytes);
        self
    }

    /// Run calls on `handle` instead of the runtime current at call time.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the GitKit instance.
    pub fn build(self) -> GitKit {
        let fs = self.fs.unwrap_or_else(|| Arc::new(InMemoryFs::new()));
        let cache = self
            .cache_bytes
            .map(ObjectCache::new)
            .unwrap_or_default();
        let transport = self
            .transport
            .unwrap_or_else(|| default_transport(&self.git));

        let session = RepositorySession::new(
            Arc::clone(&fs),
            self.location.unwrap_or_default(),
            cache,
            transport,
            self.git,
            self.log.clone(),
        );
        let bridge = match self.runtime {
            Some(handle) => Bridge::with_handle(handle),
            None => Bridge::new(),
        };

        GitKit {
            files: FileOps::new(Arc::clone(&fs), self.log),
            session: Arc::new(session),
            fs,
            bridge,
        }
    }
}

#[cfg(feature = "http_client")]
fn default_transport(config: &GitConfig) -> Arc<dyn Transport> {
    match git::HttpTransport::new(config) {
        Ok(transport) => Arc::new(transport),
        Err(_e) => {
            #[cfg(feature = "logging")]
            tracing::warn!(error = %_e, "http transport unavailable, network disabled");
            Arc::new(NoTransport)
        }
    }
}

#[cfg(not(feature = "http_client"))]
fn default_transport(_config: &GitConfig) -> Arc<dyn Transport> {
    Arc::new(NoTransport)
}
