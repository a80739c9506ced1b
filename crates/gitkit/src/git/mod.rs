//! Git engine over the virtual filesystem.
//!
//! Objects use git's canonical encoding and SHA-1 ids, so repositories
//! cloned here interoperate with any git server. The on-disk layout under
//! `.git` is git-compatible except for the index, which is a text file.
//!
//! # Example
//!
//! ```rust
//! use gitkit::git::{MemoryRemote, MemoryTransport};
//!
//! let transport = MemoryTransport::new();
//! let remote = transport.register("mem://demo", MemoryRemote::new("main"));
//! remote.commit_files("main", &[("README.md", b"hello\n")], "init");
//! assert!(remote.branch("main").is_some());
//! ```

mod cache;
mod config;
mod index;
mod object;
pub mod pack;
mod repository;
mod storage;
mod transport;
mod worktree;

pub use cache::{DEFAULT_CACHE_BYTES, ObjectCache};
pub use config::{DEFAULT_BRANCH, DEFAULT_USER_AGENT, GitConfig};
pub use index::{Index, IndexEntry};
pub use object::{
    Commit, MODE_EXECUTABLE, MODE_FILE, MODE_GITLINK, MODE_SYMLINK, MODE_TREE, ObjectId,
    ObjectKind, RawObject, Signature, Tree, TreeEntry,
};
pub use repository::{ORIGIN, Repository};
pub use storage::{Head, Storage};
pub use transport::{
    BasicAuth, MemoryRemote, MemoryTransport, NoTransport, RefAdvertisement, RefUpdate, Service,
    Transport, pktline,
};
pub use worktree::Worktree;

#[cfg(feature = "http_client")]
pub use transport::HttpTransport;
