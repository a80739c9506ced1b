//! Virtual filesystem for Gitkit
//!
//! Provides an async filesystem trait and implementations:
//! - `InMemoryFs`: in-memory hierarchical byte store
//! - `ChrootFs`: view of a sub-tree, used to bind worktree and `.git`
//! - `FileHandle`: writable handle returned by create

mod chroot;
mod file;
mod memory;
mod traits;

pub use chroot::ChrootFs;
pub use file::FileHandle;
pub use memory::InMemoryFs;
pub use traits::{DirEntry, FileSystem, FileType, Metadata};
