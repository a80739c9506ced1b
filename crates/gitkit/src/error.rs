//! Error types for Gitkit
//!
//! Every error in this crate ends up as the message of exactly one rejected
//! [`PendingCall`](crate::PendingCall), so messages are written for the host:
//! - Human-readable, no stack traces or internal addresses
//! - Never carry access tokens or key material
//! - Categorized so embedders can still match programmatically

use thiserror::Error;

/// Result type alias using Gitkit's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Gitkit error types.
#[derive(Error, Debug)]
pub enum Error {
    /// A positional argument was not supplied by the host.
    #[error("missing argument: {0}")]
    ArgumentMissing(&'static str),

    /// The host named an operation the dispatcher does not know.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Virtual filesystem path error.
    #[error(transparent)]
    Path(#[from] PathError),

    /// `createFile` failed. The host only sees the fixed message; the cause
    /// is kept for logs and programmatic inspection.
    #[error("file not created")]
    FileNotCreated(#[source] Box<Error>),

    /// Operation attempted on a repository that is not in the required state.
    #[error("{0}")]
    RepositoryState(String),

    /// Network or authentication failure while talking to a remote.
    #[error("{0}")]
    Transport(String),

    /// Key or ciphertext could not be decoded, or the key has the wrong size.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// A git object is missing or malformed.
    #[error("object error: {0}")]
    Object(String),

    /// I/O error from compression or encoding.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error for unexpected failures.
    ///
    /// Used for recovered panics in background tasks and for states that
    /// indicate a bug. The message never includes panic payloads.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::RepositoryState(message.into())
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn object(message: impl Into<String>) -> Self {
        Self::Object(message.into())
    }
}

/// Path errors raised by the virtual filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("file does not exist: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

/// Stream cipher input errors.
///
/// Each decode/construct step has its own message so the host can tell
/// which input was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CipherError {
    #[error("invalid key encoding: {0}")]
    KeyHex(hex::FromHexError),

    #[error("invalid ciphertext encoding: {0}")]
    CiphertextHex(hex::FromHexError),

    #[error("invalid key size {0}: expected 16, 24 or 32 bytes")]
    KeyLength(usize),
}
