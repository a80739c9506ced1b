//! File operations exposed to the host.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fs::{FileHandle, FileSystem};
use crate::logging::LogConfig;

/// Value a successful `createFile` / `writeNewFile` resolves with.
pub const FILE_CREATED: &str = "File created";

/// Create, write and list files on the context's filesystem.
///
/// Paths are used as given: relative paths resolve against `/`, not
/// against the repository root.
#[derive(Clone)]
pub struct FileOps {
    fs: Arc<dyn FileSystem>,
    log: LogConfig,
}

impl FileOps {
    pub fn new(fs: Arc<dyn FileSystem>, log: LogConfig) -> Self {
        Self { fs, log }
    }

    /// Create an empty file. Fails if `path` already exists.
    ///
    /// Every failure surfaces as [`Error::FileNotCreated`]; the underlying
    /// error is its source.
    pub async fn create_file(&self, path: &str) -> Result<&'static str> {
        match FileHandle::create_new(Arc::clone(&self.fs), path).await {
            Ok(_) => {
                #[cfg(feature = "logging")]
                tracing::debug!(path = %self.log.redact_value(path), "file created");
                Ok(FILE_CREATED)
            }
            Err(e) => {
                #[cfg(feature = "logging")]
                tracing::debug!(
                    path = %self.log.redact_value(path),
                    error = %e,
                    "file not created"
                );
                Err(Error::FileNotCreated(Box::new(e)))
            }
        }
    }

    /// Create or truncate `path` and write `content` as its full content.
    pub async fn write_new_file(&self, path: &str, content: &str) -> Result<&'static str> {
        let mut handle = FileHandle::create(Arc::clone(&self.fs), path).await?;
        handle.write(content.as_bytes()).await?;

        #[cfg(feature = "logging")]
        tracing::debug!(
            path = %self.log.redact_value(path),
            content = %self.log.format_content(content),
            "file written"
        );

        Ok(FILE_CREATED)
    }

    /// Names of the entries of a directory, sorted.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let entries = self.fs.read_dir(Path::new(path)).await?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.fs.read_file(Path::new(path)).await
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log
    }
}
