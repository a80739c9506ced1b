//! Git configuration for Gitkit.
//!
//! Commit identity is not configured here: every push supplies its own
//! author. This holds what stays fixed for a context: the branch a fresh
//! repository starts on, which remotes may be contacted, and how the
//! client identifies itself over HTTP.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::logging::LogConfig;

/// Branch used when a remote does not advertise its HEAD.
pub const DEFAULT_BRANCH: &str = "master";

/// User agent sent by the HTTP transport.
pub const DEFAULT_USER_AGENT: &str = concat!("gitkit/", env!("CARGO_PKG_VERSION"));

/// Git configuration.
///
/// # Example
///
/// ```rust
/// use gitkit::git::GitConfig;
///
/// let config = GitConfig::new()
///     .default_branch("main")
///     .allow_remote("https://github.com/myorg/");
/// ```
///
/// An empty allowlist allows every remote. Adding a pattern restricts
/// clone and push to URLs starting with one of the patterns.
#[derive(Debug, Clone)]
pub struct GitConfig {
    pub(crate) default_branch: String,
    pub(crate) remote_allowlist: BTreeSet<String>,
    pub(crate) user_agent: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
            remote_allowlist: BTreeSet::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl GitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the branch checked out when the remote HEAD is unknown.
    pub fn default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Add a remote URL prefix to the allowlist.
    pub fn allow_remote(mut self, pattern: impl Into<String>) -> Self {
        self.remote_allowlist.insert(pattern.into());
        self
    }

    /// Add multiple remote URL prefixes to the allowlist.
    pub fn allow_remotes(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for pattern in patterns {
            self.remote_allowlist.insert(pattern.into());
        }
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn branch(&self) -> &str {
        &self.default_branch
    }

    pub fn agent(&self) -> &str {
        &self.user_agent
    }

    /// Check a remote URL against the allowlist.
    ///
    /// The URL in the error message is redacted so credentials embedded in
    /// it never reach the host.
    pub(crate) fn is_url_allowed(&self, url: &str) -> Result<()> {
        if self.remote_allowlist.is_empty()
            || self
                .remote_allowlist
                .iter()
                .any(|pattern| url.starts_with(pattern.as_str()))
        {
            return Ok(());
        }

        Err(Error::transport(format!(
            "remote URL '{}' is not in allowlist",
            LogConfig::new().redact_url(url)
        )))
    }
}
