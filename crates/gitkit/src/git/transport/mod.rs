//! Remote transports.
//!
//! A [`Transport`] moves refs and packs between a local repository and a
//! remote identified by URL. The engine drives the negotiation; transports
//! only carry bytes:
//!
//! - [`MemoryTransport`]: in-process remotes, used for tests and for hosts
//!   without network access
//! - `HttpTransport`: git smart HTTP (feature `http_client`)
//! - [`NoTransport`]: refuses every request

mod memory;
pub mod pktline;

#[cfg(feature = "http_client")]
mod http;

pub use memory::{MemoryRemote, MemoryTransport};

#[cfg(feature = "http_client")]
pub use http::HttpTransport;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use super::object::ObjectId;
use crate::error::{Error, Result};

/// Git service requested from a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Fetch side (`git-upload-pack`)
    UploadPack,
    /// Push side (`git-receive-pack`)
    ReceivePack,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }
}

/// HTTP basic credentials. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Refs advertised by a remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefAdvertisement {
    /// Full ref name (`refs/heads/main`, `HEAD`) to id
    pub refs: BTreeMap<String, ObjectId>,
    /// Target of the remote's symbolic HEAD, when advertised
    pub head: Option<String>,
    pub capabilities: Vec<String>,
}

impl RefAdvertisement {
    /// True when the remote has no commits at all.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<ObjectId> {
        self.refs.get(name).copied()
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }

    /// Branch the remote HEAD points at.
    ///
    /// Without a symref capability, falls back to the first branch whose
    /// id matches `HEAD`.
    pub fn head_branch(&self) -> Option<String> {
        if let Some(branch) = self
            .head
            .as_deref()
            .and_then(|h| h.strip_prefix("refs/heads/"))
        {
            return Some(branch.to_string());
        }
        let head = self.get("HEAD")?;
        self.refs.iter().find_map(|(name, id)| {
            name.strip_prefix("refs/heads/")
                .filter(|_| *id == head)
                .map(str::to_string)
        })
    }

    /// Branches as `(short name, id)`.
    pub fn branches(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.refs
            .iter()
            .filter_map(|(name, id)| name.strip_prefix("refs/heads/").map(|b| (b, *id)))
    }

    /// Parse the pkt-line advertisement of `git-upload-pack` or
    /// `git-receive-pack`, with or without the smart-HTTP service preamble.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = pktline::Reader::new(data);
        let mut adv = Self::default();
        let mut first = true;

        while let Some(packet) = reader.next_packet()? {
            let Some(line) = packet.text() else {
                if first {
                    continue;
                }
                break;
            };
            if line.starts_with("# service=") {
                continue;
            }

            let (refline, caps) = match line.split_once('\0') {
                Some((r, c)) => (r, Some(c)),
                None => (line, None),
            };
            if let Some(caps) = caps {
                adv.capabilities = caps.split_whitespace().map(str::to_string).collect();
                adv.head = adv
                    .capabilities
                    .iter()
                    .find_map(|c| c.strip_prefix("symref=HEAD:"))
                    .map(str::to_string);
            }
            first = false;

            let (id, name) = refline
                .split_once(' ')
                .ok_or_else(|| Error::transport(format!("malformed ref line {:?}", refline)))?;
            // Empty repositories advertise a zero id for a placeholder ref
            if name == "capabilities^{}" || name.ends_with("^{}") {
                continue;
            }
            adv.refs.insert(name.to_string(), ObjectId::from_hex(id)?);
        }

        Ok(adv)
    }
}

/// A requested ref change on the remote. `old` is zero for a new ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub old: ObjectId,
    pub new: ObjectId,
}

/// Byte-level access to remotes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// List the remote's refs for `service`.
    async fn discover(
        &self,
        url: &str,
        service: Service,
        auth: Option<&BasicAuth>,
    ) -> Result<RefAdvertisement>;

    /// Request a pack holding `wants` and everything reachable from them.
    async fn fetch(
        &self,
        url: &str,
        wants: &[ObjectId],
        auth: Option<&BasicAuth>,
    ) -> Result<Vec<u8>>;

    /// Send `pack` and ask the remote to apply `update`.
    async fn push(
        &self,
        url: &str,
        update: &RefUpdate,
        pack: Vec<u8>,
        auth: Option<&BasicAuth>,
    ) -> Result<()>;
}

/// Transport used when no network access is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransport;

#[async_trait]
impl Transport for NoTransport {
    async fn discover(
        &self,
        _url: &str,
        _service: Service,
        _auth: Option<&BasicAuth>,
    ) -> Result<RefAdvertisement> {
        Err(Error::transport(
            "network operations not supported in sandbox mode",
        ))
    }

    async fn fetch(
        &self,
        _url: &str,
        _wants: &[ObjectId],
        _auth: Option<&BasicAuth>,
    ) -> Result<Vec<u8>> {
        Err(Error::transport(
            "network operations not supported in sandbox mode",
        ))
    }

    async fn push(
        &self,
        _url: &str,
        _update: &RefUpdate,
        _pack: Vec<u8>,
        _auth: Option<&BasicAuth>,
    ) -> Result<()> {
        Err(Error::transport(
            "network operations not supported in sandbox mode",
        ))
    }
}
