//! Git smart HTTP transport (protocol v0).
//!
//! - `GET  <url>/info/refs?service=<svc>`: ref advertisement
//! - `POST <url>/git-upload-pack`: want/done negotiation, pack in response
//! - `POST <url>/git-receive-pack`: ref update + pack, report-status back
//!
//! Side-band is never requested, so the pack follows the negotiation
//! packets as raw bytes.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::Once;
use std::time::Duration;

use super::{BasicAuth, RefAdvertisement, RefUpdate, Service, Transport, pktline};
use crate::error::{Error, Result};
use crate::git::config::GitConfig;
use crate::git::object::ObjectId;
use crate::logging::LogConfig;

/// Default maximum response body size (512 MiB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 512 * 1024 * 1024;

/// Default request timeout (120 seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

// reqwest is built with `rustls-no-provider`; install ring once per process.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Smart HTTP transport.
pub struct HttpTransport {
    client: Client,
    user_agent: String,
    max_response_bytes: usize,
}

impl HttpTransport {
    pub fn new(config: &GitConfig) -> Result<Self> {
        Self::with_config(
            config,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_MAX_RESPONSE_BYTES,
        )
    }

    pub fn with_config(
        config: &GitConfig,
        timeout: Duration,
        max_response_bytes: usize,
    ) -> Result<Self> {
        install_crypto_provider();

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.agent())
            // Redirects could leave the allowlisted host
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: config.agent().to_string(),
            max_response_bytes,
        })
    }

    fn endpoint(url: &str, suffix: &str) -> Result<String> {
        let parsed = url::Url::parse(url).map_err(|e| {
            Error::transport(format!(
                "invalid URL '{}': {}",
                LogConfig::new().redact_url(url),
                e
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::transport(format!(
                "unsupported URL scheme '{}': only http and https are supported",
                parsed.scheme()
            )));
        }
        Ok(format!("{}/{}", url.trim_end_matches('/'), suffix))
    }

    fn with_auth(request: RequestBuilder, auth: Option<&BasicAuth>) -> RequestBuilder {
        match auth {
            Some(auth) => request.basic_auth(&auth.username, Some(&auth.password)),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = request.send().await.map_err(|e| {
            // reqwest errors embed the URL, which may carry credentials
            Error::transport(format!(
                "request to {} failed: {}",
                LogConfig::new().redact_url(url),
                e.without_url()
            ))
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(Error::transport("authentication required")),
            StatusCode::FORBIDDEN => return Err(Error::transport("authorization failed")),
            StatusCode::NOT_FOUND => {
                return Err(Error::transport(format!(
                    "repository not found: {}",
                    LogConfig::new().redact_url(url)
                )));
            }
            status => {
                return Err(Error::transport(format!(
                    "unexpected HTTP status {}",
                    status.as_u16()
                )));
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_bytes {
                return Err(Error::transport(format!(
                    "response too large: {} bytes (max: {} bytes)",
                    len, self.max_response_bytes
                )));
            }
        }

        let mut response = response;
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::transport(format!("failed to read response: {}", e.without_url())))?
        {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(Error::transport(format!(
                    "response too large: exceeded {} bytes limit",
                    self.max_response_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn discover(
        &self,
        url: &str,
        service: Service,
        auth: Option<&BasicAuth>,
    ) -> Result<RefAdvertisement> {
        let endpoint = Self::endpoint(url, &format!("info/refs?service={}", service.as_str()))?;
        let request = Self::with_auth(self.client.get(&endpoint), auth);
        let body = self.send(url, request).await?;

        #[cfg(feature = "logging")]
        tracing::trace!(service = service.as_str(), bytes = body.len(), "ref advertisement");

        RefAdvertisement::parse(&body)
    }

    async fn fetch(
        &self,
        url: &str,
        wants: &[ObjectId],
        auth: Option<&BasicAuth>,
    ) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for (i, want) in wants.iter().enumerate() {
            if i == 0 {
                let line = format!("want {} ofs-delta no-progress agent={}", want, self.user_agent);
                pktline::write_line(&mut body, &line);
            } else {
                pktline::write_line(&mut body, &format!("want {}", want));
            }
        }
        pktline::flush(&mut body);
        pktline::write_line(&mut body, "done");

        let endpoint = Self::endpoint(url, Service::UploadPack.as_str())?;
        let request = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/x-git-upload-pack-request")
            .header("Accept", "application/x-git-upload-pack-result")
            .body(body);
        let response = self.send(url, Self::with_auth(request, auth)).await?;

        let mut reader = pktline::Reader::new(&response);
        while !reader.peek_raw(b"PACK") {
            match reader.next_packet()? {
                None => return Err(Error::transport("remote sent no pack")),
                Some(packet) => {
                    if let Some(message) = packet.text().and_then(|t| t.strip_prefix("ERR ")) {
                        return Err(Error::transport(format!("remote error: {}", message)));
                    }
                }
            }
        }
        Ok(reader.rest().to_vec())
    }

    async fn push(
        &self,
        url: &str,
        update: &RefUpdate,
        pack: Vec<u8>,
        auth: Option<&BasicAuth>,
    ) -> Result<()> {
        let mut body = Vec::new();
        let command = format!(
            "{} {} {}\0report-status agent={}",
            update.old, update.new, update.name, self.user_agent
        );
        pktline::write_line(&mut body, &command);
        pktline::flush(&mut body);
        body.extend_from_slice(&pack);

        let endpoint = Self::endpoint(url, Service::ReceivePack.as_str())?;
        let request = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/x-git-receive-pack-request")
            .header("Accept", "application/x-git-receive-pack-result")
            .body(body);
        let response = self.send(url, Self::with_auth(request, auth)).await?;

        parse_report_status(&response, &update.name)
    }
}

/// Check a `report-status` response for our single ref.
fn parse_report_status(data: &[u8], refname: &str) -> Result<()> {
    let mut reader = pktline::Reader::new(data);
    let mut ref_ok = false;

    while let Some(packet) = reader.next_packet()? {
        let Some(line) = packet.text() else {
            break;
        };
        if let Some(status) = line.strip_prefix("unpack ") {
            if status != "ok" {
                return Err(Error::transport(format!("remote unpack failed: {}", status)));
            }
        } else if let Some(rest) = line.strip_prefix("ok ") {
            ref_ok |= rest == refname;
        } else if let Some(rest) = line.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            return Err(Error::transport(format!(
                "failed to update ref {}: {}",
                name, reason
            )));
        }
    }

    if ref_ok {
        Ok(())
    } else {
        Err(Error::transport(format!(
            "remote did not confirm update of {}",
            refname
        )))
    }
}
