use std::collections::HashSet;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use tracing::{debug, info, instrument};

/// Every M3U / HLS playlist starts with `#EXTM3U`
pub const PLAYLIST_SIGNATURE: &str = "EXTM3U";

/// How much of a response a probe reads before giving up on finding the signature.
/// A candidate may be a raw MPEG-TS stream that never ends.
pub const PROBE_READ_LIMIT: usize = 64 * 1024;

/// Fetches the body behind a URL, or fails.
///
/// Probes and candidate sources only ever need this much of a transport.
#[async_trait]
pub trait BodyFetcher: Send + Sync {
    async fn fetch_body(&self, url: &str) -> Result<String>;

    /// Reads at most `limit` bytes of the body, stopping early once
    /// [`PLAYLIST_SIGNATURE`] has shown up
    async fn fetch_prefix(&self, url: &str, limit: usize) -> Result<String> {
        let _ = limit;
        self.fetch_body(url).await
    }
}

#[async_trait]
impl BodyFetcher for reqwest::Client {
    #[instrument(skip(self))]
    async fn fetch_body(&self, url: &str) -> Result<String> {
        let res = send_checked(self, url).await?;

        let body = res.text().await.context("Reading response body")?;
        ensure!(!body.is_empty(), "Response body is empty");

        Ok(body)
    }

    #[instrument(skip(self))]
    async fn fetch_prefix(&self, url: &str, limit: usize) -> Result<String> {
        let mut res = send_checked(self, url).await?;

        let mut buf = Vec::new();
        while buf.len() < limit {
            let Some(chunk) = res.chunk().await.context("Reading response body")? else {
                break;
            };
            buf.extend_from_slice(&chunk);

            if contains_signature(&buf) {
                break;
            }
        }
        buf.truncate(limit);
        ensure!(!buf.is_empty(), "Response body is empty");

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

async fn send_checked(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    client
        .get(url)
        .send()
        .await
        .context("Sending request")?
        .error_for_status()
        .context("Server answered with an error status")
}

fn contains_signature(buf: &[u8]) -> bool {
    buf.windows(PLAYLIST_SIGNATURE.len())
        .any(|w| w == PLAYLIST_SIGNATURE.as_bytes())
}

/// Liveness prober for a single check.
///
/// Remembers every URL it was asked about, so overlapping history and
/// source lists never hit the same server twice within one check.
pub struct Prober<'a> {
    fetcher: &'a dyn BodyFetcher,
    checked: HashSet<String>,
}

impl<'a> Prober<'a> {
    pub fn new(fetcher: &'a dyn BodyFetcher) -> Self {
        Self {
            fetcher,
            checked: HashSet::new(),
        }
    }

    /// Returns `true` iff `url` serves a playlist.
    ///
    /// A URL already probed by this prober returns `false` without any request,
    /// whatever its first outcome was.
    pub async fn probe(&mut self, url: &str) -> bool {
        if !self.checked.insert(url.to_string()) {
            debug!("Already probed {url} during this check, skipping");
            return false;
        }

        match self.fetcher.fetch_prefix(url, PROBE_READ_LIMIT).await {
            Ok(body) if body.contains(PLAYLIST_SIGNATURE) => {
                debug!("{url} is alive");
                true
            }
            Ok(_) => {
                info!("{url} answered, but not with a playlist");
                false
            }
            Err(e) => {
                info!("{url} is unreachable: {e:#}");
                false
            }
        }
    }
}
