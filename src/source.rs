use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::probe::{BodyFetcher, Prober};

/// Matches absolute HLS playlist URLs embedded anywhere in a page
pub const DEFAULT_SCRAPE_PATTERN: &str = r#"https?://[^\s"'<>]+\.m3u8[^\s"'<>]*"#;

/// A fallback source of stream URLs, consulted only when history is dead
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Human readable identifier, used in logs
    fn name(&self) -> &str;

    /// Candidate URLs, best first
    async fn list_candidates(&self) -> Result<Vec<String>>;
}

/// Fixed list of URLs straight from configuration
pub struct StaticSource {
    urls: Vec<String>,
}

impl StaticSource {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_candidates(&self) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// Scrapes a web page for stream URLs.
///
/// The first capture group is taken when the pattern has one, the whole
/// match otherwise. Results keep document order, duplicates dropped.
pub struct ScrapeSource {
    page: String,
    pattern: Regex,
    fetcher: Arc<dyn BodyFetcher>,
}

impl ScrapeSource {
    /// # Errors
    /// Errors when `pattern` is not a valid regular expression
    pub fn new(page: String, pattern: Option<&str>, fetcher: Arc<dyn BodyFetcher>) -> Result<Self> {
        let pattern = pattern.unwrap_or(DEFAULT_SCRAPE_PATTERN);
        let pattern = Regex::new(pattern).with_context(|| format!("Compiling pattern `{pattern}`"))?;

        Ok(Self {
            page,
            pattern,
            fetcher,
        })
    }
}

#[async_trait]
impl CandidateSource for ScrapeSource {
    fn name(&self) -> &str {
        &self.page
    }

    #[instrument(skip(self), fields(page = %self.page))]
    async fn list_candidates(&self) -> Result<Vec<String>> {
        let body = self
            .fetcher
            .fetch_body(&self.page)
            .await
            .context("Fetching page to scrape")?;

        // Pages often embed URLs inside JSON blobs with escaped slashes
        let body = body.replace("\\/", "/");

        let mut seen = HashSet::new();
        let urls = self
            .pattern
            .captures_iter(&body)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().to_string())
            .filter(|url| seen.insert(url.clone()))
            .collect();

        Ok(urls)
    }
}

/// Reads candidate URLs out of a JSON API response via a JSON Pointer.
///
/// The pointed value may be a single string or an array of strings.
pub struct JsonApiSource {
    url: String,
    pointer: String,
    fetcher: Arc<dyn BodyFetcher>,
}

impl JsonApiSource {
    /// # Errors
    /// Errors when `pointer` is not a JSON Pointer (`""` or starting with `/`)
    pub fn new(url: String, pointer: String, fetcher: Arc<dyn BodyFetcher>) -> Result<Self> {
        ensure!(
            pointer.is_empty() || pointer.starts_with('/'),
            "`{pointer}` is not a JSON Pointer, it must be empty or start with `/`"
        );

        Ok(Self {
            url,
            pointer,
            fetcher,
        })
    }
}

#[async_trait]
impl CandidateSource for JsonApiSource {
    fn name(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn list_candidates(&self) -> Result<Vec<String>> {
        let body = self
            .fetcher
            .fetch_body(&self.url)
            .await
            .context("Fetching JSON API")?;
        let json: Value = serde_json::from_str(&body).context("Parsing JSON API response")?;

        match json.pointer(&self.pointer) {
            Some(Value::String(url)) => Ok(vec![url.clone()]),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()),
            Some(other) => bail!(
                "`{}` points to {other}, expected a string or an array",
                self.pointer
            ),
            None => bail!("`{}` does not exist in the response", self.pointer),
        }
    }
}

/// Walks `sources` in order, probing each of their candidates in order, and
/// returns the first one that is alive. Nothing after the hit is touched.
///
/// A source that fails to list its candidates counts as an empty one.
pub async fn find_first_live_candidate(
    sources: &[Box<dyn CandidateSource>],
    prober: &mut Prober<'_>,
) -> Option<String> {
    for source in sources {
        let candidates = match source.list_candidates().await {
            Ok(c) => c,
            Err(e) => {
                warn!("Source {} failed to list candidates: {e:#}", source.name());
                continue;
            }
        };
        debug!(
            "Source {} offered {} candidate(s)",
            source.name(),
            candidates.len()
        );

        for candidate in candidates {
            if prober.probe(&candidate).await {
                info!("Found live candidate {candidate} from {}", source.name());
                return Some(candidate);
            }
        }
    }

    None
}
