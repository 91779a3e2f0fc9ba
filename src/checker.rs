use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    probe::{BodyFetcher, Prober},
    source::{CandidateSource, find_first_live_candidate},
    store::{ErrorCounterStore, HistoryStore},
};

pub const DEFAULT_MAX_ERR_COUNT: u32 = 3;

/// Outcome of one [`Checker::check`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckResult {
    /// Whether `url` should be used
    pub state: bool,
    /// The URL differs from the persisted one, or the persisted one was evicted
    pub changed: bool,
    pub url: String,
}

/// Resolves a live stream URL for one channel.
///
/// The persisted history URL wins while it stays alive. When it dies, the
/// candidate sources are scanned for a replacement. With no replacement in
/// sight the history URL is kept for up to `max_err_count` failed checks in
/// a row, then evicted.
///
/// Checks must not run concurrently against the same state files.
pub struct Checker {
    channel: String,
    fetcher: Arc<dyn BodyFetcher>,
    history: HistoryStore,
    err_counter: ErrorCounterStore,
    sources: Vec<Box<dyn CandidateSource>>,
    max_err_count: u32,
}

impl Checker {
    pub fn new(
        channel: impl Into<String>,
        fetcher: Arc<dyn BodyFetcher>,
        history: HistoryStore,
        err_counter: ErrorCounterStore,
        sources: Vec<Box<dyn CandidateSource>>,
    ) -> Self {
        Self {
            channel: channel.into(),
            fetcher,
            history,
            err_counter,
            sources,
            max_err_count: DEFAULT_MAX_ERR_COUNT,
        }
    }

    pub fn with_max_err_count(mut self, max_err_count: u32) -> Self {
        self.max_err_count = max_err_count;
        self
    }

    #[instrument(skip(self), fields(channel = %self.channel))]
    pub async fn check(&self) -> CheckResult {
        let history = self.history.load().await;
        let err_count = self.err_counter.load().await;
        let mut prober = Prober::new(self.fetcher.as_ref());

        if !history.is_empty() && prober.probe(&history).await {
            info!("History URL {history} is still alive");
            self.reset_err_count(err_count).await;
            return CheckResult {
                state: true,
                changed: false,
                url: history,
            };
        }

        if let Some(candidate) = find_first_live_candidate(&self.sources, &mut prober).await {
            info!("Switching to {candidate}");
            self.save_history(&candidate).await;
            self.reset_err_count(err_count).await;
            return CheckResult {
                state: true,
                changed: true,
                url: candidate,
            };
        }

        if history.is_empty() {
            info!("No history and no live candidate");
            return CheckResult::default();
        }

        let err_count = err_count.saturating_add(1);
        self.save_err_count(err_count).await;

        if err_count > self.max_err_count {
            warn!("History URL {history} failed {err_count} checks in a row, evicting it");
            self.save_history("").await;
            CheckResult {
                state: false,
                changed: true,
                url: history,
            }
        } else {
            // Still reported usable: a flaky probe must not flap the channel
            info!(
                "History URL {history} failed ({err_count}/{}), keeping it for now",
                self.max_err_count
            );
            CheckResult {
                state: true,
                changed: false,
                url: history,
            }
        }
    }

    async fn reset_err_count(&self, err_count: u32) {
        if err_count > 0 {
            self.save_err_count(0).await;
        }
    }

    async fn save_err_count(&self, err_count: u32) {
        if let Err(e) = self.err_counter.save(err_count).await {
            warn!("Unable to persist error count: {e:#}");
        }
    }

    async fn save_history(&self, url: &str) {
        if let Err(e) = self.history.save(url).await {
            warn!("Unable to persist history: {e:#}");
        }
    }
}
