use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Builds the HTTP client shared by probes and candidate sources.
///
/// `timeout` bounds a whole request; a hung stream server would otherwise
/// block the check forever.
///
/// # Errors
/// Errors when the TLS backend cannot be initialized
pub fn init_http_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_str(&user_agent()).context("Building User-Agent header")?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .context("Unable to build HTTP client")
}

fn user_agent() -> String {
    format!(
        "{}/{} (+{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY")
    )
}

/// Loads `dotenv_file` (`.env` lookup when `None`) into the environment, then
/// builds the log filter from `var`, `info` when unset
pub fn env_log_filter(dotenv_file: Option<&Path>, var: &str) -> EnvFilter {
    dotenv_file
        .map_or_else(|| dotenvy::dotenv().map(|_| ()), dotenvy::from_path)
        .ok();

    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Caught CTRL+C signal!");
        ct.cancel();
    });
}
