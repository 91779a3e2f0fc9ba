#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Result, bail};
use clap::Parser;
use config::Config;
use playlist::Playlist;
use probe::BodyFetcher;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use util::{env_log_filter, init_http_client, spawn_ct_watcher};

pub mod checker;
pub mod config;
pub mod playlist;
pub mod probe;
pub mod source;
pub mod store;
pub mod util;

/// Keeps a working stream URL for every configured TV channel and writes them out as an M3U playlist
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Channel configuration file
    #[arg(short, long, default_value = "channels.json")]
    config: PathBuf,

    /// Where to write the playlist, `-` for stdout [default: `output` from the config file]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only check the channel with this ID (repeatable)
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Keep running, re-checking every N seconds until CTRL+C
    #[arg(short, long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout may carry the playlist
    tracing_subscriber::fmt()
        .with_env_filter(env_log_filter(None, "RUST_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).await?;

    for id in &args.channels {
        if !config.channels.iter().any(|c| &c.id == id) {
            bail!("Channel `{id}` is not in {}", args.config.display());
        }
    }

    let client = init_http_client(Duration::from_secs(config.probe_timeout_secs))?;
    let fetcher: Arc<dyn BodyFetcher> = Arc::new(client);
    let output = args.output.clone().or_else(|| config.output.clone());

    let Some(interval) = args.interval else {
        return run_once(&config, &fetcher, &args.channels, output.as_deref()).await;
    };

    let ct = CancellationToken::new();
    spawn_ct_watcher(ct.clone());

    info!("Re-checking every {interval}s, press CTRL+C to stop");
    loop {
        run_once(&config, &fetcher, &args.channels, output.as_deref()).await?;

        select! {
            () = ct.cancelled() => break,
            () = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }
    }

    info!("All done!");
    Ok(())
}

/// Checks every selected channel, one after another, and writes the playlist
async fn run_once(
    config: &Config,
    fetcher: &Arc<dyn BodyFetcher>,
    only: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let mut playlist = Playlist::default();

    for channel in config
        .channels
        .iter()
        .filter(|c| only.is_empty() || only.contains(&c.id))
    {
        let checker = channel.build_checker(&config.state_dir, fetcher)?;
        let res = checker.check().await;

        if res.changed {
            info!("Channel {} changed, now `{}`", channel.id, res.url);
        }

        if res.state && !res.url.is_empty() {
            playlist.push(channel.playlist_entry(res.url));
        } else {
            warn!("Channel {} has no usable stream", channel.id);
        }
    }

    if playlist.is_empty() {
        warn!("No channel has a usable stream, the playlist will be empty");
    }

    match output {
        Some(path) if path.as_os_str() != "-" => {
            playlist.write_to(path).await?;
            info!(
                "Wrote {} channel(s) to {}",
                playlist.len(),
                path.display()
            );
        }
        _ => print!("{}", playlist.render()),
    }

    Ok(())
}
