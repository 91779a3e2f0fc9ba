use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    checker::{Checker, DEFAULT_MAX_ERR_COUNT},
    playlist::PlaylistEntry,
    probe::BodyFetcher,
    source::{CandidateSource, JsonApiSource, ScrapeSource, StaticSource},
    store::{ErrorCounterStore, HistoryStore},
};

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

const fn default_probe_timeout_secs() -> u64 {
    10
}

const fn default_max_err_count() -> u32 {
    DEFAULT_MAX_ERR_COUNT
}

/// Channel configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding every channel's state files.
    /// Relative paths are taken from the config file's directory.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Upper bound for a single probe or source request
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Playlist destination, relative to the config file's directory.
    /// Stdout when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,

    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub display_name: Option<String>,

    /// Failed checks in a row tolerated before the history URL is evicted
    #[serde(default = "default_max_err_count")]
    pub max_err_count: u32,

    #[serde(default)]
    pub history_file: Option<PathBuf>,
    #[serde(default)]
    pub err_counter_file: Option<PathBuf>,

    /// Fallback sources, tried in order
    #[serde(default)]
    pub drivers: Vec<DriverConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverConfig {
    Static {
        urls: Vec<String>,
    },
    Scrape {
        page: String,
        #[serde(default)]
        pattern: Option<String>,
    },
    Json {
        url: String,
        pointer: String,
    },
}

impl Config {
    /// Reads the config file and anchors its relative paths to the file's directory
    ///
    /// # Errors
    /// Errors when the file cannot be read, is not valid JSON or has a bad shape
    #[instrument]
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Reading config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Parsing config file {}", path.display()))?;
        ensure!(
            config.probe_timeout_secs > 0,
            "`probe_timeout_secs` must be greater than zero"
        );

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        config.state_dir = base_dir.join(&config.state_dir);
        config.output = config.output.map(|o| base_dir.join(o));

        debug!(
            "Loaded {} channel(s), state in {}",
            config.channels.len(),
            config.state_dir.display()
        );
        Ok(config)
    }
}

impl ChannelConfig {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or_else(|| self.name())
    }

    pub fn history_path(&self, state_dir: &Path) -> PathBuf {
        self.history_file.as_ref().map_or_else(
            || state_dir.join(format!("{}.history.json", self.id)),
            |p| state_dir.join(p),
        )
    }

    pub fn err_counter_path(&self, state_dir: &Path) -> PathBuf {
        self.err_counter_file.as_ref().map_or_else(
            || state_dir.join(format!("{}.err_count.json", self.id)),
            |p| state_dir.join(p),
        )
    }

    /// # Errors
    /// Errors when a driver is misconfigured (e.g. a bad scrape pattern)
    pub fn build_checker(&self, state_dir: &Path, fetcher: &Arc<dyn BodyFetcher>) -> Result<Checker> {
        let sources = self
            .drivers
            .iter()
            .map(|d| d.build(fetcher))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Setting up drivers of channel {}", self.id))?;

        Ok(Checker::new(
            &self.id,
            fetcher.clone(),
            HistoryStore::new(self.history_path(state_dir)),
            ErrorCounterStore::new(self.err_counter_path(state_dir)),
            sources,
        )
        .with_max_err_count(self.max_err_count))
    }

    pub fn playlist_entry(&self, url: String) -> PlaylistEntry {
        PlaylistEntry {
            tvg_id: self.id.clone(),
            tvg_name: self.name().to_string(),
            tvg_logo: self.logo.clone(),
            group_title: self.group.clone(),
            display_name: self.display_name().to_string(),
            url,
        }
    }
}

impl DriverConfig {
    fn build(&self, fetcher: &Arc<dyn BodyFetcher>) -> Result<Box<dyn CandidateSource>> {
        Ok(match self {
            Self::Static { urls } => Box::new(StaticSource::new(urls.clone())),
            Self::Scrape { page, pattern } => Box::new(ScrapeSource::new(
                page.clone(),
                pattern.as_deref(),
                fetcher.clone(),
            )?),
            Self::Json { url, pointer } => Box::new(JsonApiSource::new(
                url.clone(),
                pointer.clone(),
                fetcher.clone(),
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::probe::testing::FakeFetcher;

    const SAMPLE: &str = r#"{
        "state_dir": "var",
        "output": "tv.m3u",
        "channels": [
            {
                "id": "cctv1",
                "name": "CCTV1",
                "display_name": "CCTV-1 综合",
                "logo": "https://logo.example/cctv1.png",
                "group": "央视",
                "max_err_count": 5,
                "drivers": [
                    { "type": "static", "urls": ["http://a/1.m3u8", "http://a/2.m3u8"] },
                    { "type": "scrape", "page": "https://tv.example/cctv1" },
                    { "type": "json", "url": "https://api.example/live?id=1", "pointer": "/data/hls" }
                ]
            },
            { "id": "news", "history_file": "/var/lib/news.json" }
        ]
    }"#;

    async fn load_sample() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("channels.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path).await.unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn relative_paths_follow_config_file() {
        let (dir, config) = load_sample().await;

        assert_eq!(config.state_dir, dir.path().join("var"));
        assert_eq!(config.output, Some(dir.path().join("tv.m3u")));
        assert_eq!(config.probe_timeout_secs, 10);
    }

    #[tokio::test]
    async fn channel_defaults() {
        let (_dir, config) = load_sample().await;
        let news = &config.channels[1];

        assert_eq!(news.name(), "news");
        assert_eq!(news.display_name(), "news");
        assert_eq!(news.max_err_count, DEFAULT_MAX_ERR_COUNT);
        assert!(news.drivers.is_empty());
        assert_eq!(
            news.err_counter_path(&config.state_dir),
            config.state_dir.join("news.err_count.json")
        );
        assert_eq!(
            news.history_path(&config.state_dir),
            PathBuf::from("/var/lib/news.json")
        );
    }

    #[tokio::test]
    async fn drivers_keep_their_order() {
        let (_dir, config) = load_sample().await;
        let cctv1 = &config.channels[0];

        assert_eq!(cctv1.max_err_count, 5);
        assert_eq!(
            cctv1.drivers,
            vec![
                DriverConfig::Static {
                    urls: vec!["http://a/1.m3u8".to_string(), "http://a/2.m3u8".to_string()]
                },
                DriverConfig::Scrape {
                    page: "https://tv.example/cctv1".to_string(),
                    pattern: None
                },
                DriverConfig::Json {
                    url: "https://api.example/live?id=1".to_string(),
                    pointer: "/data/hls".to_string()
                },
            ]
        );
        assert_eq!(
            cctv1.history_path(&config.state_dir),
            config.state_dir.join("cctv1.history.json")
        );
    }

    #[tokio::test]
    async fn playlist_entry_uses_channel_metadata() {
        let (_dir, config) = load_sample().await;

        let entry = config.channels[0].playlist_entry("http://a/1.m3u8".to_string());

        assert_eq!(
            entry.to_string(),
            "#EXTINF:-1 tvg-id=\"cctv1\" tvg-name=\"CCTV1\" tvg-logo=\"https://logo.example/cctv1.png\" group-title=\"央视\", CCTV-1 综合\nhttp://a/1.m3u8"
        );
    }

    #[tokio::test]
    async fn built_checker_resolves_through_drivers() {
        let (_dir, config) = load_sample().await;
        let fetcher: Arc<dyn BodyFetcher> = Arc::new(
            FakeFetcher::default()
                .with_body("https://api.example/live?id=1", r#"{"data":{"hls":"http://b/x.m3u8"}}"#)
                .with_playlist("http://b/x.m3u8"),
        );

        let checker = config.channels[0]
            .build_checker(&config.state_dir, &fetcher)
            .unwrap();
        let res = checker.check().await;

        assert!(res.state && res.changed);
        assert_eq!(res.url, "http://b/x.m3u8");
        assert!(config.state_dir.join("cctv1.history.json").exists());
    }

    #[tokio::test]
    async fn bad_scrape_pattern_fails_checker_setup() {
        let channel: ChannelConfig = serde_json::from_str(
            r#"{ "id": "x", "drivers": [{ "type": "scrape", "page": "http://p", "pattern": "(" }] }"#,
        )
        .unwrap();
        let fetcher: Arc<dyn BodyFetcher> = Arc::new(FakeFetcher::default());

        assert!(channel.build_checker(Path::new("state"), &fetcher).is_err());
    }

    #[tokio::test]
    async fn bad_json_pointer_fails_checker_setup() {
        let channel: ChannelConfig = serde_json::from_str(
            r#"{ "id": "x", "drivers": [{ "type": "json", "url": "http://api", "pointer": "data/hls" }] }"#,
        )
        .unwrap();
        let fetcher: Arc<dyn BodyFetcher> = Arc::new(FakeFetcher::default());

        let err = channel
            .build_checker(Path::new("state"), &fetcher)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("data/hls"), "{err:#}");
    }

    #[tokio::test]
    async fn invalid_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("channels.json");

        assert!(Config::load(&path).await.is_err());

        for content in [
            "{",
            r#"{ "channels": [{ "id": "x", "drivers": [{ "type": "ftp" }] }] }"#,
            r#"{ "channels": [], "probe_timeout_secs": 0 }"#,
            r#"{ "channels": [], "stat_dir": "typo" }"#,
        ] {
            std::fs::write(&path, content).unwrap();
            assert!(Config::load(&path).await.is_err(), "content: {content}");
        }
    }
}
