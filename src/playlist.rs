use std::{fmt, path::Path};

use anyhow::{Context, Result};

/// One `#EXTINF` record. Every attribute renders as `""` when unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub group_title: String,
    pub display_name: String,
    pub url: String,
}

impl fmt::Display for PlaylistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\" tvg-logo=\"{}\" group-title=\"{}\", {}\n{}",
            self.tvg_id, self.tvg_name, self.tvg_logo, self.group_title, self.display_name, self.url
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
}

impl Playlist {
    pub fn push(&mut self, entry: PlaylistEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        for entry in &self.entries {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// # Errors
    /// Errors when the file or its directory cannot be written
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Creating playlist directory {}", parent.display()))?;
        }

        tokio::fs::write(path, self.render())
            .await
            .with_context(|| format!("Writing playlist to {}", path.display()))
    }
}
