use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Maximum number of responses kept on disk.
pub const MAX_CACHE_SIZE: usize = 50;

/// Number of recent responses handed to the generator as "do not repeat" context.
pub const RECENT_CONTEXT: usize = 10;

/// Persisted log of previously sent responses, lowercased.
///
/// The file is re-read on every access and rewritten whole on every append,
/// so another process writing the same file concurrently will lose updates
/// (last write wins).
#[derive(Debug, Clone)]
pub struct ResponseCache {
    path: PathBuf,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: MAX_CACHE_SIZE,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries. A missing or unreadable file is an empty cache.
    pub async fn load(&self) -> Vec<String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Could not read response cache {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<String>>(&content) {
            Ok(entries) => {
                debug!("Loaded {} cached responses", entries.len());
                entries
            }
            Err(e) => {
                warn!(
                    "Response cache {} is corrupt, treating as empty: {}",
                    self.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    /// The last `n` entries, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<String> {
        let entries = self.load().await;
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    /// Lowercase `text`, append it, keep the newest entries and rewrite the file.
    pub async fn append(&self, text: &str) -> Result<()> {
        let mut entries = self.load().await;
        entries.push(text.to_lowercase());
        if entries.len() > self.capacity {
            entries.drain(..entries.len() - self.capacity);
        }
        self.save(&entries).await
    }

    async fn save(&self, entries: &[String]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries).context("Failed to encode response cache")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write response cache: {}", self.path.display()))?;
        debug!("Saved {} responses to cache", entries.len());
        Ok(())
    }
}
