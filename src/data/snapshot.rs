//! File-backed market source.
//!
//! Reads a JSON array of market records from disk on every fetch, so an
//! external process can refresh the file while the runtime is up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::MarketSource;
use crate::types::MarketRecord;

pub struct SnapshotFileSource {
    path: PathBuf,
}

impl SnapshotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MarketSource for SnapshotFileSource {
    fn name(&self) -> &str {
        "snapshot-file"
    }

    async fn fetch_active_markets(&self) -> Result<Vec<MarketRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No market snapshot on disk yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        let raw: Vec<serde_json::Value> = serde_json::from_str(&contents)
            .with_context(|| format!("parsing market snapshot {}", self.path.display()))?;
        let total = raw.len();

        // A bad record costs only itself.
        let mut skipped = 0;
        let mut active = Vec::with_capacity(total);
        for (index, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<MarketRecord>(value) {
                Ok(record) if record.is_active() => active.push(record),
                Ok(_) => {}
                Err(e) => {
                    skipped += 1;
                    warn!(path = %self.path.display(), index, error = %e, "Skipping malformed market record");
                }
            }
        }

        debug!(total, skipped, active = active.len(), "Loaded market snapshot");
        Ok(active)
    }
}
