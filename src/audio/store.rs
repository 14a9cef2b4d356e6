//! Synthesized audio artifact storage.
//!
//! TTS output is written to disk and handed back to the pipeline as a
//! `/audio/<id>` reference the client fetches over HTTP. Artifacts are
//! short-lived; a background pass deletes anything past the configured age.

use crate::config::AudioStoreConfig;
use crate::error::{Result, VoiceError};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Storage seam for synthesized audio.
#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Store one artifact and return its client-facing reference
    /// (`/audio/<id>.<ext>`).
    async fn put(&self, bytes: Bytes, ext: &str) -> Result<String>;
}

/// Disk-backed artifact store with uuid-named files.
pub struct DiskAudioStore {
    dir: PathBuf,
}

impl DiskAudioStore {
    /// Create the store, ensuring the artifact directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(config: &AudioStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir).map_err(|e| {
            VoiceError::Audio(format!(
                "failed to create audio dir {}: {e}",
                config.dir.display()
            ))
        })?;
        Ok(Self {
            dir: config.dir.clone(),
        })
    }

    /// Directory the artifacts are served from.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Run the periodic cleanup loop until cancelled.
    ///
    /// Deletes artifacts whose modification time is older than
    /// `max_age_secs`. Errors are logged and the pass continues.
    pub async fn run_cleanup(config: AudioStoreConfig, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        tick.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let removed = sweep_dir(&config.dir, Duration::from_secs(config.max_age_secs));
                    if removed > 0 {
                        info!("audio cleanup removed {removed} expired artifacts");
                    }
                }
            }
        }
    }
}

fn sweep_dir(dir: &PathBuf, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("audio cleanup: cannot read {}: {e}", dir.display());
            return 0;
        }
    };

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .is_some_and(|age| age > max_age);
        if expired {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("audio cleanup: cannot remove {}: {e}", path.display()),
            }
        }
    }
    removed
}

#[async_trait]
impl AudioStore for DiskAudioStore {
    async fn put(&self, bytes: Bytes, ext: &str) -> Result<String> {
        let id = Uuid::new_v4();
        let filename = format!("{id}.{ext}");
        let path = self.dir.join(&filename);

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| VoiceError::Audio(format!("failed to write {}: {e}", path.display())))?;

        Ok(format!("/audio/{filename}"))
    }
}
