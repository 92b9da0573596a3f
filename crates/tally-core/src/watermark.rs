//! Durable watermark persistence for the completion-log scan window.
//!
//! The watermark is a single JSON file holding the end of the last window
//! scanned. Writes go to a sibling temp file and are renamed into place so a
//! partial write is never observable. A missing or malformed file degrades
//! to "no watermark"; only writes surface errors.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Persisted upper bound of the completion window already processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_end_time: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to write watermark {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode watermark: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed watermark store. The orchestrator is the sole writer, at the
/// end of a run; readers tolerate absence and corruption.
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WatermarkStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored watermark. Missing or unreadable files are reported
    /// as `None`, never as an error.
    pub fn load(&self) -> Option<Watermark> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No watermark file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read watermark {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<Watermark>(&raw) {
            Ok(wm) => Some(wm),
            Err(e) => {
                warn!(
                    "Malformed watermark {} ({}); treating as absent",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Advance the watermark to `end`. The stored value is monotonically
    /// non-decreasing: an `end` at or before the current value is skipped.
    pub fn save(&self, end: DateTime<FixedOffset>) -> Result<(), WatermarkError> {
        if let Some(existing) = self.load() {
            if end <= existing.last_end_time {
                warn!(
                    "Not rewinding watermark: stored {} >= new {}",
                    existing.last_end_time, end
                );
                return Ok(());
            }
        }
        self.write_atomic(end)
    }

    /// Unconditionally set the watermark, bypassing the monotonic guard.
    /// Used by `--watermark-init-now`.
    pub fn initialize_to(&self, instant: DateTime<FixedOffset>) -> Result<(), WatermarkError> {
        self.write_atomic(instant)
    }

    /// Delete the watermark file. Deleting an absent file is not an error.
    pub fn reset(&self) -> Result<(), WatermarkError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WatermarkError::Write {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn write_atomic(&self, end: DateTime<FixedOffset>) -> Result<(), WatermarkError> {
        let wm = Watermark {
            last_end_time: end,
            updated_at: Utc::now().with_timezone(end.offset()),
        };
        let body = serde_json::to_string(&wm)?;

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "watermark".into());
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        fs::write(&tmp, body).map_err(|e| WatermarkError::Write {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| WatermarkError::Write {
            path: self.path.clone(),
            source: e,
        })?;
        debug!("Watermark advanced to {}", wm.last_end_time);
        Ok(())
    }
}
