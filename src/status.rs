use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Flat per-tick playback snapshot handed to passive observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusRecord {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub position: u8,
    pub duration: String,
    pub shuffle: bool,
    pub volume: u8,
    pub file_path: Option<PathBuf>,
    pub status: String,
}

impl StatusRecord {
    pub fn is_playing(&self) -> bool {
        self.status == crate::model::PlayerState::Playing.label()
    }
}

pub trait StatusPublisher {
    fn publish(&mut self, record: &StatusRecord) -> Result<()>;
}

pub struct NullPublisher;

impl StatusPublisher for NullPublisher {
    fn publish(&mut self, _record: &StatusRecord) -> Result<()> {
        Ok(())
    }
}

/// Rewrites a JSON file whenever the record changes. Readers never see a
/// half-written file: content goes to a sibling temp file which is renamed over.
pub struct JsonStatusFile {
    path: PathBuf,
    last: Option<StatusRecord>,
}

impl JsonStatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }
}

impl StatusPublisher for JsonStatusFile {
    fn publish(&mut self, record: &StatusRecord) -> Result<()> {
        if self.last.as_ref() == Some(record) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        self.last = Some(record.clone());
        Ok(())
    }
}
