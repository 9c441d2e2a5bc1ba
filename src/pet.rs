use crate::status::StatusRecord;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECONDS_PER_LEVEL: u64 = 600;
const MAX_OBSERVED_GAP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Dancing,
    Happy,
    Sleepy,
    Lonely,
}

impl Mood {
    pub fn label(self) -> &'static str {
        match self {
            Self::Dancing => "Dancing",
            Self::Happy => "Happy",
            Self::Sleepy => "Sleepy",
            Self::Lonely => "Lonely",
        }
    }

    pub fn face(self) -> &'static str {
        match self {
            Self::Dancing => "\\(^o^)/",
            Self::Happy => "(^_^)",
            Self::Sleepy => "(-_-) zZ",
            Self::Lonely => "(;_;)",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PetState {
    pub listening_seconds: u64,
    pub tracks_heard: u64,
    pub last_fed_epoch: i64,
    #[serde(skip)]
    last_path: Option<PathBuf>,
    #[serde(skip)]
    carry: Duration,
}

/// Companion that grows with listening time. Persisted as JSON.
#[derive(Debug)]
pub struct PetStore {
    path: Option<PathBuf>,
    state: PetState,
    playing: bool,
}

impl PetStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: PetState::default(),
            playing: false,
        }
    }

    /// Missing or unreadable files start a fresh pet.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match load_pet_from_path(&path) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("starting a new pet: {err:#}");
                PetState::default()
            }
        };
        Self {
            path: Some(path),
            state,
            playing: false,
        }
    }

    /// Credits `elapsed` wall time when the status says something is playing.
    pub fn observe(&mut self, status: &StatusRecord, elapsed: Duration) {
        self.playing = status.is_playing();
        if !self.playing {
            return;
        }

        let total = self.state.carry + elapsed.min(MAX_OBSERVED_GAP);
        self.state.listening_seconds += total.as_secs();
        self.state.carry = total - Duration::from_secs(total.as_secs());
        self.state.last_fed_epoch = now_epoch_seconds();

        if status.file_path.is_some() && self.state.last_path != status.file_path {
            self.state.tracks_heard += 1;
            self.state.last_path = status.file_path.clone();
        }
    }

    pub fn state(&self) -> &PetState {
        &self.state
    }

    pub fn level(&self) -> u64 {
        1 + self.state.listening_seconds / SECONDS_PER_LEVEL
    }

    pub fn mood(&self) -> Mood {
        self.mood_at(now_epoch_seconds())
    }

    pub fn mood_at(&self, now_epoch: i64) -> Mood {
        if self.playing {
            return Mood::Dancing;
        }
        let idle = now_epoch.saturating_sub(self.state.last_fed_epoch);
        match idle {
            _ if self.state.last_fed_epoch == 0 => Mood::Lonely,
            0..=3_600 => Mood::Happy,
            3_601..=86_400 => Mood::Sleepy,
            _ => Mood::Lonely,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mood = self.mood();
        vec![
            mood.face().to_string(),
            format!("Level {} - {}", self.level(), mood.label()),
            format!("Heard {} min", self.state.listening_seconds / 60),
            format!("{} tracks", self.state.tracks_heard),
        ]
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        save_pet_to_path(path, &self.state)
    }
}

pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn load_pet_from_path(path: &Path) -> Result<PetState> {
    if !path.exists() {
        return Ok(PetState::default());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let state: PetState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(state)
}

fn save_pet_to_path(path: &Path, state: &PetState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
