use super::AudioEngine;
use crate::model::PlayerState;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Sequential playlist on top of a single-file [`AudioEngine`].
///
/// `next`/`previous` wrap around the list. Natural end of the last entry
/// stops output and reports [`PlayerState::Ended`].
pub struct PlaylistPlayer {
    engine: Box<dyn AudioEngine>,
    list: Vec<PathBuf>,
    cursor: usize,
    ended: bool,
}

impl PlaylistPlayer {
    pub fn new(engine: Box<dyn AudioEngine>) -> Self {
        Self {
            engine,
            list: Vec::new(),
            cursor: 0,
            ended: false,
        }
    }

    pub fn load_list(&mut self, paths: Vec<PathBuf>) {
        self.engine.stop();
        self.list = paths;
        self.cursor = 0;
        self.ended = false;
    }

    pub fn load_single(&mut self, path: &Path) {
        self.load_list(vec![path.to_path_buf()]);
    }

    /// Swaps the list without touching output; `cursor` must point at the playing entry.
    pub fn replace_list(&mut self, paths: Vec<PathBuf>, cursor: usize) {
        self.cursor = cursor.min(paths.len().saturating_sub(1));
        self.list = paths;
    }

    pub fn cursor(&self) -> Option<usize> {
        (!self.list.is_empty()).then_some(self.cursor)
    }

    /// Resumes paused output, otherwise starts the entry under the cursor.
    /// A list that already ran to its end starts over.
    pub fn play(&mut self) -> Result<()> {
        if self.engine.current_track().is_some() && self.engine.is_paused() {
            self.engine.resume();
            return Ok(());
        }
        if self.ended {
            return self.play_index(0);
        }
        self.play_index(self.cursor)
    }

    /// The cursor only moves once the backend accepted the file.
    pub fn play_index(&mut self, index: usize) -> Result<()> {
        let Some(path) = self.list.get(index) else {
            return Ok(());
        };
        self.engine.play(path)?;
        self.cursor = index;
        self.ended = false;
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.engine.current_track().is_some() {
            self.engine.pause();
        }
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    pub fn next(&mut self) -> Result<()> {
        if self.list.is_empty() {
            return Ok(());
        }
        self.play_index((self.cursor + 1) % self.list.len())
    }

    pub fn previous(&mut self) -> Result<()> {
        if self.list.is_empty() {
            return Ok(());
        }
        let len = self.list.len();
        self.play_index((self.cursor + len - 1) % len)
    }

    pub fn volume(&self) -> u8 {
        (self.engine.volume() * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.engine.set_volume(f32::from(volume.min(100)) / 100.0);
    }

    pub fn elapsed_ms(&self) -> Option<u64> {
        self.engine
            .position()
            .map(|position| u64::try_from(position.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn total_ms(&self) -> Option<u64> {
        self.engine
            .duration()
            .filter(|duration| !duration.is_zero())
            .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn state(&self) -> PlayerState {
        if self.ended {
            return PlayerState::Ended;
        }
        match self.engine.current_track() {
            None => PlayerState::Stopped,
            Some(_) if self.engine.is_paused() => PlayerState::Paused,
            Some(_) => PlayerState::Playing,
        }
    }

    /// Advances past a finished entry. Returns true when a new entry started.
    pub fn tick(&mut self) -> Result<bool> {
        if !self.engine.is_finished() {
            return Ok(false);
        }
        if self.cursor + 1 < self.list.len() {
            if let Err(err) = self.play_index(self.cursor + 1) {
                self.engine.stop();
                return Err(err);
            }
            return Ok(true);
        }
        self.engine.stop();
        self.ended = true;
        Ok(false)
    }
}
