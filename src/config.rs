use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tinplayer";
const SETTINGS_FILE: &str = "settings.json";
const CONNECTION_FILE: &str = "connection.json";
const PET_FILE: &str = "pet.json";
const LOG_FILE: &str = "tinplayer.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Keyboard,
    Gpio,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub music_dir: PathBuf,
    pub hold_threshold_ms: u64,
    pub poll_interval_ms: u64,
    pub tick_interval_ms: u64,
    pub settle_ms: u64,
    pub message_ms: u64,
    pub volume_step: u8,
    pub initial_volume: u8,
    pub input: InputMode,
    pub gpio_pins: Vec<u32>,
    pub status_path: Option<PathBuf>,
    pub tool_timeout_ms: u64,
    pub scan_seconds: u64,
    pub shutdown_command: Vec<String>,
    pub headset_keys: bool,
    pub headset_retry_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            music_dir: PathBuf::from("music"),
            hold_threshold_ms: 500,
            poll_interval_ms: 10,
            tick_interval_ms: 50,
            settle_ms: 500,
            message_ms: 1_000,
            volume_step: 5,
            initial_volume: 80,
            input: InputMode::Keyboard,
            gpio_pins: vec![12, 5, 6, 13],
            status_path: None,
            tool_timeout_ms: 10_000,
            scan_seconds: 5,
            shutdown_command: ["sudo", "shutdown", "-h", "now"]
                .into_iter()
                .map(String::from)
                .collect(),
            headset_keys: true,
            headset_retry_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn message_lifetime(&self) -> Duration {
        Duration::from_millis(self.message_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_seconds)
    }

    pub fn headset_retry(&self) -> Duration {
        Duration::from_millis(self.headset_retry_ms)
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("TINPLAYER_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn connection_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONNECTION_FILE))
}

pub fn pet_path() -> Result<PathBuf> {
    Ok(config_root()?.join(PET_FILE))
}

pub fn log_path() -> Result<PathBuf> {
    Ok(config_root()?.join(LOG_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path()?)
}

fn load_settings_from_path(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}
