use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Song,
    Artist,
    Album,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Song, Category::Artist, Category::Album];

    pub fn label(self) -> &'static str {
        match self {
            Self::Song => "Song",
            Self::Artist => "Artist",
            Self::Album => "Album",
        }
    }

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }
}

/// A single audio file in the library. Identity is the path.
#[derive(Debug, Clone)]
pub struct Track {
    pub path: PathBuf,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    duration: OnceLock<Option<Duration>>,
}

impl Track {
    /// Untagged track; the title falls back to the file's base name.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = base_name(&path);
        Self {
            path,
            title,
            artist: None,
            album: None,
            year: None,
            genre: None,
            duration: OnceLock::new(),
        }
    }

    pub fn tagged(
        path: impl Into<PathBuf>,
        title: &str,
        artist: Option<&str>,
        album: Option<&str>,
    ) -> Self {
        let mut track = Self::new(path);
        track.title = title.to_string();
        track.artist = artist.map(ToOwned::to_owned);
        track.album = album.map(ToOwned::to_owned);
        track
    }

    pub fn with_duration(self, duration: Option<Duration>) -> Self {
        Self {
            duration: OnceLock::from(duration),
            ..self
        }
    }

    pub fn artist_label(&self) -> &str {
        self.artist.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn album_label(&self) -> &str {
        self.album.as_deref().unwrap_or(UNKNOWN)
    }

    /// Tag value used for browsing and filtering in `category`.
    pub fn value_for(&self, category: Category) -> &str {
        match category {
            Category::Song => &self.title,
            Category::Artist => self.artist_label(),
            Category::Album => self.album_label(),
        }
    }

    /// Parsed lazily on first request, then cached.
    pub fn duration(&self) -> Option<Duration> {
        *self
            .duration
            .get_or_init(|| crate::library::probe_duration(&self.path))
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Track {}

pub fn base_name(path: &Path) -> String {
    path.file_name()
        .and_then(OsStr::to_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| path.display().to_string())
}

/// The active queue restriction. `category: None` means every track.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    pub category: Option<Category>,
    pub value: String,
    pub artist_context: Option<String>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn song(title: &str) -> Self {
        Self {
            category: Some(Category::Song),
            value: title.to_string(),
            artist_context: None,
        }
    }

    pub fn artist(artist: &str) -> Self {
        Self {
            category: Some(Category::Artist),
            value: artist.to_string(),
            artist_context: None,
        }
    }

    pub fn album(album: &str, artist_context: Option<&str>) -> Self {
        Self {
            category: Some(Category::Album),
            value: album.to_string(),
            artist_context: artist_context.map(ToOwned::to_owned),
        }
    }

    pub fn matches(&self, track: &Track) -> bool {
        match self.category {
            None => true,
            Some(Category::Song) => track.title == self.value || base_name(&track.path) == self.value,
            Some(Category::Artist) => track.artist_label() == self.value,
            Some(Category::Album) => {
                track.album_label() == self.value
                    && self
                        .artist_context
                        .as_deref()
                        .is_none_or(|artist| track.artist_label() == artist)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    MainMenu,
    Playing,
    CategorySelect,
    LibrarySelect,
    Settings,
    BluetoothMenu,
    WifiMenu,
    PairingSelect,
    ConfirmShutdown,
    Pet,
    About,
}

impl View {
    pub fn title(self) -> &'static str {
        match self {
            Self::MainMenu => "Main Menu",
            Self::Playing => "Now Playing",
            Self::CategorySelect => "Browse",
            Self::LibrarySelect => "Select",
            Self::Settings => "Settings",
            Self::BluetoothMenu => "Bluetooth",
            Self::WifiMenu => "Wi-Fi",
            Self::PairingSelect => "Select Device",
            Self::ConfirmShutdown => "Shutdown?",
            Self::Pet => "Pet",
            Self::About => "System Info",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
    Ended,
    Unknown,
}

impl PlayerState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Ended => "Ended",
            Self::Unknown => "Unknown",
        }
    }
}
