use crate::model::{Category, Filter, Track};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::ItemKey;
use lofty::probe::Probe;
use lofty::tag::Tag;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag as SymphoniaTag};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use walkdir::{DirEntry, WalkDir};

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "ogg", "aac", "m4a", "wma", "aiff", "alac",
];

#[derive(Debug, Default)]
struct TrackMetadata {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<String>,
    genre: Option<String>,
}

impl TrackMetadata {
    fn is_complete(&self) -> bool {
        self.title.is_some()
            && self.artist.is_some()
            && self.album.is_some()
            && self.year.is_some()
            && self.genre.is_some()
    }

    fn fill_from(&mut self, other: TrackMetadata) {
        self.title = self.title.take().or(other.title);
        self.artist = self.artist.take().or(other.artist);
        self.album = self.album.take().or(other.album);
        self.year = self.year.take().or(other.year);
        self.genre = self.genre.take().or(other.genre);
    }
}

/// Flat, walk-ordered list of every playable file under a root.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    root: Option<PathBuf>,
    tracks: Vec<Track>,
}

impl LibraryIndex {
    pub fn scan(root: &Path) -> Self {
        let tracks = scan_folder(root);
        log::info!("scanned {} tracks under {}", tracks.len(), root.display());
        Self {
            root: Some(root.to_path_buf()),
            tracks,
        }
    }

    /// Builds an index from already-resolved tracks, keeping the first of any duplicate path.
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let mut seen = HashSet::new();
        let tracks = tracks
            .into_iter()
            .filter(|track| seen.insert(track.path.clone()))
            .collect();
        Self { root: None, tracks }
    }

    pub fn rescan(&mut self) -> usize {
        if let Some(root) = self.root.clone() {
            self.tracks = scan_folder(&root);
            log::info!("rescanned {} tracks under {}", self.tracks.len(), root.display());
        }
        self.tracks.len()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Library positions of every track the filter admits, in library order.
    pub fn matching(&self, filter: &Filter) -> Vec<usize> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, track)| filter.matches(track))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn enumerate(
        &self,
        category: Category,
        artist_filter: Option<&str>,
        album_filter: Option<&str>,
    ) -> Vec<String> {
        let mut values: Vec<String> = self
            .tracks
            .iter()
            .filter(|track| artist_filter.is_none_or(|artist| track.artist_label() == artist))
            .filter(|track| album_filter.is_none_or(|album| track.album_label() == album))
            .map(|track| track.value_for(category).to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        values.sort_by_cached_key(|value| (value.to_lowercase(), value.clone()));
        values
    }
}

/// Depth-first, name-ordered walk. Dot entries are pruned and unreadable
/// entries skipped.
pub fn scan_folder(root: &Path) -> Vec<Track> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .flatten()
        .filter(|entry| entry.file_type().is_file() && is_audio(entry.path()))
        .map(|entry| track_from_path(entry.path()))
        .collect()
}

fn track_from_path(path: &Path) -> Track {
    let metadata = metadata_for(path);
    let mut track = Track::new(path);
    if let Some(title) = metadata.title {
        track.title = title;
    }
    track.artist = metadata.artist;
    track.album = metadata.album;
    track.year = metadata.year;
    track.genre = metadata.genre;
    track
}

fn metadata_for(path: &Path) -> TrackMetadata {
    let mut metadata = symphonia_metadata(path);
    if !metadata.is_complete() {
        metadata.fill_from(lofty_metadata(path));
    }
    metadata
}

fn probe_format(path: &Path) -> Option<symphonia::core::probe::ProbeResult> {
    let file = File::open(path).ok()?;
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()
}

fn symphonia_metadata(path: &Path) -> TrackMetadata {
    let Some(mut probed) = probe_format(path) else {
        return TrackMetadata::default();
    };

    // Containers expose tags in the format reader, ID3 blocks land in the probe metadata.
    let format_tags = probed
        .format
        .metadata()
        .current()
        .map(|revision| revision.tags().to_vec());
    let tags = match format_tags {
        Some(tags) if !tags.is_empty() => tags,
        _ => probed
            .metadata
            .get()
            .and_then(|metadata| metadata.current().map(|revision| revision.tags().to_vec()))
            .unwrap_or_default(),
    };

    TrackMetadata {
        title: tag_value(&tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            &tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        album: tag_value(&tags, StandardTagKey::Album, &["album"]),
        year: tag_value(&tags, StandardTagKey::Date, &["date", "year"]),
        genre: tag_value(&tags, StandardTagKey::Genre, &["genre"]),
    }
}

fn lofty_metadata(path: &Path) -> TrackMetadata {
    let Ok(tagged_file) = Probe::open(path).and_then(|entry| entry.read()) else {
        return TrackMetadata::default();
    };
    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return TrackMetadata::default();
    };

    TrackMetadata {
        title: lofty_text(tag, ItemKey::TrackTitle),
        artist: lofty_text(tag, ItemKey::TrackArtist),
        album: lofty_text(tag, ItemKey::AlbumTitle),
        year: lofty_text(tag, ItemKey::Year).or_else(|| lofty_text(tag, ItemKey::RecordingDate)),
        genre: lofty_text(tag, ItemKey::Genre),
    }
}

fn lofty_text(tag: &Tag, key: ItemKey) -> Option<String> {
    tag.get_string(key).and_then(clean_metadata_value)
}

/// Codec-reported duration, falling back to lofty's stream properties.
pub fn probe_duration(path: &Path) -> Option<Duration> {
    let from_codec = probe_format(path).and_then(|probed| {
        probed
            .format
            .default_track()
            .and_then(|track| codec_duration(&track.codec_params))
    });
    from_codec.or_else(|| {
        Probe::open(path)
            .and_then(|entry| entry.read())
            .ok()
            .map(|tagged_file| tagged_file.properties().duration())
            .filter(|duration| !duration.is_zero())
    })
}

fn codec_duration(params: &CodecParameters) -> Option<Duration> {
    let frames = params.n_frames?;
    match (params.time_base, params.sample_rate) {
        (Some(base), _) => {
            let time = base.calc_time(frames);
            Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
        }
        (None, Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / f64::from(rate)))
        }
        _ => None,
    }
}

/// Standard key first, then any of the raw vendor keys.
fn tag_value(tags: &[SymphoniaTag], key: StandardTagKey, raw_keys: &[&str]) -> Option<String> {
    let standard = tags.iter().find(|tag| tag.std_key == Some(key));
    let raw = || {
        tags.iter()
            .find(|tag| raw_keys.iter().any(|raw| tag.key.eq_ignore_ascii_case(raw)))
    };
    standard
        .or_else(raw)
        .and_then(|tag| clean_metadata_value(&tag.value.to_string()))
}

fn clean_metadata_value(value: &str) -> Option<String> {
    Some(value.trim()).filter(|value| !value.is_empty()).map(str::to_owned)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}
