use crate::audio::PlaylistPlayer;
use crate::library::LibraryIndex;
use crate::model::{Category, Filter, PlayerState, Track};
use crate::status::StatusRecord;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Cached tags of the entry under the queue cursor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub genre: String,
    pub path: PathBuf,
}

impl NowPlaying {
    fn from_track(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            artist: track.artist_label().to_string(),
            album: track.album_label().to_string(),
            year: track.year.clone().unwrap_or_default(),
            genre: track.genre.clone().unwrap_or_default(),
            path: track.path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// The live queue: library positions in play order, mirrored into the player.
pub struct PlaybackQueueEngine {
    library: LibraryIndex,
    player: PlaylistPlayer,
    queue: Vec<usize>,
    shuffle_enabled: bool,
    now_playing: Option<NowPlaying>,
    settle: Duration,
    rng: SmallRng,
}

impl PlaybackQueueEngine {
    pub fn new(player: PlaylistPlayer, settle: Duration) -> Self {
        Self {
            library: LibraryIndex::default(),
            player,
            queue: Vec::new(),
            shuffle_enabled: false,
            now_playing: None,
            settle,
            rng: rand::make_rng(),
        }
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn load_library(&mut self, root: &Path) -> bool {
        self.install_library(LibraryIndex::scan(root))
    }

    /// Re-walks the root of the current library. Fails for an index that was
    /// never scanned from disk.
    pub fn rescan(&mut self) -> bool {
        if self.library.root().is_none() {
            return false;
        }
        self.player.stop();
        let mut library = std::mem::take(&mut self.library);
        library.rescan();
        self.install_library(library)
    }

    /// Replaces the library and queues all of it, cued up on the first entry
    /// but paused so nothing is heard until the user asks for it.
    pub fn install_library(&mut self, library: LibraryIndex) -> bool {
        self.library = library;
        self.shuffle_enabled = false;
        self.queue = (0..self.library.len()).collect();
        self.player.load_list(self.queue_paths());

        if self.queue.is_empty() {
            self.now_playing = None;
            log::warn!("library is empty, no media to play");
            return false;
        }

        if self.start_at(0) {
            self.player.pause();
        }
        true
    }

    pub fn library(&self) -> &LibraryIndex {
        &self.library
    }

    pub fn has_media(&self) -> bool {
        !self.library.is_empty()
    }

    pub fn enumerate(
        &self,
        category: Category,
        artist_filter: Option<&str>,
        album_filter: Option<&str>,
    ) -> Vec<String> {
        self.library.enumerate(category, artist_filter, album_filter)
    }

    /// Installs the matching tracks and plays from the head of the new queue.
    /// False when there is no library or the backend refused the first entry.
    pub fn filter_queue(&mut self, filter: Filter) -> bool {
        if !self.has_media() {
            return false;
        }

        self.queue = self.library.matching(&filter);
        self.shuffle_enabled = false;
        log::info!(
            "queue filtered by {:?} {:?}: {} tracks",
            filter.category,
            filter.value,
            self.queue.len()
        );

        self.player.load_list(self.queue_paths());
        if self.queue.is_empty() {
            self.now_playing = None;
            return true;
        }
        self.start_at(0)
    }

    /// Enabling keeps the current track in front and permutes the rest;
    /// disabling puts the queue back into library order. Audio is not interrupted.
    pub fn shuffle(&mut self, enable: bool) -> bool {
        if self.queue.is_empty() {
            return false;
        }

        let current = self.current_library_index();
        if enable {
            let mut rest: Vec<usize> = self
                .queue
                .iter()
                .copied()
                .filter(|entry| Some(*entry) != current)
                .collect();
            rest.shuffle(&mut self.rng);
            self.queue = current.into_iter().chain(rest).collect();
        } else {
            self.queue.sort_unstable();
        }
        self.shuffle_enabled = enable;

        let cursor = self.position_of(current);
        self.player.replace_list(self.queue_paths(), cursor);
        log::info!("shuffle {}", if enable { "on" } else { "off" });
        true
    }

    pub fn toggle_shuffle(&mut self) -> Option<bool> {
        let enable = !self.shuffle_enabled;
        self.shuffle(enable).then_some(enable)
    }

    pub fn sort_alphabetical(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }

        let current = self.current_library_index();
        let library = &self.library;
        self.queue.sort_by_cached_key(|index| {
            let title = library
                .get(*index)
                .map(|track| track.title.to_lowercase())
                .unwrap_or_default();
            (title, *index)
        });
        if let Some(offset) = current.and_then(|index| self.queue.iter().position(|entry| *entry == index)) {
            self.queue.rotate_left(offset);
        }
        self.shuffle_enabled = false;

        self.player.replace_list(self.queue_paths(), 0);
        log::info!("queue sorted alphabetically");
        true
    }

    /// False when the queue is empty or the backend refused the next entry;
    /// the cursor then stays where it was.
    pub fn next(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        let moved = succeeded(self.player.next(), "next track");
        self.settle();
        self.refresh_now_playing();
        moved
    }

    pub fn previous(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        let moved = succeeded(self.player.previous(), "previous track");
        self.settle();
        self.refresh_now_playing();
        moved
    }

    pub fn play_index(&mut self, index: usize) -> bool {
        if index >= self.queue.len() {
            return false;
        }
        self.start_at(index)
    }

    /// Pauses when playing, plays otherwise. False when there is nothing to
    /// play or the backend refused.
    pub fn toggle_play(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        if self.player.state() == PlayerState::Playing {
            self.player.pause();
            return true;
        }
        let started = succeeded(self.player.play(), "play");
        self.refresh_now_playing();
        started
    }

    /// Auto-advance hook for the main loop. False when the backend could not
    /// start the following entry.
    pub fn tick(&mut self) -> bool {
        match self.player.tick() {
            Ok(advanced) => {
                if advanced {
                    self.refresh_now_playing();
                }
                true
            }
            Err(err) => {
                log::warn!("auto-advance failed: {err:#}");
                false
            }
        }
    }

    pub fn state(&self) -> PlayerState {
        self.player.state()
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle_enabled
    }

    pub fn volume(&self) -> u8 {
        self.player.volume()
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.player.set_volume(volume.min(100));
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.player.elapsed_ms().unwrap_or(0)
    }

    /// Backend length when known, else the parsed tag duration.
    pub fn total_ms(&self) -> u64 {
        self.player
            .total_ms()
            .or_else(|| {
                self.current_track()
                    .and_then(Track::duration)
                    .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            })
            .unwrap_or(0)
    }

    pub fn progress_percent(&self) -> u8 {
        let total = self.total_ms();
        if total == 0 {
            return 0;
        }
        (self.elapsed_ms().min(total) * 100 / total) as u8
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_library_index()
            .and_then(|index| self.library.get(index))
    }

    pub fn queue_tracks(&self) -> impl Iterator<Item = &Track> {
        self.queue.iter().filter_map(|index| self.library.get(*index))
    }

    pub fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.queue_tracks()
            .map(|track| QueueEntry {
                title: track.title.clone(),
                artist: track.artist_label().to_string(),
                album: track.album_label().to_string(),
            })
            .collect()
    }

    pub fn status_record(&self) -> StatusRecord {
        let now = self.now_playing.clone().unwrap_or_default();
        StatusRecord {
            title: now.title,
            artist: now.artist,
            album: now.album,
            position: self.progress_percent(),
            duration: format_ms(self.total_ms()),
            shuffle: self.shuffle_enabled,
            volume: self.volume(),
            file_path: self.now_playing.as_ref().map(|now| now.path.clone()),
            status: self.state().label().to_string(),
        }
    }

    fn current_library_index(&self) -> Option<usize> {
        self.player
            .cursor()
            .and_then(|cursor| self.queue.get(cursor))
            .copied()
    }

    fn position_of(&self, library_index: Option<usize>) -> usize {
        library_index
            .and_then(|index| self.queue.iter().position(|entry| *entry == index))
            .unwrap_or(0)
    }

    fn queue_paths(&self) -> Vec<PathBuf> {
        self.queue_tracks().map(|track| track.path.clone()).collect()
    }

    fn start_at(&mut self, position: usize) -> bool {
        let started = succeeded(self.player.play_index(position), "queue entry");
        self.settle();
        self.refresh_now_playing();
        started
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
    }

    fn refresh_now_playing(&mut self) {
        self.now_playing = self.current_track().map(NowPlaying::from_track);
    }
}

fn succeeded(result: anyhow::Result<()>, what: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            log::warn!("{what} failed: {err:#}");
            false
        }
    }
}

pub fn format_ms(ms: u64) -> String {
    let seconds = ms / 1_000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{NullAudioEngine, RefusingEngine};
    use proptest::prop_assert_eq;

    fn engine_with(tracks: Vec<Track>) -> PlaybackQueueEngine {
        let player = PlaylistPlayer::new(Box::new(NullAudioEngine::new()));
        let mut engine = PlaybackQueueEngine::new(player, Duration::ZERO).with_rng_seed(7);
        engine.install_library(LibraryIndex::from_tracks(tracks));
        engine
    }

    fn scenario() -> PlaybackQueueEngine {
        engine_with(vec![
            Track::tagged("/m/a.mp3", "A", Some("X"), Some("M")),
            Track::tagged("/m/b.mp3", "B", Some("X"), Some("N")),
            Track::tagged("/m/c.mp3", "C", Some("Y"), Some("M")),
        ])
    }

    fn titles(engine: &PlaybackQueueEngine) -> Vec<String> {
        engine.queue_tracks().map(|track| track.title.clone()).collect()
    }

    fn refusing(path: &str) -> PlaybackQueueEngine {
        let player = PlaylistPlayer::new(Box::new(RefusingEngine::new(path)));
        let mut engine = PlaybackQueueEngine::new(player, Duration::ZERO);
        engine.install_library(LibraryIndex::from_tracks(vec![
            Track::tagged("/m/a.mp3", "A", Some("X"), Some("M")),
            Track::tagged("/m/b.mp3", "B", Some("X"), Some("N")),
            Track::tagged("/m/c.mp3", "C", Some("Y"), Some("M")),
        ]));
        engine
    }

    fn titled(titles: &[&str]) -> Vec<Track> {
        titles
            .iter()
            .enumerate()
            .map(|(n, title)| Track::tagged(format!("/m/{n:02}.mp3"), title, None, None))
            .collect()
    }

    fn numbered(count: usize) -> Vec<Track> {
        (0..count)
            .map(|n| Track::tagged(format!("/m/{n:02}.mp3"), &format!("song {}", count - n), None, None))
            .collect()
    }

    #[test]
    fn library_boots_paused_on_first_track() {
        let engine = scenario();
        assert_eq!(engine.state(), PlayerState::Paused);
        assert_eq!(engine.now_playing().map(|now| now.title.as_str()), Some("A"));
        assert_eq!(titles(&engine), vec!["A", "B", "C"]);
    }

    #[test]
    fn artist_filter_keeps_relative_order() {
        let mut engine = scenario();
        assert!(engine.filter_queue(Filter::artist("X")));
        assert_eq!(titles(&engine), vec!["A", "B"]);
        assert_eq!(engine.state(), PlayerState::Playing);
    }

    #[test]
    fn unrelated_filter_restarts_from_head() {
        let mut engine = scenario();
        assert!(engine.filter_queue(Filter::artist("Y")));
        assert_eq!(titles(&engine), vec!["C"]);
        assert_eq!(engine.current_track().map(|t| t.title.as_str()), Some("C"));
    }

    #[test]
    fn filter_restarts_at_head_even_when_current_survives() {
        let mut engine = scenario();
        engine.next();
        assert_eq!(engine.current_track().map(|t| t.title.as_str()), Some("B"));

        assert!(engine.filter_queue(Filter::artist("X")));
        assert_eq!(engine.current_track().map(|t| t.title.as_str()), Some("A"));
        assert_eq!(titles(&engine).first().map(String::as_str), Some("A"));
        assert_eq!(engine.state(), PlayerState::Playing);
    }

    #[test]
    fn refused_head_after_filter_reports_failure() {
        let mut engine = refusing("/m/c.mp3");
        assert!(!engine.filter_queue(Filter::artist("Y")));
        assert_eq!(engine.state(), PlayerState::Stopped);
    }

    #[test]
    fn refused_next_keeps_cursor_and_now_playing() {
        let mut engine = refusing("/m/b.mp3");
        assert!(engine.toggle_play());

        assert!(!engine.next());
        assert_eq!(engine.now_playing().map(|now| now.title.as_str()), Some("A"));
        assert_eq!(engine.state(), PlayerState::Playing);

        assert!(engine.previous());
        assert_eq!(engine.now_playing().map(|now| now.title.as_str()), Some("C"));
    }

    #[test]
    fn rescan_picks_up_new_files_under_the_same_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.mp3"), b"x").expect("write");
        let player = PlaylistPlayer::new(Box::new(NullAudioEngine::new()));
        let mut engine = PlaybackQueueEngine::new(player, Duration::ZERO);
        assert!(engine.load_library(dir.path()));
        assert_eq!(engine.library().len(), 1);

        std::fs::write(dir.path().join("b.mp3"), b"x").expect("write");
        assert!(engine.rescan());
        assert_eq!(engine.library().len(), 2);
        assert_eq!(engine.library().root(), Some(dir.path()));
        assert_eq!(engine.state(), PlayerState::Paused);
    }

    #[test]
    fn rescan_without_a_root_fails() {
        let mut engine = scenario();
        assert!(!engine.rescan());
        assert_eq!(engine.library().len(), 3);
    }

    #[test]
    fn filter_to_nothing_leaves_stopped_empty_queue() {
        let mut engine = scenario();
        assert!(engine.filter_queue(Filter::artist("Nobody")));
        assert!(engine.queue_snapshot().is_empty());
        assert_eq!(engine.state(), PlayerState::Stopped);
        assert!(!engine.next());
        assert!(!engine.shuffle(true));
        assert!(!engine.sort_alphabetical());
    }

    #[test]
    fn empty_library_makes_every_operation_fail() {
        let mut engine = engine_with(Vec::new());
        assert!(!engine.has_media());
        assert!(!engine.filter_queue(Filter::all()));
        assert!(!engine.shuffle(true));
        assert!(!engine.sort_alphabetical());
        assert!(!engine.next());
        assert!(!engine.previous());
        assert!(!engine.toggle_play());
        assert_eq!(engine.toggle_shuffle(), None);
        assert_eq!(engine.status_record().status, "Stopped");
    }

    #[test]
    fn album_filter_uses_artist_context() {
        let mut engine = scenario();
        engine.filter_queue(Filter::album("M", Some("Y")));
        assert_eq!(titles(&engine), vec!["C"]);
        engine.filter_queue(Filter::album("M", None));
        assert_eq!(titles(&engine), vec!["A", "C"]);
    }

    #[test]
    fn sort_rotates_current_track_to_front_and_clears_shuffle() {
        let mut engine = engine_with(numbered(5));
        engine.shuffle(true);
        assert!(engine.shuffle_enabled());
        engine.play_index(2);
        let current = engine.current_track().map(|t| t.title.clone());

        assert!(engine.sort_alphabetical());
        assert!(!engine.shuffle_enabled());
        assert_eq!(titles(&engine).first().cloned(), current);
        assert_eq!(engine.current_track().map(|t| t.title.clone()), current);
    }

    #[test]
    fn sort_breaks_title_ties_by_library_position() {
        let mut engine = engine_with(titled(&["a", "intro", "Intro", "z"]));
        engine.play_index(2);

        assert!(engine.sort_alphabetical());
        let once: Vec<PathBuf> = engine.queue_tracks().map(|t| t.path.clone()).collect();
        assert_eq!(
            once,
            ["/m/02.mp3", "/m/03.mp3", "/m/00.mp3", "/m/01.mp3"].map(PathBuf::from)
        );

        engine.sort_alphabetical();
        let twice: Vec<PathBuf> = engine.queue_tracks().map(|t| t.path.clone()).collect();
        assert_eq!(twice, once);
    }

    #[test]
    fn shuffle_off_restores_library_order_without_losing_current() {
        let mut engine = engine_with(numbered(6));
        engine.play_index(3);
        engine.shuffle(true);
        engine.shuffle(false);
        assert_eq!(
            engine.queue_tracks().map(|t| t.path.clone()).collect::<Vec<_>>(),
            engine.library().tracks().iter().map(|t| t.path.clone()).collect::<Vec<_>>()
        );
        assert_eq!(engine.current_track().map(|t| t.path.clone()), Some(PathBuf::from("/m/03.mp3")));
    }

    #[test]
    fn toggle_shuffle_flips_shared_flag() {
        let mut engine = scenario();
        assert_eq!(engine.toggle_shuffle(), Some(true));
        assert!(engine.status_record().shuffle);
        assert_eq!(engine.toggle_shuffle(), Some(false));
        assert!(!engine.shuffle_enabled());
    }

    #[test]
    fn toggle_play_alternates() {
        let mut engine = scenario();
        assert!(engine.toggle_play());
        assert_eq!(engine.state(), PlayerState::Playing);
        assert!(engine.toggle_play());
        assert_eq!(engine.state(), PlayerState::Paused);
    }

    #[test]
    fn next_wraps_and_refreshes_now_playing() {
        let mut engine = scenario();
        engine.previous();
        assert_eq!(engine.now_playing().map(|now| now.title.as_str()), Some("C"));
        engine.next();
        assert_eq!(engine.now_playing().map(|now| now.title.as_str()), Some("A"));
    }

    #[test]
    fn status_record_reflects_now_playing() {
        let mut engine = scenario();
        engine.set_volume(40);
        let record = engine.status_record();
        assert_eq!(record.title, "A");
        assert_eq!(record.artist, "X");
        assert_eq!(record.volume, 40);
        assert_eq!(record.file_path, Some(PathBuf::from("/m/a.mp3")));
        assert_eq!(record.status, "Paused");
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_ms(0), "0:00");
        assert_eq!(format_ms(61_500), "1:01");
        assert_eq!(format_ms(600_000), "10:00");
    }

    proptest::proptest! {
        #[test]
        fn filter_all_restores_library_order(ops in proptest::collection::vec(0u8..4, 0..20)) {
            let mut engine = scenario();
            for op in ops {
                let filter = match op {
                    0 => Filter::artist("X"),
                    1 => Filter::album("M", None),
                    2 => Filter::song("C"),
                    _ => Filter::artist("Nobody"),
                };
                engine.filter_queue(filter);
            }
            engine.filter_queue(Filter::all());
            prop_assert_eq!(titles(&engine), vec!["A", "B", "C"]);
        }

        #[test]
        fn shuffle_anchors_current_track(len in 1usize..30, start in 0usize..30, seed in 0u64..1000) {
            let mut engine = engine_with(numbered(len)).with_rng_seed(seed);
            engine.play_index(start % len);
            let before = engine.current_track().map(|t| t.path.clone());

            engine.shuffle(true);
            let head = engine.queue_tracks().next().map(|t| t.path.clone());
            prop_assert_eq!(head, before.clone());
            prop_assert_eq!(engine.current_track().map(|t| t.path.clone()), before);
            prop_assert_eq!(engine.queue_snapshot().len(), len);
        }

        #[test]
        fn sort_is_idempotent(len in 1usize..30, start in 0usize..30, seed in 0u64..1000) {
            let mut engine = engine_with(numbered(len)).with_rng_seed(seed);
            engine.shuffle(true);
            engine.play_index(start % len);

            engine.sort_alphabetical();
            let once = titles(&engine);
            engine.sort_alphabetical();
            prop_assert_eq!(titles(&engine), once);
        }

        #[test]
        fn sort_is_idempotent_with_repeated_titles(
            names in proptest::collection::vec(proptest::sample::select(vec!["a", "intro", "Intro", "z"]), 1..20),
            start in 0usize..20,
            seed in 0u64..1000,
        ) {
            let len = names.len();
            let mut engine = engine_with(titled(&names)).with_rng_seed(seed);
            engine.shuffle(true);
            engine.play_index(start % len);
            let current = engine.current_track().map(|t| t.path.clone());

            engine.sort_alphabetical();
            let once: Vec<PathBuf> = engine.queue_tracks().map(|t| t.path.clone()).collect();
            engine.sort_alphabetical();
            let twice: Vec<PathBuf> = engine.queue_tracks().map(|t| t.path.clone()).collect();
            prop_assert_eq!(&twice, &once);
            prop_assert_eq!(once.first().cloned(), current);
        }
    }
}
