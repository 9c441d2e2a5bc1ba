//! Media keys from a paired Bluetooth headset.
//!
//! BlueZ exposes a headset's AVRCP buttons as an evdev keyboard. A reader
//! thread finds that device, forwards key-down events into a
//! [`MediaKeyQueue`] and the main loop applies them to the play queue on its
//! next tick, so the queue engine is only ever touched from one thread.

use crate::queue::PlaybackQueueEngine;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKey {
    PlayPause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
}

/// Keys waiting for the main loop.
#[derive(Debug, Clone, Default)]
pub struct MediaKeyQueue {
    inner: Arc<Mutex<Vec<MediaKey>>>,
}

impl MediaKeyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, keys: impl IntoIterator<Item = MediaKey>) {
        let mut pending = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend(keys);
    }

    pub fn drain(&self) -> Vec<MediaKey> {
        let mut pending = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
    }
}

/// A connected headset. An error from `read_keys` means it went away.
pub trait KeySource: Send {
    /// Key-down events since the previous call, oldest first. Never blocks.
    fn read_keys(&mut self) -> Result<Vec<MediaKey>>;
}

pub trait HeadsetFinder: Send {
    fn find(&mut self) -> Option<Box<dyn KeySource>>;
}

/// Keeps one headset attached, looking for a new one every `retry` while
/// none is.
pub struct HeadsetMonitor {
    finder: Box<dyn HeadsetFinder>,
    source: Option<Box<dyn KeySource>>,
    keys: MediaKeyQueue,
    retry: Duration,
    next_search: Option<Instant>,
}

impl HeadsetMonitor {
    pub fn new(finder: Box<dyn HeadsetFinder>, keys: MediaKeyQueue, retry: Duration) -> Self {
        Self {
            finder,
            source: None,
            keys,
            retry,
            next_search: None,
        }
    }

    pub fn poll(&mut self, now: Instant) {
        if self.source.is_none() {
            if self.next_search.is_some_and(|due| now < due) {
                return;
            }
            self.source = self.finder.find();
            self.next_search = Some(now + self.retry);
            if self.source.is_some() {
                log::info!("headset attached");
            }
        }

        let Some(source) = self.source.as_mut() else {
            return;
        };
        match source.read_keys() {
            Ok(keys) => self.keys.push(keys),
            Err(err) => {
                log::info!("headset detached: {err:#}");
                self.source = None;
                self.next_search = Some(now + self.retry);
            }
        }
    }

    pub fn spawn(
        mut self,
        interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(String::from("headset-keys"))
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    self.poll(Instant::now());
                    thread::sleep(interval);
                }
            })
            .context("failed to spawn headset thread")
    }
}

/// Applies one key the way the Playing view would. Volume moves by `step`,
/// clamped to 0..=100. False when the queue refused the action.
pub fn apply_media_key(queue: &mut PlaybackQueueEngine, key: MediaKey, step: u8) -> bool {
    match key {
        MediaKey::PlayPause => queue.toggle_play(),
        MediaKey::Next => queue.next(),
        MediaKey::Previous => queue.previous(),
        MediaKey::VolumeUp => {
            queue.set_volume(queue.volume().saturating_add(step).min(100));
            true
        }
        MediaKey::VolumeDown => {
            queue.set_volume(queue.volume().saturating_sub(step));
            true
        }
    }
}

/// Which of `names` to listen to: the paired headset if its name is known,
/// else the first device announcing itself as an AVRCP control.
pub fn pick_headset<S: AsRef<str>>(names: &[S], paired: Option<&str>) -> Option<usize> {
    let paired = paired.filter(|name| !name.is_empty() && *name != "None");
    paired
        .and_then(|wanted| names.iter().position(|name| name.as_ref().contains(wanted)))
        .or_else(|| {
            names.iter().position(|name| {
                let name = name.as_ref();
                name.contains("AVRCP") || name.contains("Control")
            })
        })
}

#[cfg(target_os = "linux")]
pub use evdev_source::{EvdevFinder, EvdevHeadset};

#[cfg(target_os = "linux")]
mod evdev_source {
    use super::{HeadsetFinder, KeySource, MediaKey, pick_headset};
    use crate::connectivity::load_paired;
    use anyhow::{Context, Result};
    use evdev::{Device, InputEventKind, Key};
    use std::io;
    use std::os::fd::{AsRawFd, RawFd};
    use std::path::PathBuf;

    const KEY_DOWN: i32 = 1;

    impl MediaKey {
        pub fn from_key(key: Key) -> Option<Self> {
            match key {
                Key::KEY_PLAYPAUSE
                | Key::KEY_PLAY
                | Key::KEY_PAUSE
                | Key::KEY_PLAYCD
                | Key::KEY_PAUSECD => Some(Self::PlayPause),
                Key::KEY_NEXTSONG => Some(Self::Next),
                Key::KEY_PREVIOUSSONG => Some(Self::Previous),
                Key::KEY_VOLUMEUP => Some(Self::VolumeUp),
                Key::KEY_VOLUMEDOWN => Some(Self::VolumeDown),
                _ => None,
            }
        }
    }

    /// One evdev node, read without blocking.
    pub struct EvdevHeadset {
        device: Device,
        path: PathBuf,
    }

    impl EvdevHeadset {
        pub fn open(device: Device, path: PathBuf) -> Result<Self> {
            set_nonblocking(device.as_raw_fd())
                .with_context(|| format!("failed to make {} non-blocking", path.display()))?;
            Ok(Self { device, path })
        }
    }

    impl KeySource for EvdevHeadset {
        fn read_keys(&mut self) -> Result<Vec<MediaKey>> {
            match self.device.fetch_events() {
                Ok(events) => Ok(events
                    .filter(|event| event.value() == KEY_DOWN)
                    .filter_map(|event| match event.kind() {
                        InputEventKind::Key(key) => MediaKey::from_key(key),
                        _ => None,
                    })
                    .collect()),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
                Err(err) => {
                    Err(err).with_context(|| format!("failed to read {}", self.path.display()))
                }
            }
        }
    }

    /// Scans `/dev/input` for the paired headset, re-reading the paired
    /// device record on every search.
    pub struct EvdevFinder {
        connection_path: PathBuf,
    }

    impl EvdevFinder {
        pub fn new(connection_path: impl Into<PathBuf>) -> Self {
            Self {
                connection_path: connection_path.into(),
            }
        }
    }

    impl HeadsetFinder for EvdevFinder {
        fn find(&mut self) -> Option<Box<dyn KeySource>> {
            let paired = load_paired(&self.connection_path)
                .ok()
                .flatten()
                .map(|device| device.name);
            let mut devices: Vec<(PathBuf, Device)> = evdev::enumerate().collect();
            let names: Vec<String> = devices
                .iter()
                .map(|(_, device)| device.name().unwrap_or_default().to_string())
                .collect();
            let index = pick_headset(names.as_slice(), paired.as_deref())?;
            let (path, device) = devices.swap_remove(index);

            match EvdevHeadset::open(device, path) {
                Ok(headset) => {
                    log::info!("listening to {} at {}", names[index], headset.path.display());
                    Some(Box::new(headset))
                }
                Err(err) => {
                    log::warn!("headset unusable: {err:#}");
                    None
                }
            }
        }
    }

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{NullAudioEngine, PlaylistPlayer};
    use crate::library::LibraryIndex;
    use crate::model::{PlayerState, Track};
    use anyhow::anyhow;
    use std::collections::VecDeque;

    /// Replays scripted reads; `None` entries fail like a dropped connection.
    struct ScriptedSource(VecDeque<Option<Vec<MediaKey>>>);

    impl KeySource for ScriptedSource {
        fn read_keys(&mut self) -> Result<Vec<MediaKey>> {
            match self.0.pop_front() {
                Some(Some(keys)) => Ok(keys),
                Some(None) => Err(anyhow!("device gone")),
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedFinder {
        sources: Arc<Mutex<VecDeque<ScriptedSource>>>,
        searches: Arc<Mutex<usize>>,
    }

    impl HeadsetFinder for ScriptedFinder {
        fn find(&mut self) -> Option<Box<dyn KeySource>> {
            *self.searches.lock().expect("lock") += 1;
            let source = self.sources.lock().expect("lock").pop_front()?;
            Some(Box::new(source))
        }
    }

    fn finder_with(scripts: Vec<Vec<Option<Vec<MediaKey>>>>) -> ScriptedFinder {
        let finder = ScriptedFinder::default();
        finder.sources.lock().expect("lock").extend(
            scripts
                .into_iter()
                .map(|reads| ScriptedSource(reads.into_iter().collect())),
        );
        finder
    }

    fn queue() -> PlaybackQueueEngine {
        let player = PlaylistPlayer::new(Box::new(NullAudioEngine::new()));
        let mut queue = PlaybackQueueEngine::new(player, Duration::ZERO);
        queue.install_library(LibraryIndex::from_tracks(vec![
            Track::tagged("/m/a.mp3", "A", None, None),
            Track::tagged("/m/b.mp3", "B", None, None),
            Track::tagged("/m/c.mp3", "C", None, None),
        ]));
        queue
    }

    #[test]
    fn keys_from_an_attached_headset_reach_the_queue() {
        let finder = finder_with(vec![vec![
            Some(vec![MediaKey::PlayPause]),
            Some(vec![MediaKey::Next, MediaKey::VolumeUp]),
        ]]);
        let keys = MediaKeyQueue::new();
        let mut monitor = HeadsetMonitor::new(Box::new(finder), keys.clone(), Duration::from_secs(5));
        let now = Instant::now();
        monitor.poll(now);
        monitor.poll(now);

        let drained = keys.drain();
        assert_eq!(
            drained,
            vec![MediaKey::PlayPause, MediaKey::Next, MediaKey::VolumeUp]
        );
        assert!(keys.drain().is_empty());
    }

    #[test]
    fn lost_headset_is_searched_for_again_after_the_retry_delay() {
        let finder = finder_with(vec![vec![None], vec![Some(vec![MediaKey::Previous])]]);
        let searches = Arc::clone(&finder.searches);
        let keys = MediaKeyQueue::new();
        let retry = Duration::from_secs(5);
        let mut monitor = HeadsetMonitor::new(Box::new(finder), keys.clone(), retry);
        let start = Instant::now();

        monitor.poll(start);
        monitor.poll(start + Duration::from_secs(1));
        assert_eq!(*searches.lock().expect("lock"), 1);
        assert!(keys.drain().is_empty());

        monitor.poll(start + retry);
        assert_eq!(*searches.lock().expect("lock"), 2);
        assert_eq!(keys.drain(), vec![MediaKey::Previous]);
    }

    #[test]
    fn no_headset_means_no_keys() {
        let keys = MediaKeyQueue::new();
        let mut monitor = HeadsetMonitor::new(
            Box::new(ScriptedFinder::default()),
            keys.clone(),
            Duration::from_millis(1),
        );
        monitor.poll(Instant::now());
        assert!(keys.drain().is_empty());
    }

    #[test]
    fn media_keys_drive_playback_and_volume() {
        let mut queue = queue();
        queue.set_volume(98);

        assert!(apply_media_key(&mut queue, MediaKey::PlayPause, 5));
        assert_eq!(queue.state(), PlayerState::Playing);
        assert!(apply_media_key(&mut queue, MediaKey::Next, 5));
        assert_eq!(queue.now_playing().map(|now| now.title.as_str()), Some("B"));
        assert!(apply_media_key(&mut queue, MediaKey::Previous, 5));
        assert!(apply_media_key(&mut queue, MediaKey::Previous, 5));
        assert_eq!(queue.now_playing().map(|now| now.title.as_str()), Some("C"));

        apply_media_key(&mut queue, MediaKey::VolumeUp, 5);
        assert_eq!(queue.volume(), 100);
        apply_media_key(&mut queue, MediaKey::VolumeDown, 5);
        assert_eq!(queue.volume(), 95);
        queue.set_volume(3);
        apply_media_key(&mut queue, MediaKey::VolumeDown, 5);
        assert_eq!(queue.volume(), 0);

        assert!(apply_media_key(&mut queue, MediaKey::PlayPause, 5));
        assert_eq!(queue.state(), PlayerState::Paused);
    }

    #[test]
    fn paired_headset_is_preferred_over_generic_controls() {
        let names = ["Power Button", "Speaker AVRCP", "Buds Pro (AVRCP)"];
        assert_eq!(pick_headset(&names, Some("Buds Pro")), Some(2));
        assert_eq!(pick_headset(&names, None), Some(1));
        assert_eq!(pick_headset(&names, Some("None")), Some(1));
        assert_eq!(pick_headset(&names, Some("Gone")), Some(1));
        assert_eq!(pick_headset(&["Power Button"], None), None);
    }

    #[test]
    fn spawned_reader_stops_on_shutdown() {
        let monitor = HeadsetMonitor::new(
            Box::new(ScriptedFinder::default()),
            MediaKeyQueue::new(),
            Duration::from_millis(1),
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = monitor
            .spawn(Duration::from_millis(1), Arc::clone(&shutdown))
            .expect("spawn");
        shutdown.store(true, Ordering::Relaxed);
        handle.join().expect("join");
    }
}
