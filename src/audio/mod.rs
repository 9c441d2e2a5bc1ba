mod playlist;

pub use playlist::PlaylistPlayer;

use crate::library::probe_duration;
use anyhow::{Context, Result, anyhow};
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, DeviceSinkBuilder as OutputStreamBuilder, MixerDeviceSink as OutputStream, Player as Sink};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const MAX_VOLUME: f32 = 1.0;

/// Single-file output device. Sequencing lives in [`PlaylistPlayer`].
pub trait AudioEngine {
    /// Replaces the loaded track. On error the previous track stays loaded.
    fn play(&mut self, path: &Path) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn is_paused(&self) -> bool;
    fn current_track(&self) -> Option<&Path>;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn is_finished(&self) -> bool;
}

/// Plays through the system mixer via rodio.
pub struct RodioAudioEngine {
    stream: OutputStream,
    sink: Sink,
    loaded: Option<PathBuf>,
    length: Option<Duration>,
    gain: f32,
}

impl RodioAudioEngine {
    pub fn new() -> Result<Self> {
        let mut stream = {
            let _mute = StderrMute::engage();
            open_default_stream().or_else(|default_err| {
                log::warn!("default output unavailable: {default_err:#}");
                open_ranked_stream()
            })?
        };
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        log::info!("audio output ready");

        Ok(Self {
            stream,
            sink,
            loaded: None,
            length: None,
            gain: MAX_VOLUME,
        })
    }
}

fn open_default_stream() -> Result<OutputStream> {
    OutputStreamBuilder::from_default_device()
        .context("no default output device")?
        .with_error_callback(|err| log::warn!("output stream error: {err}"))
        .open_sink_or_fallback()
        .context("default output device refused to start")
}

/// Tries every output device, sound servers before ALSA defaults before raw
/// hardware.
fn open_ranked_stream() -> Result<OutputStream> {
    let host = rodio::cpal::default_host();
    let mut devices: Vec<_> = host
        .output_devices()
        .context("failed to list output devices")?
        .filter_map(|device| {
            let name = device.name().ok()?.to_ascii_lowercase();
            Some((device_rank(&name), name, device))
        })
        .collect();
    devices.sort_by(|(rank_a, name_a, _), (rank_b, name_b, _)| {
        rank_a.cmp(rank_b).then_with(|| name_a.cmp(name_b))
    });

    devices
        .into_iter()
        .find_map(|(_, name, device)| {
            let stream = OutputStreamBuilder::from_device(device)
                .ok()?
                .with_error_callback(|err| log::warn!("output stream error: {err}"))
                .open_sink_or_fallback()
                .ok()?;
            log::info!("using output device {name}");
            Some(stream)
        })
        .ok_or_else(|| anyhow!("no output device could be opened"))
}

fn device_rank(name: &str) -> u8 {
    if name.contains("pulse") || name.contains("pipewire") {
        0
    } else if name.contains("default") {
        1
    } else {
        2
    }
}

impl AudioEngine for RodioAudioEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let source =
            Decoder::try_from(file).with_context(|| format!("failed to decode {}", path.display()))?;

        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.set_volume(self.gain);
        self.length = source.total_duration().or_else(|| probe_duration(path));
        self.sink.append(source);
        self.loaded = Some(path.to_path_buf());
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn stop(&mut self) {
        self.sink.stop();
        self.loaded = None;
        self.length = None;
    }

    fn is_paused(&self) -> bool {
        self.sink.is_paused()
    }

    fn current_track(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.loaded.as_ref().map(|_| self.sink.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.length
    }

    fn volume(&self) -> f32 {
        self.gain
    }

    fn set_volume(&mut self, volume: f32) {
        self.gain = volume.clamp(0.0, MAX_VOLUME);
        self.sink.set_volume(self.gain);
    }

    fn is_finished(&self) -> bool {
        self.loaded.is_some() && !self.sink.is_paused() && self.sink.empty()
    }
}

/// Points fd 2 at /dev/null until dropped. ALSA probing is noisy and the
/// terminal front-end owns the screen.
struct StderrMute {
    #[cfg(unix)]
    saved: Option<libc::c_int>,
}

impl StderrMute {
    #[cfg(unix)]
    fn engage() -> Self {
        let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
        if saved < 0 {
            return Self { saved: None };
        }
        let null = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY) };
        if null >= 0 {
            unsafe {
                libc::dup2(null, libc::STDERR_FILENO);
                libc::close(null);
            }
        }
        Self { saved: Some(saved) }
    }

    #[cfg(not(unix))]
    fn engage() -> Self {
        Self {}
    }
}

impl Drop for StderrMute {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(saved) = self.saved.take() {
            unsafe {
                libc::dup2(saved, libc::STDERR_FILENO);
                libc::close(saved);
            }
        }
    }
}

/// Accumulated play time that only advances while running.
#[derive(Debug, Clone, Copy, Default)]
struct PlayClock {
    banked: Duration,
    running_since: Option<Instant>,
}

impl PlayClock {
    fn elapsed(&self) -> Duration {
        self.running_since
            .map_or(self.banked, |since| self.banked.saturating_add(since.elapsed()))
    }

    fn start(&mut self) {
        self.running_since.get_or_insert_with(Instant::now);
    }

    fn freeze(&mut self) {
        self.banked = self.elapsed();
        self.running_since = None;
    }
}

/// Clock-driven stand-in used when no output device exists, and in tests.
/// Track lengths come from the file headers unless pinned.
#[derive(Debug)]
pub struct NullAudioEngine {
    loaded: Option<PathBuf>,
    length: Option<Duration>,
    pinned_length: Option<Duration>,
    clock: PlayClock,
    paused: bool,
    gain: f32,
}

impl NullAudioEngine {
    pub fn new() -> Self {
        Self {
            loaded: None,
            length: None,
            pinned_length: None,
            clock: PlayClock::default(),
            paused: false,
            gain: MAX_VOLUME,
        }
    }

    /// Every track lasts `length` regardless of what the file says.
    pub fn with_track_duration(length: Duration) -> Self {
        Self {
            pinned_length: Some(length),
            ..Self::new()
        }
    }

    fn played(&self) -> Duration {
        let elapsed = self.clock.elapsed();
        self.length.map_or(elapsed, |length| elapsed.min(length))
    }
}

impl Default for NullAudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for NullAudioEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        self.length = self.pinned_length.or_else(|| probe_duration(path));
        self.loaded = Some(path.to_path_buf());
        self.clock = PlayClock::default();
        self.clock.start();
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.clock.freeze();
        self.paused = true;
    }

    fn resume(&mut self) {
        if self.loaded.is_some() {
            self.clock.start();
        }
        self.paused = false;
    }

    fn stop(&mut self) {
        self.loaded = None;
        self.length = None;
        self.clock = PlayClock::default();
        self.paused = false;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_track(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    fn position(&self) -> Option<Duration> {
        self.loaded.as_ref().map(|_| self.played())
    }

    fn duration(&self) -> Option<Duration> {
        self.length
    }

    fn volume(&self) -> f32 {
        self.gain
    }

    fn set_volume(&mut self, volume: f32) {
        self.gain = volume.clamp(0.0, MAX_VOLUME);
    }

    fn is_finished(&self) -> bool {
        match (self.loaded.as_ref(), self.length) {
            (Some(_), Some(length)) => !self.paused && self.clock.elapsed() >= length,
            _ => false,
        }
    }
}

/// Null engine that refuses one path, the way an undecodable file fails.
#[cfg(test)]
pub(crate) struct RefusingEngine {
    inner: NullAudioEngine,
    refused: PathBuf,
}

#[cfg(test)]
impl RefusingEngine {
    pub(crate) fn new(refused: impl Into<PathBuf>) -> Self {
        Self::around(NullAudioEngine::new(), refused)
    }

    pub(crate) fn around(inner: NullAudioEngine, refused: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            refused: refused.into(),
        }
    }
}

#[cfg(test)]
impl AudioEngine for RefusingEngine {
    fn play(&mut self, path: &Path) -> Result<()> {
        if path == self.refused {
            return Err(anyhow!("failed to decode {}", path.display()));
        }
        self.inner.play(path)
    }

    fn pause(&mut self) {
        self.inner.pause();
    }

    fn resume(&mut self) {
        self.inner.resume();
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    fn current_track(&self) -> Option<&Path> {
        self.inner.current_track()
    }

    fn position(&self) -> Option<Duration> {
        self.inner.position()
    }

    fn duration(&self) -> Option<Duration> {
        self.inner.duration()
    }

    fn volume(&self) -> f32 {
        self.inner.volume()
    }

    fn set_volume(&mut self, volume: f32) {
        self.inner.set_volume(volume);
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}
