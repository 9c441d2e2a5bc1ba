use crate::audio::{AudioEngine, NullAudioEngine, PlaylistPlayer, RodioAudioEngine};
use crate::config::{self, InputMode, Settings};
use crate::connectivity::SystemConnectivity;
use crate::headset::{MediaKeyQueue, apply_media_key};
use crate::input::{BUTTON_COUNT, ButtonMonitor, EventBuffer, open_gpio_lines};
use crate::nav::{Controller, TickOutcome};
use crate::pet::PetStore;
use crate::queue::PlaybackQueueEngine;
use crate::status::{JsonStatusFile, NullPublisher, StatusPublisher};
use crate::system::run_shutdown;
use crate::ui::{Renderer, TerminalRenderer};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Command-line overrides applied on top of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupOptions {
    pub music_dir: Option<PathBuf>,
    pub input: Option<InputMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press(usize),
    Hold(usize),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Quit,
    PowerOff,
}

/// Everything one tick touches, minus the display and the input source.
pub struct Device {
    pub queue: PlaybackQueueEngine,
    pub controller: Controller,
    publisher: Box<dyn StatusPublisher>,
    media_keys: MediaKeyQueue,
    last_tick: Instant,
}

impl Device {
    pub fn new(
        queue: PlaybackQueueEngine,
        controller: Controller,
        publisher: Box<dyn StatusPublisher>,
        now: Instant,
    ) -> Self {
        Self {
            queue,
            controller,
            publisher,
            media_keys: MediaKeyQueue::new(),
            last_tick: now,
        }
    }

    /// Producer side of the headset key queue drained every step.
    pub fn media_keys(&self) -> MediaKeyQueue {
        self.media_keys.clone()
    }

    /// One pass of the control loop: publish, feed the pet, advance playback,
    /// apply headset keys, dispatch the drained button edges and draw.
    pub fn step(
        &mut self,
        buffer: &EventBuffer,
        renderer: &mut dyn Renderer,
        now: Instant,
    ) -> Result<TickOutcome> {
        let record = self.queue.status_record();
        if let Err(err) = self.publisher.publish(&record) {
            log::warn!("status publish failed: {err:#}");
        }
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.controller.pet_mut().observe(&record, elapsed);

        if !self.queue.tick() {
            self.controller.playback_failed(now);
        }
        let step = self.controller.volume_step();
        for key in self.media_keys.drain() {
            let applied = apply_media_key(&mut self.queue, key, step);
            if !applied && self.queue.queue_tracks().next().is_some() {
                self.controller.playback_failed(now);
            }
        }

        let outcome = self.controller.handle(buffer.take(), &mut self.queue, now);
        renderer.set_backlight(self.controller.backlight());
        renderer.render(&self.controller.screen(&self.queue, now))?;
        Ok(outcome)
    }
}

pub fn run(options: StartupOptions) -> Result<()> {
    config::ensure_config_dir()?;
    init_logging(&config::log_path()?);

    let mut settings = config::load_settings().unwrap_or_else(|err| {
        log::warn!("using default settings: {err:#}");
        Settings::default()
    });
    if let Some(dir) = options.music_dir {
        settings.music_dir = dir;
    }
    if let Some(input) = options.input {
        settings.input = input;
    }
    log::info!(
        "tinplayer starting: music={} input={:?} tick={}ms",
        settings.music_dir.display(),
        settings.input,
        settings.tick_interval_ms
    );

    let engine: Box<dyn AudioEngine> = match RodioAudioEngine::new() {
        Ok(engine) => Box::new(engine),
        Err(err) => {
            log::warn!("no audio output, running silent: {err:#}");
            Box::new(NullAudioEngine::new())
        }
    };
    let mut queue = PlaybackQueueEngine::new(PlaylistPlayer::new(engine), settings.settle());
    queue.set_volume(settings.initial_volume.min(100));
    if !queue.load_library(&settings.music_dir) {
        log::warn!("no playable media under {}", settings.music_dir.display());
    }

    let connectivity = SystemConnectivity::new(
        config::connection_path()?,
        settings.tool_timeout(),
        settings.scan_window(),
    );
    let pet = PetStore::open(config::pet_path()?);
    let controller = Controller::new(Box::new(connectivity), pet, &settings);
    let publisher: Box<dyn StatusPublisher> = match &settings.status_path {
        Some(path) => Box::new(JsonStatusFile::new(path)),
        None => Box::new(NullPublisher),
    };
    let mut device = Device::new(queue, controller, publisher, Instant::now());

    let buffer = EventBuffer::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let monitor = match settings.input {
        InputMode::Gpio => {
            let lines = open_gpio_lines(&settings.gpio_pins);
            let monitor = ButtonMonitor::new(lines, settings.hold_threshold(), buffer.clone());
            Some(monitor.spawn(settings.poll_interval(), Arc::clone(&shutdown))?)
        }
        InputMode::Keyboard => None,
    };
    let headset = if settings.headset_keys {
        spawn_headset(&settings, device.media_keys(), &shutdown)?
    } else {
        None
    };

    let result = TerminalRenderer::new().and_then(|mut renderer| {
        run_loop(&mut device, &buffer, &mut renderer, settings.tick_interval())
    });

    shutdown.store(true, Ordering::Relaxed);
    for (name, handle) in [("button monitor", monitor), ("headset", headset)] {
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::warn!("{name} thread panicked");
        }
    }
    let save_result = device.controller.pet().save();

    let exit = result?;
    save_result?;
    if exit == LoopExit::PowerOff {
        run_shutdown(&settings.shutdown_command)?;
    }
    log::info!("tinplayer stopped");
    Ok(())
}

#[cfg(target_os = "linux")]
fn spawn_headset(
    settings: &Settings,
    keys: MediaKeyQueue,
    shutdown: &Arc<AtomicBool>,
) -> Result<Option<JoinHandle<()>>> {
    use crate::headset::{EvdevFinder, HeadsetMonitor};

    let finder = EvdevFinder::new(config::connection_path()?);
    let monitor = HeadsetMonitor::new(Box::new(finder), keys, settings.headset_retry());
    Ok(Some(monitor.spawn(settings.tick_interval(), Arc::clone(shutdown))?))
}

#[cfg(not(target_os = "linux"))]
fn spawn_headset(
    _settings: &Settings,
    _keys: MediaKeyQueue,
    _shutdown: &Arc<AtomicBool>,
) -> Result<Option<JoinHandle<()>>> {
    log::info!("headset keys are only read on Linux");
    Ok(None)
}

fn run_loop(
    device: &mut Device,
    buffer: &EventBuffer,
    renderer: &mut dyn Renderer,
    tick: Duration,
) -> Result<LoopExit> {
    loop {
        let started = Instant::now();
        if device.step(buffer, renderer, started)? == TickOutcome::Shutdown {
            return Ok(LoopExit::PowerOff);
        }

        while let Some(remaining) = tick.checked_sub(started.elapsed()) {
            if !event::poll(remaining)? {
                break;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            match key_action(key) {
                Some(KeyAction::Press(button)) => buffer.set_pressed(button),
                Some(KeyAction::Hold(button)) => buffer.set_held(button),
                Some(KeyAction::Quit) => return Ok(LoopExit::Quit),
                None => {}
            }
        }
    }
}

/// `a s d f` press buttons A..D, the shifted letters hold them.
pub fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let KeyCode::Char(ch) = key.code else {
        return None;
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return (ch == 'c').then_some(KeyAction::Quit);
    }
    if ch == 'q' {
        return Some(KeyAction::Quit);
    }

    let button = "asdf".find(ch.to_ascii_lowercase())?;
    debug_assert!(button < BUTTON_COUNT);
    if ch.is_ascii_uppercase() {
        Some(KeyAction::Hold(button))
    } else {
        Some(KeyAction::Press(button))
    }
}

/// The terminal owns stdout and stderr, so log lines go to a file.
fn init_logging(path: &Path) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    if let Err(err) = builder.try_init() {
        eprintln!("tinplayer: logging disabled: {err}");
    }
}
