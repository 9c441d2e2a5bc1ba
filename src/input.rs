//! Button sampling and the press/hold event buffer shared with the main loop.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub const BUTTON_COUNT: usize = 4;

pub const BUTTON_A: usize = 0;
pub const BUTTON_B: usize = 1;
pub const BUTTON_C: usize = 2;
pub const BUTTON_D: usize = 3;

/// Edge flags for one tick: `pressed` for short presses, `held` for holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonEvents {
    pub pressed: [bool; BUTTON_COUNT],
    pub held: [bool; BUTTON_COUNT],
}

impl ButtonEvents {
    pub fn press(button: usize) -> Self {
        let mut events = Self::default();
        if let Some(flag) = events.pressed.get_mut(button) {
            *flag = true;
        }
        events
    }

    pub fn hold(button: usize) -> Self {
        let mut events = Self::default();
        if let Some(flag) = events.held.get_mut(button) {
            *flag = true;
        }
        events
    }

    pub fn is_empty(&self) -> bool {
        !self.pressed.iter().chain(self.held.iter()).any(|flag| *flag)
    }

    /// Reads and clears a press flag.
    pub fn take_press(&mut self, button: usize) -> bool {
        self.pressed
            .get_mut(button)
            .is_some_and(|flag| std::mem::take(flag))
    }

    pub fn take_hold(&mut self, button: usize) -> bool {
        self.held
            .get_mut(button)
            .is_some_and(|flag| std::mem::take(flag))
    }
}

/// Flags accumulate until the consumer takes them; the whole pair is guarded by one lock.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    inner: Arc<Mutex<ButtonEvents>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pressed(&self, button: usize) {
        let mut events = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flag) = events.pressed.get_mut(button) {
            *flag = true;
        }
    }

    pub fn set_held(&self, button: usize) {
        let mut events = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flag) = events.held.get_mut(button) {
            *flag = true;
        }
    }

    pub fn take(&self) -> ButtonEvents {
        let mut events = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *events)
    }
}

/// One digital input. `read` reports whether the button is currently down.
pub trait InputLine: Send {
    fn read(&mut self) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
struct LineState {
    down: bool,
    pressed_at: Option<Instant>,
}

/// Turns raw line levels into release-time press/hold edges.
pub struct ButtonMonitor {
    lines: Vec<Option<Box<dyn InputLine>>>,
    states: [LineState; BUTTON_COUNT],
    hold_threshold: Duration,
    events: EventBuffer,
}

impl ButtonMonitor {
    /// `lines[i]` drives button `i`; `None` entries are lines that failed to open.
    pub fn new(
        lines: Vec<Option<Box<dyn InputLine>>>,
        hold_threshold: Duration,
        events: EventBuffer,
    ) -> Self {
        Self {
            lines,
            states: [LineState::default(); BUTTON_COUNT],
            hold_threshold,
            events,
        }
    }

    /// One sampling pass over every line.
    pub fn poll(&mut self, now: Instant) {
        for (index, line) in self.lines.iter_mut().enumerate().take(BUTTON_COUNT) {
            let Some(line) = line else {
                continue;
            };
            let Ok(down) = line.read() else {
                continue;
            };

            let state = &mut self.states[index];
            match (state.down, down) {
                (false, true) => {
                    state.down = true;
                    state.pressed_at = Some(now);
                }
                (true, false) => {
                    let held_for = state
                        .pressed_at
                        .map_or(Duration::ZERO, |pressed_at| now.saturating_duration_since(pressed_at));
                    if held_for >= self.hold_threshold {
                        self.events.set_held(index);
                    } else {
                        self.events.set_pressed(index);
                    }
                    *state = LineState::default();
                }
                _ => {}
            }
        }
    }

    pub fn spawn(mut self, interval: Duration, shutdown: Arc<AtomicBool>) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(String::from("button-monitor"))
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    self.poll(Instant::now());
                    thread::sleep(interval);
                }
            })
            .context("failed to spawn button monitor thread")
    }
}

/// Active-low line behind the sysfs GPIO interface.
pub struct SysfsLine {
    value_path: PathBuf,
}

impl SysfsLine {
    const GPIO_ROOT: &'static str = "/sys/class/gpio";

    pub fn open(pin: u32) -> Result<Self> {
        let root = PathBuf::from(Self::GPIO_ROOT);
        let pin_dir = root.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("failed to export gpio {pin}"))?;
        }
        fs::write(pin_dir.join("direction"), "in")
            .with_context(|| format!("failed to set gpio {pin} as input"))?;

        let value_path = pin_dir.join("value");
        fs::read_to_string(&value_path)
            .with_context(|| format!("failed to read {}", value_path.display()))?;
        Ok(Self { value_path })
    }
}

impl InputLine for SysfsLine {
    fn read(&mut self) -> Result<bool> {
        let raw = fs::read_to_string(&self.value_path)
            .with_context(|| format!("failed to read {}", self.value_path.display()))?;
        Ok(raw.trim() == "0")
    }
}

/// Opens each pin, logging and leaving a gap for any that fail.
pub fn open_gpio_lines(pins: &[u32]) -> Vec<Option<Box<dyn InputLine>>> {
    pins.iter()
        .take(BUTTON_COUNT)
        .map(|pin| match SysfsLine::open(*pin) {
            Ok(line) => {
                log::info!("button line on gpio {pin} ready");
                Some(Box::new(line) as Box<dyn InputLine>)
            }
            Err(err) => {
                log::warn!("button line on gpio {pin} unavailable: {err:#}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicBool;

    #[derive(Clone, Default)]
    struct FakeLine {
        down: Arc<AtomicBool>,
        broken: Arc<AtomicBool>,
    }

    impl InputLine for FakeLine {
        fn read(&mut self) -> Result<bool> {
            if self.broken.load(Ordering::Relaxed) {
                return Err(anyhow!("line read failed"));
            }
            Ok(self.down.load(Ordering::Relaxed))
        }
    }

    fn monitor_with(line: &FakeLine, threshold_ms: u64) -> (ButtonMonitor, EventBuffer) {
        let events = EventBuffer::new();
        let lines: Vec<Option<Box<dyn InputLine>>> =
            vec![None, None, Some(Box::new(line.clone())), None];
        let monitor = ButtonMonitor::new(lines, Duration::from_millis(threshold_ms), events.clone());
        (monitor, events)
    }

    fn press_for(monitor: &mut ButtonMonitor, line: &FakeLine, start: Instant, held_ms: u64) {
        line.down.store(true, Ordering::Relaxed);
        monitor.poll(start);
        monitor.poll(start + Duration::from_millis(held_ms / 2));
        line.down.store(false, Ordering::Relaxed);
        monitor.poll(start + Duration::from_millis(held_ms));
    }

    #[test]
    fn short_release_sets_only_press() {
        let line = FakeLine::default();
        let (mut monitor, events) = monitor_with(&line, 500);
        press_for(&mut monitor, &line, Instant::now(), 120);

        let taken = events.take();
        assert_eq!(taken, ButtonEvents::press(BUTTON_C));
        assert!(events.take().is_empty());
    }

    #[test]
    fn long_release_sets_only_hold() {
        let line = FakeLine::default();
        let (mut monitor, events) = monitor_with(&line, 500);
        press_for(&mut monitor, &line, Instant::now(), 500);
        assert_eq!(events.take(), ButtonEvents::hold(BUTTON_C));
    }

    #[test]
    fn nothing_fires_while_still_down() {
        let line = FakeLine::default();
        let (mut monitor, events) = monitor_with(&line, 500);
        let start = Instant::now();
        line.down.store(true, Ordering::Relaxed);
        monitor.poll(start);
        monitor.poll(start + Duration::from_secs(3));
        assert!(events.take().is_empty());
    }

    #[test]
    fn read_failures_are_ignored() {
        let line = FakeLine::default();
        let (mut monitor, events) = monitor_with(&line, 500);
        let start = Instant::now();
        line.down.store(true, Ordering::Relaxed);
        monitor.poll(start);
        line.broken.store(true, Ordering::Relaxed);
        line.down.store(false, Ordering::Relaxed);
        monitor.poll(start + Duration::from_millis(50));
        assert!(events.take().is_empty());

        line.broken.store(false, Ordering::Relaxed);
        monitor.poll(start + Duration::from_millis(60));
        assert_eq!(events.take(), ButtonEvents::press(BUTTON_C));
    }

    #[test]
    fn flags_accumulate_until_taken() {
        let events = EventBuffer::new();
        events.set_pressed(BUTTON_B);
        events.set_held(BUTTON_A);
        events.set_pressed(BUTTON_B);

        let mut taken = events.take();
        assert!(taken.take_press(BUTTON_B));
        assert!(!taken.take_press(BUTTON_B));
        assert!(taken.take_hold(BUTTON_A));
        assert!(taken.is_empty());
        assert!(events.take().is_empty());
    }

    #[test]
    fn out_of_range_buttons_are_ignored() {
        let events = EventBuffer::new();
        events.set_pressed(9);
        assert!(events.take().is_empty());
        assert!(!ButtonEvents::default().take_hold(9));
    }

    #[test]
    fn spawned_monitor_stops_on_shutdown() {
        let line = FakeLine::default();
        let (monitor, _events) = monitor_with(&line, 500);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = monitor
            .spawn(Duration::from_millis(1), Arc::clone(&shutdown))
            .expect("spawn");
        shutdown.store(true, Ordering::Relaxed);
        handle.join().expect("join");
    }

    proptest::proptest! {
        #[test]
        fn release_never_sets_both(held_ms in 0u64..2_000, threshold_ms in 1u64..1_000) {
            let line = FakeLine::default();
            let (mut monitor, events) = monitor_with(&line, threshold_ms);
            press_for(&mut monitor, &line, Instant::now(), held_ms);

            let taken = events.take();
            let expected = if held_ms >= threshold_ms {
                ButtonEvents::hold(BUTTON_C)
            } else {
                ButtonEvents::press(BUTTON_C)
            };
            proptest::prop_assert_eq!(taken, expected);
        }
    }
}
