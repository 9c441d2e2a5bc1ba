//! Menu state machine driven by button edges.
//!
//! Every forward transition pushes a [`BackstackFrame`] holding the complete
//! [`NavState`] before anything is changed, so "back" restores cursors and
//! selections exactly. Returning to the main menu empties the stack.

mod views;

use crate::config::Settings;
use crate::connectivity::{BtDevice, Connectivity};
use crate::input::{BUTTON_A, BUTTON_C, ButtonEvents};
use crate::model::{PlayerState, View};
use crate::pet::PetStore;
use crate::queue::{PlaybackQueueEngine, format_ms};
use crate::ui::{Screen, ScreenBody, StatusGlyphs};
use std::time::{Duration, Instant};

pub const PLAY_ALL: &str = "PLAY ALL";
pub const PLAYBACK_FAILED: &str = "Playback failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrillLevel {
    #[default]
    Root,
    Artist,
    Album,
}

impl DrillLevel {
    pub fn depth(self) -> u8 {
        match self {
            Self::Root => 0,
            Self::Artist => 1,
            Self::Album => 2,
        }
    }
}

/// Every cursor and selection the menus own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavState {
    pub header: String,
    pub items: Vec<String>,
    pub item_cursor: usize,
    pub level: DrillLevel,
    pub selected_artist: Option<String>,
    pub selected_album: Option<String>,
    pub category_cursor: usize,
    pub main_cursor: usize,
    pub settings_cursor: usize,
    pub settings_editing: bool,
    pub bluetooth_cursor: usize,
    pub wifi_cursor: usize,
    pub pairing_cursor: usize,
    pub shutdown_cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackstackFrame {
    pub view: View,
    pub state: NavState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Shutdown,
}

#[derive(Debug, Clone)]
struct Message {
    text: String,
    until: Instant,
}

/// Slow work deferred one tick so its progress message is on screen first.
#[derive(Debug, Clone)]
enum PendingAction {
    Rescan,
    Discover,
    Pair(BtDevice),
    Reconnect,
}

struct Ctx<'a> {
    events: ButtonEvents,
    queue: &'a mut PlaybackQueueEngine,
    now: Instant,
    outcome: TickOutcome,
}

type Handler = fn(&mut Controller, &mut Ctx<'_>);

fn handler_for(view: View) -> Handler {
    match view {
        View::MainMenu => views::main_menu,
        View::Playing => views::playing,
        View::CategorySelect => views::category_select,
        View::LibrarySelect => views::library_select,
        View::Settings => views::settings,
        View::BluetoothMenu => views::bluetooth_menu,
        View::WifiMenu => views::wifi_menu,
        View::PairingSelect => views::pairing_select,
        View::ConfirmShutdown => views::confirm_shutdown,
        View::Pet => views::pet,
        View::About => views::about,
    }
}

pub struct Controller {
    view: View,
    state: NavState,
    backstack: Vec<BackstackFrame>,
    message: Option<Message>,
    pending: Option<PendingAction>,
    backlight: bool,
    connectivity: Box<dyn Connectivity>,
    pet: PetStore,
    discovered: Vec<BtDevice>,
    bluetooth_on: bool,
    wifi_on: bool,
    about: Vec<String>,
    volume_step: u8,
    message_lifetime: Duration,
}

impl Controller {
    pub fn new(connectivity: Box<dyn Connectivity>, pet: PetStore, settings: &Settings) -> Self {
        Self {
            view: View::MainMenu,
            state: NavState::default(),
            backstack: Vec::new(),
            message: None,
            pending: None,
            backlight: true,
            connectivity,
            pet,
            discovered: Vec::new(),
            bluetooth_on: false,
            wifi_on: false,
            about: Vec::new(),
            volume_step: settings.volume_step.max(1),
            message_lifetime: settings.message_lifetime(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn state(&self) -> &NavState {
        &self.state
    }

    pub fn backstack(&self) -> &[BackstackFrame] {
        &self.backstack
    }

    pub fn backlight(&self) -> bool {
        self.backlight
    }

    pub fn volume_step(&self) -> u8 {
        self.volume_step
    }

    pub fn pet(&self) -> &PetStore {
        &self.pet
    }

    pub fn pet_mut(&mut self) -> &mut PetStore {
        &mut self.pet
    }

    pub fn message(&self, now: Instant) -> Option<&str> {
        self.message
            .as_ref()
            .filter(|message| now < message.until)
            .map(|message| message.text.as_str())
    }

    /// Consumes one tick's worth of button edges.
    pub fn handle(
        &mut self,
        events: ButtonEvents,
        queue: &mut PlaybackQueueEngine,
        now: Instant,
    ) -> TickOutcome {
        if let Some(action) = self.pending.take() {
            self.run_pending(action, queue, now);
        }
        if self.message.as_ref().is_some_and(|message| now >= message.until) {
            self.message = None;
        }

        let mut ctx = Ctx {
            events,
            queue,
            now,
            outcome: TickOutcome::Continue,
        };

        if ctx.events.take_hold(BUTTON_A) {
            self.backlight = !self.backlight;
            log::debug!("backlight {}", if self.backlight { "on" } else { "off" });
        }
        if ctx.events.take_press(BUTTON_A) {
            self.back();
        }
        if ctx.events.take_hold(BUTTON_C) {
            self.toggle_shuffle(&mut ctx);
        }

        handler_for(self.view)(self, &mut ctx);
        ctx.outcome
    }

    /// Pops one frame; an empty stack falls back to the main menu.
    pub fn back(&mut self) {
        match self.backstack.pop() {
            Some(frame) => {
                self.state = frame.state;
                self.set_view(frame.view);
                if frame.view == View::MainMenu {
                    self.backstack.clear();
                }
            }
            None => self.go_home(),
        }
    }

    pub fn go_home(&mut self) {
        self.backstack.clear();
        self.set_view(View::MainMenu);
    }

    fn descend(&mut self, to: View, mutate: impl FnOnce(&mut NavState)) {
        self.backstack.push(BackstackFrame {
            view: self.view,
            state: self.state.clone(),
        });
        mutate(&mut self.state);
        self.set_view(to);
    }

    fn set_view(&mut self, view: View) {
        if self.view != view {
            log::debug!("view {:?} -> {:?}", self.view, view);
        }
        self.view = view;
    }

    fn show_message(&mut self, text: &str, now: Instant) {
        self.message = Some(Message {
            text: text.to_string(),
            until: now + self.message_lifetime,
        });
    }

    /// Surfaces a backend refusal that happened outside button handling.
    pub fn playback_failed(&mut self, now: Instant) {
        self.show_message(PLAYBACK_FAILED, now);
    }

    fn defer(&mut self, action: PendingAction, text: &str, now: Instant) {
        self.show_message(text, now);
        self.pending = Some(action);
    }

    fn toggle_shuffle(&mut self, ctx: &mut Ctx<'_>) {
        match ctx.queue.toggle_shuffle() {
            Some(true) => self.show_message("Shuffle ON", ctx.now),
            Some(false) => self.show_message("Shuffle OFF", ctx.now),
            None => self.show_message("No media", ctx.now),
        }
    }

    fn refresh_radios(&mut self) {
        self.bluetooth_on = self.connectivity.bluetooth_on();
        self.wifi_on = self.connectivity.wifi_on();
    }

    fn run_pending(&mut self, action: PendingAction, queue: &mut PlaybackQueueEngine, now: Instant) {
        match action {
            PendingAction::Rescan => {
                let text = if queue.rescan() { "Done" } else { "No media" };
                self.show_message(text, now);
            }
            PendingAction::Discover => {
                self.discovered = self.connectivity.discover();
                self.message = None;
                self.descend(View::PairingSelect, |state| state.pairing_cursor = 0);
            }
            PendingAction::Pair(device) => {
                let text = if self.connectivity.pair(&device) {
                    "Paired"
                } else {
                    "Pairing failed"
                };
                self.show_message(text, now);
                self.refresh_radios();
                self.back();
            }
            PendingAction::Reconnect => {
                let text = if self.connectivity.reconnect() {
                    "Connected"
                } else {
                    "Connect failed"
                };
                self.show_message(text, now);
            }
        }
    }

    pub fn main_menu_items() -> Vec<String> {
        ["Now Playing", "Library", "Settings", "Pet", "About"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    pub fn category_items() -> Vec<String> {
        crate::model::Category::ALL
            .iter()
            .map(|category| category.label().to_string())
            .collect()
    }

    pub fn settings_items(&self, queue: &PlaybackQueueEngine) -> Vec<String> {
        let on_off = |flag: bool| if flag { "ON" } else { "OFF" };
        vec![
            format!("Shuffle: {}", on_off(queue.shuffle_enabled())),
            String::from("Sort A-Z"),
            format!("Light: {}", on_off(self.backlight)),
            format!("Vol: {}%", queue.volume()),
            String::from("Bluetooth"),
            String::from("Wi-Fi"),
            String::from("Rescan Lib"),
            String::from("Shutdown"),
        ]
    }

    pub fn bluetooth_items(&self) -> Vec<String> {
        let paired: String = self
            .connectivity
            .paired_name()
            .unwrap_or_else(|| String::from("None"))
            .chars()
            .take(10)
            .collect();
        vec![
            String::from("Pair New Device"),
            format!("Re-Pair {paired}"),
            format!("BT: {}", if self.bluetooth_on { "ON" } else { "OFF" }),
            String::from("Back"),
        ]
    }

    pub fn wifi_items(&self) -> Vec<String> {
        vec![
            format!("WiFi: {}", if self.wifi_on { "ON" } else { "OFF" }),
            String::from("Back"),
        ]
    }

    pub fn pairing_items(&self) -> Vec<String> {
        if self.discovered.is_empty() {
            return vec![String::from("No Devices Found"), String::from("Back")];
        }
        self.discovered
            .iter()
            .map(|device| device.name.clone())
            .collect()
    }

    pub fn shutdown_items() -> Vec<String> {
        vec![String::from("Cancel"), String::from("Power Off")]
    }

    /// Logical content for the current view.
    pub fn screen(&self, queue: &PlaybackQueueEngine, now: Instant) -> Screen {
        let status = StatusGlyphs {
            state: queue.state(),
            shuffle: queue.shuffle_enabled(),
        };
        if let Some(text) = self.message(now) {
            return Screen {
                header: String::new(),
                body: ScreenBody::Message(text.to_string()),
                status,
            };
        }

        let menu = |items: Vec<String>, selected: usize| ScreenBody::Menu {
            selected: clamp_cursor(selected, items.len()),
            items,
            editing: false,
        };
        let (header, body) = match self.view {
            View::MainMenu => (
                String::from("Main Menu"),
                menu(Self::main_menu_items(), self.state.main_cursor),
            ),
            View::Playing => now_playing_body(queue),
            View::CategorySelect => (
                String::from("Browse"),
                menu(Self::category_items(), self.state.category_cursor),
            ),
            View::LibrarySelect => (
                self.state.header.clone(),
                menu(self.state.items.clone(), self.state.item_cursor),
            ),
            View::Settings => {
                let items = self.settings_items(queue);
                (
                    String::from("Settings"),
                    ScreenBody::Menu {
                        selected: clamp_cursor(self.state.settings_cursor, items.len()),
                        items,
                        editing: self.state.settings_editing,
                    },
                )
            }
            View::BluetoothMenu => (
                String::from("Bluetooth"),
                menu(self.bluetooth_items(), self.state.bluetooth_cursor),
            ),
            View::WifiMenu => (
                String::from("Wi-Fi"),
                menu(self.wifi_items(), self.state.wifi_cursor),
            ),
            View::PairingSelect => (
                String::from("Select Device"),
                menu(self.pairing_items(), self.state.pairing_cursor),
            ),
            View::ConfirmShutdown => (
                String::from("Shutdown?"),
                menu(Self::shutdown_items(), self.state.shutdown_cursor),
            ),
            View::Pet => (String::from("Pet"), ScreenBody::Info(self.pet.lines())),
            View::About => (String::from("System Info"), ScreenBody::Info(self.about.clone())),
        };

        Screen {
            header,
            body,
            status,
        }
    }
}

fn now_playing_body(queue: &PlaybackQueueEngine) -> (String, ScreenBody) {
    let Some(now) = queue.now_playing().filter(|_| queue.state() != PlayerState::Stopped) else {
        return (String::from("Stopped"), ScreenBody::Empty);
    };

    let elapsed = queue.elapsed_ms();
    let total = queue.total_ms();
    let remaining = (total > elapsed).then(|| format!("-{}", format_ms(total - elapsed)));
    (
        String::from("Now Playing"),
        ScreenBody::NowPlaying {
            title: now.title.clone(),
            artist: now.artist.clone(),
            album: now.album.clone(),
            elapsed: format_ms(elapsed),
            remaining,
            progress: queue.progress_percent(),
        },
    )
}

/// Wrapping step; an empty list pins the cursor at zero.
fn step_cursor(cursor: usize, len: usize, forward: bool) -> usize {
    if len == 0 {
        return 0;
    }
    let cursor = cursor.min(len - 1);
    if forward {
        (cursor + 1) % len
    } else {
        (cursor + len - 1) % len
    }
}

fn clamp_cursor(cursor: usize, len: usize) -> usize {
    cursor.min(len.saturating_sub(1))
}

/// Applies B (back one) and D (forward one) presses to a list cursor.
fn move_cursor(events: &mut ButtonEvents, cursor: &mut usize, len: usize) {
    if events.take_press(crate::input::BUTTON_B) {
        *cursor = step_cursor(*cursor, len, false);
    }
    if events.take_press(crate::input::BUTTON_D) {
        *cursor = step_cursor(*cursor, len, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEngine, NullAudioEngine, PlaylistPlayer, RefusingEngine};
    use crate::input::{BUTTON_B, BUTTON_D};
    use crate::library::LibraryIndex;
    use crate::model::Track;

    #[derive(Default)]
    struct FakeRadios {
        bluetooth: bool,
        devices: Vec<BtDevice>,
        paired: Option<String>,
    }

    impl Connectivity for FakeRadios {
        fn bluetooth_on(&mut self) -> bool {
            self.bluetooth
        }
        fn set_bluetooth(&mut self, on: bool) -> bool {
            self.bluetooth = on;
            true
        }
        fn wifi_on(&mut self) -> bool {
            false
        }
        fn set_wifi(&mut self, _on: bool) -> bool {
            false
        }
        fn discover(&mut self) -> Vec<BtDevice> {
            self.devices.clone()
        }
        fn pair(&mut self, device: &BtDevice) -> bool {
            self.paired = Some(device.name.clone());
            true
        }
        fn reconnect(&mut self) -> bool {
            self.paired.is_some()
        }
        fn paired_name(&self) -> Option<String> {
            self.paired.clone()
        }
    }

    fn settings() -> Settings {
        Settings {
            settle_ms: 0,
            ..Settings::default()
        }
    }

    fn fixture(radios: FakeRadios) -> (Controller, PlaybackQueueEngine) {
        fixture_with(radios, Box::new(NullAudioEngine::new()))
    }

    fn fixture_with(
        radios: FakeRadios,
        engine: Box<dyn AudioEngine>,
    ) -> (Controller, PlaybackQueueEngine) {
        let player = PlaylistPlayer::new(engine);
        let mut queue = PlaybackQueueEngine::new(player, Duration::ZERO).with_rng_seed(1);
        queue.install_library(LibraryIndex::from_tracks(vec![
            Track::tagged("/m/a.mp3", "A", Some("X"), Some("M")),
            Track::tagged("/m/b.mp3", "B", Some("X"), Some("N")),
            Track::tagged("/m/c.mp3", "C", Some("Y"), Some("M")),
        ]));
        let controller = Controller::new(Box::new(radios), PetStore::in_memory(), &settings());
        (controller, queue)
    }

    fn press(controller: &mut Controller, queue: &mut PlaybackQueueEngine, button: usize) {
        controller.handle(ButtonEvents::press(button), queue, Instant::now());
    }

    #[test]
    fn cursor_steps_wrap_and_tolerate_empty_lists() {
        assert_eq!(step_cursor(0, 3, false), 2);
        assert_eq!(step_cursor(2, 3, true), 0);
        assert_eq!(step_cursor(7, 3, true), 0);
        assert_eq!(step_cursor(5, 0, true), 0);
        assert_eq!(clamp_cursor(9, 4), 3);
        assert_eq!(clamp_cursor(9, 0), 0);
    }

    #[test]
    fn back_from_main_menu_stays_home() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        press(&mut controller, &mut queue, BUTTON_A);
        assert_eq!(controller.view(), View::MainMenu);
        assert!(controller.backstack().is_empty());
    }

    #[test]
    fn descending_pushes_state_before_mutation() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        press(&mut controller, &mut queue, BUTTON_D);
        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::CategorySelect);

        let frame = &controller.backstack()[0];
        assert_eq!(frame.view, View::MainMenu);
        assert_eq!(frame.state.main_cursor, 1);
    }

    #[test]
    fn returning_to_main_menu_clears_stack() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        press(&mut controller, &mut queue, BUTTON_D);
        press(&mut controller, &mut queue, BUTTON_C);
        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::LibrarySelect);
        assert_eq!(controller.backstack().len(), 2);

        press(&mut controller, &mut queue, BUTTON_A);
        press(&mut controller, &mut queue, BUTTON_A);
        assert_eq!(controller.view(), View::MainMenu);
        assert!(controller.backstack().is_empty());
        assert_eq!(controller.state().main_cursor, 1);
    }

    #[test]
    fn hold_a_toggles_backlight_without_leaving_view() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        press(&mut controller, &mut queue, BUTTON_C);
        controller.handle(ButtonEvents::hold(BUTTON_A), &mut queue, Instant::now());
        assert!(!controller.backlight());
        assert_eq!(controller.view(), View::Playing);
    }

    #[test]
    fn hold_c_toggles_shared_shuffle_flag() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        controller.handle(ButtonEvents::hold(BUTTON_C), &mut queue, Instant::now());
        assert!(queue.shuffle_enabled());
        let now = Instant::now();
        assert_eq!(controller.message(now), Some("Shuffle ON"));

        let settings = controller.settings_items(&queue);
        assert_eq!(settings[0], "Shuffle: ON");
    }

    #[test]
    fn messages_expire() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        let now = Instant::now();
        controller.handle(ButtonEvents::hold(BUTTON_C), &mut queue, now);
        assert!(controller.message(now).is_some());
        let later = now + Duration::from_secs(2);
        assert!(controller.message(later).is_none());
        controller.handle(ButtonEvents::default(), &mut queue, later);
        assert!(controller.message.is_none());
    }

    #[test]
    fn pairing_runs_on_following_tick_and_returns_to_bluetooth_menu() {
        let radios = FakeRadios {
            devices: vec![BtDevice {
                mac: String::from("AA"),
                name: String::from("Buds"),
            }],
            ..FakeRadios::default()
        };
        let (mut controller, mut queue) = fixture(radios);
        controller.go_home();
        controller.descend(View::Settings, |_| {});
        controller.descend(View::BluetoothMenu, |_| {});

        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::BluetoothMenu);
        assert_eq!(controller.message(Instant::now()), Some("Scanning..."));

        controller.handle(ButtonEvents::default(), &mut queue, Instant::now());
        assert_eq!(controller.view(), View::PairingSelect);
        assert_eq!(controller.pairing_items(), vec!["Buds"]);

        press(&mut controller, &mut queue, BUTTON_C);
        controller.handle(ButtonEvents::default(), &mut queue, Instant::now());
        assert_eq!(controller.view(), View::BluetoothMenu);
        assert_eq!(controller.bluetooth_items()[1], "Re-Pair Buds");
    }

    #[test]
    fn empty_discovery_offers_back() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        controller.descend(View::Settings, |_| {});
        controller.descend(View::BluetoothMenu, |_| {});
        press(&mut controller, &mut queue, BUTTON_C);
        controller.handle(ButtonEvents::default(), &mut queue, Instant::now());
        assert_eq!(controller.pairing_items(), vec!["No Devices Found", "Back"]);

        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::BluetoothMenu);
    }

    #[test]
    fn shutdown_needs_confirmation() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        controller.descend(View::Settings, |state| state.settings_cursor = 7);
        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::ConfirmShutdown);

        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::Settings);

        press(&mut controller, &mut queue, BUTTON_C);
        press(&mut controller, &mut queue, BUTTON_B);
        let outcome = controller.handle(ButtonEvents::press(BUTTON_C), &mut queue, Instant::now());
        assert_eq!(outcome, TickOutcome::Shutdown);
    }

    #[test]
    fn stopped_queue_renders_stopped_header() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        queue.filter_queue(crate::model::Filter::artist("Nobody"));
        press(&mut controller, &mut queue, BUTTON_C);
        let screen = controller.screen(&queue, Instant::now());
        assert_eq!(screen.header, "Stopped");
        assert_eq!(screen.body, ScreenBody::Empty);
    }

    #[test]
    fn refused_track_change_shows_a_message_and_keeps_now_playing() {
        let engine = Box::new(RefusingEngine::new("/m/b.mp3"));
        let (mut controller, mut queue) = fixture_with(FakeRadios::default(), engine);
        press(&mut controller, &mut queue, BUTTON_C);
        assert_eq!(controller.view(), View::Playing);

        let now = Instant::now();
        controller.handle(ButtonEvents::press(BUTTON_D), &mut queue, now);
        assert_eq!(controller.message(now), Some(PLAYBACK_FAILED));
        assert_eq!(queue.now_playing().map(|np| np.title.as_str()), Some("A"));
        assert_eq!(controller.view(), View::Playing);
    }

    #[test]
    fn refused_filter_still_lands_on_playing_with_a_message() {
        let engine = Box::new(RefusingEngine::new("/m/c.mp3"));
        let (mut controller, mut queue) = fixture_with(FakeRadios::default(), engine);
        controller.descend(View::LibrarySelect, |state| {
            state.category_cursor = 0;
            state.items = vec![PLAY_ALL.to_string(), String::from("C")];
            state.item_cursor = 1;
        });

        let now = Instant::now();
        controller.handle(ButtonEvents::press(BUTTON_C), &mut queue, now);
        assert_eq!(controller.view(), View::Playing);
        assert_eq!(controller.message(now), Some(PLAYBACK_FAILED));
    }

    #[test]
    fn play_on_an_empty_queue_says_no_media() {
        let (mut controller, mut queue) = fixture(FakeRadios::default());
        queue.filter_queue(crate::model::Filter::artist("Nobody"));
        press(&mut controller, &mut queue, BUTTON_C);

        let now = Instant::now();
        controller.handle(ButtonEvents::press(BUTTON_C), &mut queue, now);
        assert_eq!(controller.message(now), Some("No media"));
    }
}
