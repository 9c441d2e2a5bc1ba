use super::{
    Controller, Ctx, DrillLevel, PLAY_ALL, PLAYBACK_FAILED, PendingAction, TickOutcome,
    clamp_cursor, move_cursor, step_cursor,
};
use crate::input::{BUTTON_B, BUTTON_C, BUTTON_D};
use crate::model::{Category, Filter, View};
use crate::system::SystemInfo;

const SETTINGS_SHUFFLE: usize = 0;
const SETTINGS_SORT: usize = 1;
const SETTINGS_LIGHT: usize = 2;
const SETTINGS_VOLUME: usize = 3;
const SETTINGS_BLUETOOTH: usize = 4;
const SETTINGS_WIFI: usize = 5;
const SETTINGS_RESCAN: usize = 6;
const SETTINGS_SHUTDOWN: usize = 7;
const SETTINGS_COUNT: usize = 8;

pub(super) fn main_menu(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let len = Controller::main_menu_items().len();
    move_cursor(&mut ctx.events, &mut controller.state.main_cursor, len);
    if !ctx.events.take_press(BUTTON_C) {
        return;
    }

    match clamp_cursor(controller.state.main_cursor, len) {
        0 => controller.descend(View::Playing, |_| {}),
        1 => controller.descend(View::CategorySelect, |_| {}),
        2 => controller.descend(View::Settings, |state| state.settings_editing = false),
        3 => controller.descend(View::Pet, |_| {}),
        _ => {
            controller.about = SystemInfo::collect().lines(ctx.queue.library().len());
            controller.descend(View::About, |_| {});
        }
    }
}

pub(super) fn playing(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let mut ok = true;
    if ctx.events.take_press(BUTTON_C) {
        ok &= ctx.queue.toggle_play();
    }
    if ctx.events.take_press(BUTTON_B) {
        ok &= ctx.queue.previous();
    }
    if ctx.events.take_press(BUTTON_D) {
        ok &= ctx.queue.next();
    }
    if !ok {
        let text = if ctx.queue.queue_tracks().next().is_none() {
            "No media"
        } else {
            PLAYBACK_FAILED
        };
        controller.show_message(text, ctx.now);
    }
}

pub(super) fn category_select(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    move_cursor(
        &mut ctx.events,
        &mut controller.state.category_cursor,
        Category::ALL.len(),
    );
    if !ctx.events.take_press(BUTTON_C) {
        return;
    }

    let category = Category::from_index(controller.state.category_cursor);
    let items = with_play_all(ctx.queue.enumerate(category, None, None));
    controller.descend(View::LibrarySelect, |state| {
        state.header = String::from("Select");
        state.items = items;
        state.item_cursor = 0;
        state.level = DrillLevel::Root;
        state.selected_artist = None;
        state.selected_album = None;
    });
}

pub(super) fn library_select(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let len = controller.state.items.len();
    move_cursor(&mut ctx.events, &mut controller.state.item_cursor, len);
    if !ctx.events.take_press(BUTTON_C) || len == 0 {
        return;
    }

    let cursor = clamp_cursor(controller.state.item_cursor, len);
    let selection = controller.state.items[cursor].clone();
    let category = Category::from_index(controller.state.category_cursor);
    let level = controller.state.level;

    if cursor == 0 {
        let filter = match level {
            DrillLevel::Root => Filter::all(),
            DrillLevel::Artist => Filter::artist(controller.state.selected_artist.as_deref().unwrap_or_default()),
            DrillLevel::Album => Filter::album(
                controller.state.selected_album.as_deref().unwrap_or_default(),
                controller.state.selected_artist.as_deref(),
            ),
        };
        play_filtered(controller, ctx, filter);
    } else if category == Category::Artist && level == DrillLevel::Root {
        let items = with_play_all(ctx.queue.enumerate(Category::Album, Some(&selection), None));
        controller.descend(View::LibrarySelect, |state| {
            state.header = selection.clone();
            state.selected_artist = Some(selection);
            state.level = DrillLevel::Artist;
            state.items = items;
            state.item_cursor = 0;
        });
    } else if (category == Category::Album || level == DrillLevel::Artist)
        && level != DrillLevel::Album
    {
        let artist = controller.state.selected_artist.clone();
        let items = with_play_all(ctx.queue.enumerate(
            Category::Song,
            artist.as_deref(),
            Some(&selection),
        ));
        controller.descend(View::LibrarySelect, |state| {
            state.header = selection.clone();
            state.selected_album = Some(selection);
            state.level = DrillLevel::Album;
            state.items = items;
            state.item_cursor = 0;
        });
    } else {
        play_filtered(controller, ctx, Filter::song(&selection));
    }
}

fn play_filtered(controller: &mut Controller, ctx: &mut Ctx<'_>, filter: Filter) {
    if !ctx.queue.has_media() {
        controller.show_message("No media", ctx.now);
        return;
    }
    let started = ctx.queue.filter_queue(filter);
    controller.descend(View::Playing, |_| {});
    if !started {
        controller.show_message(PLAYBACK_FAILED, ctx.now);
    }
}

fn with_play_all(values: Vec<String>) -> Vec<String> {
    std::iter::once(PLAY_ALL.to_string()).chain(values).collect()
}

pub(super) fn settings(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let cursor = clamp_cursor(controller.state.settings_cursor, SETTINGS_COUNT);

    if ctx.events.take_press(BUTTON_C) {
        match cursor {
            SETTINGS_SORT => {
                let text = if ctx.queue.sort_alphabetical() {
                    "Sorted A-Z"
                } else {
                    "No media"
                };
                controller.show_message(text, ctx.now);
            }
            SETTINGS_BLUETOOTH => {
                controller.refresh_radios();
                controller.descend(View::BluetoothMenu, |state| state.bluetooth_cursor = 0);
                return;
            }
            SETTINGS_WIFI => {
                controller.refresh_radios();
                controller.descend(View::WifiMenu, |state| state.wifi_cursor = 0);
                return;
            }
            SETTINGS_RESCAN => {
                controller.defer(PendingAction::Rescan, "Rescanning...", ctx.now);
            }
            SETTINGS_SHUTDOWN => {
                controller.descend(View::ConfirmShutdown, |state| state.shutdown_cursor = 0);
                return;
            }
            _ => controller.state.settings_editing = !controller.state.settings_editing,
        }
    }

    if !controller.state.settings_editing {
        move_cursor(
            &mut ctx.events,
            &mut controller.state.settings_cursor,
            SETTINGS_COUNT,
        );
        return;
    }

    let down = ctx.events.take_press(BUTTON_B);
    let up = ctx.events.take_press(BUTTON_D);
    if down == up {
        return;
    }
    match cursor {
        SETTINGS_SHUFFLE => controller.toggle_shuffle(ctx),
        SETTINGS_LIGHT => controller.backlight = !controller.backlight,
        SETTINGS_VOLUME => {
            let volume = if up {
                ctx.queue.volume().saturating_add(controller.volume_step)
            } else {
                ctx.queue.volume().saturating_sub(controller.volume_step)
            };
            ctx.queue.set_volume(volume.min(100));
        }
        _ => {}
    }
}

pub(super) fn bluetooth_menu(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let len = controller.bluetooth_items().len();
    move_cursor(&mut ctx.events, &mut controller.state.bluetooth_cursor, len);
    if !ctx.events.take_press(BUTTON_C) {
        return;
    }

    match clamp_cursor(controller.state.bluetooth_cursor, len) {
        0 => controller.defer(PendingAction::Discover, "Scanning...", ctx.now),
        1 => controller.defer(PendingAction::Reconnect, "Connecting...", ctx.now),
        2 => {
            let enable = !controller.bluetooth_on;
            if !controller.connectivity.set_bluetooth(enable) {
                controller.show_message("Bluetooth failed", ctx.now);
            }
            controller.bluetooth_on = controller.connectivity.bluetooth_on();
        }
        _ => controller.back(),
    }
}

pub(super) fn wifi_menu(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let len = controller.wifi_items().len();
    move_cursor(&mut ctx.events, &mut controller.state.wifi_cursor, len);
    if !ctx.events.take_press(BUTTON_C) {
        return;
    }

    match clamp_cursor(controller.state.wifi_cursor, len) {
        0 => {
            let enable = !controller.wifi_on;
            if !controller.connectivity.set_wifi(enable) {
                controller.show_message("Wi-Fi failed", ctx.now);
            }
            controller.wifi_on = controller.connectivity.wifi_on();
        }
        _ => controller.back(),
    }
}

pub(super) fn pairing_select(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let len = controller.pairing_items().len();
    move_cursor(&mut ctx.events, &mut controller.state.pairing_cursor, len);
    if !ctx.events.take_press(BUTTON_C) {
        return;
    }

    let cursor = clamp_cursor(controller.state.pairing_cursor, len);
    match controller.discovered.get(cursor).cloned() {
        Some(device) => controller.defer(PendingAction::Pair(device), "Pairing...", ctx.now),
        None => controller.back(),
    }
}

pub(super) fn confirm_shutdown(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let b = ctx.events.take_press(BUTTON_B);
    let d = ctx.events.take_press(BUTTON_D);
    if b || d {
        controller.state.shutdown_cursor = step_cursor(controller.state.shutdown_cursor, 2, true);
    }
    if !ctx.events.take_press(BUTTON_C) {
        return;
    }

    if clamp_cursor(controller.state.shutdown_cursor, 2) == 1 {
        log::warn!("shutdown confirmed");
        ctx.outcome = TickOutcome::Shutdown;
    } else {
        controller.back();
    }
}

pub(super) fn pet(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    leave_on_any_button(controller, ctx);
}

pub(super) fn about(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    leave_on_any_button(controller, ctx);
}

fn leave_on_any_button(controller: &mut Controller, ctx: &mut Ctx<'_>) {
    let pressed = [BUTTON_B, BUTTON_C, BUTTON_D]
        .into_iter()
        .fold(false, |any, button| ctx.events.take_press(button) | any);
    if pressed {
        controller.go_home();
    }
}
