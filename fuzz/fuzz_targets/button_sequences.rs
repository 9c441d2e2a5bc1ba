#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};
use tinplayer::audio::{NullAudioEngine, PlaylistPlayer};
use tinplayer::config::Settings;
use tinplayer::connectivity::{BtDevice, Connectivity};
use tinplayer::input::{BUTTON_COUNT, ButtonEvents};
use tinplayer::library::LibraryIndex;
use tinplayer::model::Track;
use tinplayer::nav::Controller;
use tinplayer::pet::PetStore;
use tinplayer::queue::PlaybackQueueEngine;

struct Radios {
    devices: usize,
}

impl Connectivity for Radios {
    fn bluetooth_on(&mut self) -> bool {
        true
    }
    fn set_bluetooth(&mut self, _on: bool) -> bool {
        true
    }
    fn wifi_on(&mut self) -> bool {
        false
    }
    fn set_wifi(&mut self, _on: bool) -> bool {
        false
    }
    fn discover(&mut self) -> Vec<BtDevice> {
        (0..self.devices)
            .map(|idx| BtDevice {
                mac: format!("00:00:00:00:00:{idx:02X}"),
                name: format!("dev{idx}"),
            })
            .collect()
    }
    fn pair(&mut self, _device: &BtDevice) -> bool {
        true
    }
    fn reconnect(&mut self) -> bool {
        false
    }
    fn paired_name(&self) -> Option<String> {
        None
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&shape, presses)) = data.split_first() else {
        return;
    };
    let track_count = usize::from(shape % 8);
    let tracks = (0..track_count)
        .map(|idx| {
            Track::tagged(
                format!("/m/track_{idx}.mp3"),
                &format!("Song {}", idx % 5),
                Some(&format!("Artist {}", idx % 3)),
                (idx % 2 == 0).then_some("Album"),
            )
        })
        .collect();

    let settings = Settings {
        settle_ms: 0,
        ..Settings::default()
    };
    let player = PlaylistPlayer::new(Box::new(NullAudioEngine::new()));
    let mut queue = PlaybackQueueEngine::new(player, Duration::ZERO).with_rng_seed(u64::from(shape));
    queue.install_library(LibraryIndex::from_tracks(tracks));
    let radios = Radios {
        devices: usize::from(shape >> 5),
    };
    let mut controller = Controller::new(Box::new(radios), PetStore::in_memory(), &settings);

    for byte in presses {
        let button = usize::from(byte & 0b11) % BUTTON_COUNT;
        let events = if byte & 0b100 == 0 {
            ButtonEvents::press(button)
        } else {
            ButtonEvents::hold(button)
        };
        let now = Instant::now();
        controller.handle(events, &mut queue, now);
        queue.tick();
        let _ = controller.screen(&queue, now);
    }
});
