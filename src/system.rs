use anyhow::{Context, Result, bail};
use std::net::UdpSocket;
use std::process::Command;
use sysinfo::{Components, System};

const UNAVAILABLE: &str = "N/A";
const HOST_CHARS: usize = 15;
const MIB: u64 = 1024 * 1024;

/// Snapshot shown on the About screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub ip: String,
    pub temperature: String,
    pub uptime: String,
    pub memory: String,
    pub host: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let components = Components::new_with_refreshed_list();
        let readings = components
            .list()
            .iter()
            .filter_map(|component| Some((component.label().to_string(), component.temperature()?)));

        let total = system.total_memory();
        Self {
            ip: local_ip().unwrap_or_else(|| String::from("Not Connected")),
            temperature: cpu_reading(readings)
                .map(format_celsius)
                .unwrap_or_else(|| String::from("??'C")),
            uptime: format_uptime(System::uptime()),
            memory: format_memory(total.saturating_sub(system.available_memory()), total)
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            host: System::host_name()
                .and_then(|name| short_host(&name))
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
        }
    }

    pub fn lines(&self, track_count: usize) -> Vec<String> {
        vec![
            format!("IP: {}", self.ip),
            format!("CPU: {} | Up: {}", self.temperature, self.uptime),
            format!("RAM: {}", self.memory),
            format!("Host: {}", self.host),
            format!("Library: {track_count} tracks"),
        ]
    }
}

/// Address of the interface holding the default route; nothing is sent.
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

/// Prefers a sensor labelled as the CPU or SoC, else the first one.
fn cpu_reading(readings: impl IntoIterator<Item = (String, f32)>) -> Option<f32> {
    let readings: Vec<(String, f32)> = readings
        .into_iter()
        .filter(|(_, celsius)| celsius.is_finite())
        .collect();
    readings
        .iter()
        .find(|(label, _)| {
            let label = label.to_ascii_lowercase();
            label.contains("cpu") || label.contains("soc")
        })
        .or_else(|| readings.first())
        .map(|(_, celsius)| *celsius)
}

fn format_celsius(celsius: f32) -> String {
    format!("{celsius:.1}'C")
}

fn format_uptime(seconds: u64) -> String {
    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
}

fn format_memory(used_bytes: u64, total_bytes: u64) -> Option<String> {
    (total_bytes > 0).then(|| format!("{}MB / {}MB", used_bytes / MIB, total_bytes / MIB))
}

fn short_host(name: &str) -> Option<String> {
    let name: String = name.trim().chars().take(HOST_CHARS).collect();
    (!name.is_empty()).then_some(name)
}

/// Runs the configured power-off command. Only returns on failure to launch.
pub fn run_shutdown(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("shutdown command is empty");
    };
    log::warn!("powering off: {}", command.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("failed to run {program}"))?;
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(())
}
