use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtDevice {
    pub mac: String,
    pub name: String,
}

/// Radio control as seen by the menus. Every call reports plain success.
pub trait Connectivity {
    fn bluetooth_on(&mut self) -> bool;
    fn set_bluetooth(&mut self, on: bool) -> bool;
    fn wifi_on(&mut self) -> bool;
    fn set_wifi(&mut self, on: bool) -> bool;
    fn discover(&mut self) -> Vec<BtDevice>;
    fn pair(&mut self, device: &BtDevice) -> bool;
    fn reconnect(&mut self) -> bool;
    fn paired_name(&self) -> Option<String>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PairedDevice {
    #[serde(default)]
    bt_name: Option<String>,
    #[serde(default)]
    bt_mac: Option<String>,
}

/// `bluetoothctl` and `nmcli` behind a per-call timeout.
pub struct SystemConnectivity {
    state_path: PathBuf,
    paired: Option<BtDevice>,
    timeout: Duration,
    scan_window: Duration,
}

impl SystemConnectivity {
    pub fn new(state_path: impl Into<PathBuf>, timeout: Duration, scan_window: Duration) -> Self {
        let state_path = state_path.into();
        let paired = match load_paired(&state_path) {
            Ok(paired) => paired,
            Err(err) => {
                log::warn!("ignoring paired device record: {err:#}");
                None
            }
        };
        Self {
            state_path,
            paired,
            timeout,
            scan_window,
        }
    }

    fn tool(&self, program: &str, args: &[&str]) -> Option<String> {
        match run_tool(program, args, self.timeout) {
            Ok(output) => Some(output),
            Err(err) => {
                log::warn!("{program} {} failed: {err:#}", args.join(" "));
                None
            }
        }
    }

    fn save_paired(&self) -> Result<()> {
        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let record = PairedDevice {
            bt_name: self.paired.as_ref().map(|device| device.name.clone()),
            bt_mac: self.paired.as_ref().map(|device| device.mac.clone()),
        };
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(&self.state_path, json)
            .with_context(|| format!("failed to write {}", self.state_path.display()))
    }
}

impl Connectivity for SystemConnectivity {
    fn bluetooth_on(&mut self) -> bool {
        self.tool("bluetoothctl", &["show"])
            .is_some_and(|output| output.contains("Powered: yes"))
    }

    fn set_bluetooth(&mut self, on: bool) -> bool {
        let state = if on { "on" } else { "off" };
        self.tool("bluetoothctl", &["power", state]).is_some()
    }

    fn wifi_on(&mut self) -> bool {
        self.tool("nmcli", &["radio", "wifi"])
            .is_some_and(|output| output.trim() == "enabled")
    }

    fn set_wifi(&mut self, on: bool) -> bool {
        let state = if on { "on" } else { "off" };
        self.tool("nmcli", &["radio", "wifi", state]).is_some()
    }

    fn discover(&mut self) -> Vec<BtDevice> {
        self.set_bluetooth(true);
        match Command::new("bluetoothctl")
            .args(["scan", "on"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut scan) => {
                thread::sleep(self.scan_window);
                reap(&mut scan);
            }
            Err(err) => log::warn!("bluetooth scan failed to start: {err}"),
        }

        let devices = self
            .tool("bluetoothctl", &["devices"])
            .map(|output| parse_devices(&output))
            .unwrap_or_default();
        log::info!("bluetooth discovery found {} devices", devices.len());
        devices
    }

    fn pair(&mut self, device: &BtDevice) -> bool {
        let paired = self.tool("bluetoothctl", &["pair", &device.mac]).is_some();
        self.tool("bluetoothctl", &["trust", &device.mac]);
        let connected = self.tool("bluetoothctl", &["connect", &device.mac]).is_some();
        if !(paired || connected) {
            return false;
        }

        self.paired = Some(device.clone());
        if let Err(err) = self.save_paired() {
            log::warn!("failed to remember paired device: {err:#}");
        }
        true
    }

    fn reconnect(&mut self) -> bool {
        let Some(mac) = self.paired.as_ref().map(|device| device.mac.clone()) else {
            return false;
        };
        self.tool("bluetoothctl", &["connect", &mac]).is_some()
    }

    fn paired_name(&self) -> Option<String> {
        self.paired.as_ref().map(|device| device.name.clone())
    }
}

/// The remembered headset, if one was ever paired.
pub fn load_paired(path: &Path) -> Result<Option<BtDevice>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let record: PairedDevice = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(record
        .bt_mac
        .map(|mac| BtDevice {
            name: record.bt_name.unwrap_or_else(|| mac.clone()),
            mac,
        }))
}

/// Runs a command to completion and returns its stdout, killing it after `timeout`.
pub fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let status = wait_with_timeout(&mut child, timeout)
        .with_context(|| format!("{program} did not finish"))?;

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout
            .read_to_string(&mut output)
            .with_context(|| format!("failed to read {program} output"))?;
    }
    if !status.success() {
        bail!("{program} exited with {status}");
    }
    Ok(output)
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            reap(child);
            bail!("timed out after {}ms", timeout.as_millis());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        log::debug!("kill of child {} failed: {err}", child.id());
    }
    if let Err(err) = child.wait() {
        log::warn!("wait on child {} failed: {err}", child.id());
    }
}

/// Parses `bluetoothctl devices` lines of the form `Device <mac> <name>`.
pub fn parse_devices(output: &str) -> Vec<BtDevice> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ')?;
            let name = name.trim();
            (!name.is_empty()).then(|| BtDevice {
                mac: mac.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_device_listing() {
        let output = "Device AA:BB:CC:DD:EE:FF My Headphones\n\
                      garbage line\n\
                      Device 11:22:33:44:55:66 Speaker\n\
                      Device 00:00:00:00:00:00\n";
        assert_eq!(
            parse_devices(output),
            vec![
                BtDevice {
                    mac: String::from("AA:BB:CC:DD:EE:FF"),
                    name: String::from("My Headphones"),
                },
                BtDevice {
                    mac: String::from("11:22:33:44:55:66"),
                    name: String::from("Speaker"),
                },
            ]
        );
    }

    #[test]
    fn missing_tool_is_an_error_not_a_panic() {
        let result = run_tool("tinplayer-no-such-tool", &[], Duration::from_millis(100));
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn slow_tool_times_out() {
        let started = Instant::now();
        let result = run_tool("sleep", &["5"], Duration::from_millis(100));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn tool_output_is_captured() {
        let output = run_tool("echo", &["enabled"], Duration::from_secs(5)).expect("echo");
        assert_eq!(output.trim(), "enabled");
    }

    #[test]
    fn paired_device_survives_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("connection.json");
        fs::write(&path, r#"{"bt_name":"Buds","bt_mac":"AA:BB"}"#).expect("write");

        let conn = SystemConnectivity::new(&path, Duration::from_millis(100), Duration::ZERO);
        assert_eq!(conn.paired_name().as_deref(), Some("Buds"));
    }

    #[test]
    fn malformed_record_means_nothing_paired() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("connection.json");
        fs::write(&path, "{ nope").expect("write");

        let mut conn = SystemConnectivity::new(&path, Duration::from_millis(100), Duration::ZERO);
        assert_eq!(conn.paired_name(), None);
        assert!(!conn.reconnect());
    }
}
