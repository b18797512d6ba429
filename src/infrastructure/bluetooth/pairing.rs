//! Pairing
//!
//! Discovery and pairing are delegated to BlueZ's `bluetoothctl`. The board
//! has to be in sync mode (red button pressed) while this runs.

use crate::domain::error::{BoardError, Result};
use crate::domain::models::BdAddr;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: BdAddr,
    pub name: String,
}

pub trait Pairer: Send {
    /// Scan for nearby devices for roughly `duration`.
    fn discover(&mut self, duration: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Pair, connect and trust the device at `address`.
    fn pair(&mut self, address: BdAddr) -> Result<()>;
}

/// Drives `bluetoothctl` as a child process.
#[derive(Debug, Clone)]
pub struct BluetoothCtl {
    program: String,
    step_delay: Duration,
}

impl BluetoothCtl {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            program: "bluetoothctl".to_string(),
            step_delay,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BoardError::PairingFailed(format!("{} {:?}: {}", self.program, args, e)))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Pairer for BluetoothCtl {
    fn discover(&mut self, duration: Duration) -> Result<Vec<DiscoveredDevice>> {
        info!("Scanning for {}s...", duration.as_secs());
        let secs = duration.as_secs().max(1).to_string();
        self.run(&["--timeout", &secs, "scan", "on"])?;

        let listing = self.run(&["devices"])?;
        let devices: Vec<DiscoveredDevice> = listing.lines().filter_map(parse_device_line).collect();
        debug!("Discovered {} device(s)", devices.len());
        Ok(devices)
    }

    fn pair(&mut self, address: BdAddr) -> Result<()> {
        info!("Pairing with {}", address);
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BoardError::PairingFailed(format!("spawn {}: {}", self.program, e)))?;

        let script = [
            format!("remove {}", address),
            "power on".to_string(),
            "agent on".to_string(),
            "default-agent".to_string(),
            format!("pair {}", address),
            format!("connect {}", address),
            format!("trust {}", address),
            "quit".to_string(),
        ];

        let written = match child.stdin.as_mut() {
            Some(stdin) => script.iter().try_for_each(|line| {
                debug!("bluetoothctl> {}", line);
                writeln!(stdin, "{}", line)?;
                stdin.flush()?;
                std::thread::sleep(self.step_delay);
                Ok::<(), std::io::Error>(())
            }),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "bluetoothctl stdin unavailable",
            )),
        };

        if let Err(e) = written {
            warn!("Pairing script interrupted: {}", e);
            let _ = child.kill();
            let _ = child.wait();
            return Err(BoardError::PairingFailed(e.to_string()));
        }

        // Closing stdin lets bluetoothctl exit after `quit`.
        drop(child.stdin.take());
        child
            .wait()
            .map_err(|e| BoardError::PairingFailed(e.to_string()))?;
        Ok(())
    }
}

/// Parse a `Device AA:BB:CC:DD:EE:FF Name` line from `bluetoothctl devices`.
pub fn parse_device_line(line: &str) -> Option<DiscoveredDevice> {
    let rest = line.trim().strip_prefix("Device ")?;
    let (address, name) = match rest.split_once(' ') {
        Some((address, name)) => (address, name.trim()),
        None => (rest, ""),
    };
    let address = address.parse().ok()?;
    Some(DiscoveredDevice {
        address,
        name: name.to_string(),
    })
}
