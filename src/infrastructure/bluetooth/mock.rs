//! Scripted transport and pairer for driving sessions in tests.

use crate::domain::error::{BoardError, Result};
use crate::domain::models::BdAddr;
use crate::infrastructure::bluetooth::pairing::{DiscoveredDevice, Pairer};
use crate::infrastructure::bluetooth::protocol::{COMMAND_PSM, REPORT_PSM};
use crate::infrastructure::bluetooth::transport::{Channel, Connector};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub enum Inbound {
    Report(Vec<u8>),
    Error(io::ErrorKind),
    Closed,
}

#[derive(Default)]
struct MockState {
    inbound: VecDeque<Inbound>,
    sent: Vec<Vec<u8>>,
    opened: Vec<u16>,
    open_channels: usize,
    fail_open: Option<u16>,
    fail_send_at: Option<usize>,
    sends: usize,
}

/// Shared handle; clones observe the same peer.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_report(&self, bytes: Vec<u8>) {
        self.state.lock().unwrap().inbound.push_back(Inbound::Report(bytes));
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.state.lock().unwrap().inbound.push_back(Inbound::Error(kind));
    }

    pub fn push_closed(&self) {
        self.state.lock().unwrap().inbound.push_back(Inbound::Closed);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }

    pub fn opened(&self) -> Vec<u16> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().unwrap().open_channels
    }

    pub fn fail_open(&self, psm: u16) {
        self.state.lock().unwrap().fail_open = Some(psm);
    }

    /// Fail the n-th send (zero based, counted from now).
    pub fn fail_send_at(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.sends = 0;
        state.fail_send_at = Some(n);
    }
}

impl Connector for MockTransport {
    type Channel = MockChannel;

    fn open(&mut self, _address: BdAddr, psm: u16) -> io::Result<MockChannel> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open == Some(psm) {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        state.opened.push(psm);
        state.open_channels += 1;
        Ok(MockChannel {
            psm,
            state: self.state.clone(),
        })
    }
}

pub struct MockChannel {
    psm: u16,
    state: Arc<Mutex<MockState>>,
}

impl Channel for MockChannel {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        assert_eq!(self.psm, COMMAND_PSM, "frames go out on the command channel");
        let mut state = self.state.lock().unwrap();
        let index = state.sends;
        state.sends += 1;
        if state.fail_send_at == Some(index) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.sent.push(frame.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        assert_eq!(self.psm, REPORT_PSM, "reports arrive on the report channel");
        match self.state.lock().unwrap().inbound.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Inbound::Report(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Inbound::Error(kind)) => Err(kind.into()),
            Some(Inbound::Closed) => Ok(0),
        }
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_channels -= 1;
        }
    }
}

/// Pairer returning a fixed discovery result.
#[derive(Clone, Default)]
pub struct ScriptedPairer {
    pub devices: Vec<DiscoveredDevice>,
    pub fail_pairing: bool,
    pub paired: Arc<Mutex<Vec<BdAddr>>>,
}

impl Pairer for ScriptedPairer {
    fn discover(&mut self, _duration: Duration) -> Result<Vec<DiscoveredDevice>> {
        Ok(self.devices.clone())
    }

    fn pair(&mut self, address: BdAddr) -> Result<()> {
        if self.fail_pairing {
            return Err(BoardError::PairingFailed("scripted failure".to_string()));
        }
        self.paired.lock().unwrap().push(address);
        Ok(())
    }
}

/// Extension report carrying counts in wire order (BL, TR, BR, TL).
pub fn sensor_report(wire_counts: [u16; 4]) -> Vec<u8> {
    let mut bytes = vec![0xA1, 0x32];
    bytes.extend(wire_counts.iter().flat_map(|v| v.to_be_bytes()));
    bytes.extend([0u8; 11]);
    bytes
}

/// Read-data report with a calibration block.
pub fn read_data_report(block: &[u8]) -> Vec<u8> {
    let size_nibble = (block.len() as u8 - 1) << 4;
    let mut bytes = vec![0xA1, 0x21, 0x00, 0x00, size_nibble, 0x00, 0x24];
    bytes.extend_from_slice(block);
    bytes
}

pub fn status_report(battery: u8) -> Vec<u8> {
    vec![0xA1, 0x20, 0x00, 0x00, 0x02, 0x00, 0x00, battery]
}

/// Big-endian block of calibration counts.
pub fn be_block(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}
