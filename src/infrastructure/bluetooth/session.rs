//! Balance Board Session
//!
//! Owns both channels to one board, runs the initialization handshake and
//! turns inbound reports into readings. Every command send is followed by
//! the configured pacing delay; the firmware drops commands that arrive
//! back to back.

use crate::domain::board::Board;
use crate::domain::calibration::{CalibrationStore, CalibrationTable, IngestOutcome};
use crate::domain::error::{BoardError, Result};
use crate::domain::models::{BaselineOffsets, BdAddr, Reading, SessionState};
use crate::domain::pipeline::ReadingPipeline;
use crate::domain::settings::{Settings, TimingSettings};
use crate::infrastructure::bluetooth::l2cap::L2capConnector;
use crate::infrastructure::bluetooth::pairing::{BluetoothCtl, Pairer};
use crate::infrastructure::bluetooth::protocol::{
    self, BoardCommand, Report, COMMAND_PSM, INIT_SEQUENCE, REPORT_BUFFER_LEN, REPORT_PSM,
};
use crate::infrastructure::bluetooth::transport::{self, Channel, Connector};
use std::io;
use std::thread;
use tracing::{debug, error, info, trace, warn};

struct Channels<Ch> {
    report: Ch,
    command: Ch,
}

/// Nintendo Wii Balance Board (RVL-WBC-01)
pub struct WiiBalanceBoard<C: Connector, P: Pairer> {
    connector: C,
    pairer: P,
    device_name: String,
    timings: TimingSettings,
    address: Option<BdAddr>,
    channels: Option<Channels<C::Channel>>,
    calibration: CalibrationStore,
    baseline: Option<BaselineOffsets>,
    pipeline: ReadingPipeline,
    battery: Option<u8>,
}

impl WiiBalanceBoard<L2capConnector, BluetoothCtl> {
    /// Board reached over L2CAP and paired through `bluetoothctl`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            L2capConnector::new(),
            BluetoothCtl::new(settings.timings.pairing_step()),
            settings.device_name.clone(),
            settings.timings.clone(),
        )
    }
}

impl<C: Connector, P: Pairer> WiiBalanceBoard<C, P> {
    pub fn new(connector: C, pairer: P, device_name: String, timings: TimingSettings) -> Self {
        Self {
            connector,
            pairer,
            device_name,
            timings,
            address: None,
            channels: None,
            calibration: CalibrationStore::new(),
            baseline: None,
            pipeline: ReadingPipeline::new(),
            battery: None,
        }
    }

    pub fn calibration(&self) -> &CalibrationTable {
        self.calibration.table()
    }

    pub fn baseline(&self) -> Option<&BaselineOffsets> {
        self.baseline.as_ref()
    }

    fn send_command(&mut self, command: BoardCommand) -> io::Result<()> {
        let channels = self.channels.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "command channel is closed")
        })?;
        let frame = command
            .frame()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        trace!("Sending {:?}: {:02X?}", command, frame);
        channels.command.send(&frame)?;
        thread::sleep(self.timings.command_interval());
        Ok(())
    }

    fn open_channels(&mut self, address: BdAddr) -> Result<Channels<C::Channel>> {
        let report = self
            .connector
            .open(address, REPORT_PSM)
            .map_err(|source| BoardError::TransportOpenFailed {
                psm: REPORT_PSM,
                source,
            })?;
        let command = self
            .connector
            .open(address, COMMAND_PSM)
            .map_err(|source| BoardError::TransportOpenFailed {
                psm: COMMAND_PSM,
                source,
            })?;
        Ok(Channels { report, command })
    }

    fn run_handshake(&mut self) -> Result<()> {
        for &(command, step) in INIT_SEQUENCE {
            if command == BoardCommand::RequestCalibration {
                self.calibration.begin_request();
            }
            self.send_command(command)
                .map_err(|source| BoardError::ConnectionFailed { step, source })?;
            debug!("Handshake step done: {}", step);
        }
        Ok(())
    }

    fn sample_zero_point(&mut self) -> Result<BaselineOffsets> {
        thread::sleep(self.timings.zero_settle());

        let mut readings = Vec::with_capacity(self.timings.zero_samples as usize);
        for _ in 0..self.timings.zero_samples {
            if let Some(reading) = self.read()? {
                readings.push(reading);
            }
            thread::sleep(self.timings.zero_sample_interval());
        }

        let Some(baseline) = BaselineOffsets::average(&readings) else {
            warn!("No readings while sampling the zero point");
            return Err(BoardError::NoBaselineSamples);
        };
        info!(
            "Zero point set from {} reading(s): {:?}",
            readings.len(),
            baseline
        );
        Ok(baseline)
    }

    fn handle_calibration_block(&mut self, payload: &[u8]) {
        if !self.calibration.is_pending() {
            debug!("Ignoring unsolicited read-data report ({} bytes)", payload.len());
            return;
        }
        match self.calibration.ingest(payload) {
            Ok(IngestOutcome::ReferenceRows) => debug!("Received EMPTY/MID calibration rows"),
            Ok(IngestOutcome::FullRow) => {
                info!("Calibration received: {:?}", self.calibration.table())
            }
            Err(e) => warn!("Dropping calibration block: {}", e),
        }
    }
}

impl<C: Connector, P: Pairer> Board for WiiBalanceBoard<C, P> {
    fn name(&self) -> &str {
        &self.device_name
    }

    fn setup(&mut self, address: Option<BdAddr>) -> Result<BdAddr> {
        let address = match address {
            Some(address) => address,
            None => {
                let devices = self.pairer.discover(self.timings.discovery())?;
                devices
                    .into_iter()
                    .find(|device| device.name == self.device_name)
                    .map(|device| device.address)
                    .ok_or_else(|| BoardError::DeviceNotFound(self.device_name.clone()))?
            }
        };

        info!("Setting up {} at {}", self.device_name, address);
        self.pairer.pair(address)?;
        self.address = Some(address);
        Ok(address)
    }

    fn connect(&mut self, address: BdAddr) -> Result<()> {
        if self.channels.is_some() {
            self.disconnect();
        }

        info!(
            "Connecting to {} (report 0x{:02X}, command 0x{:02X})",
            address, REPORT_PSM, COMMAND_PSM
        );
        self.calibration.reset();
        self.baseline = None;
        self.pipeline.reset();
        self.battery = None;

        let channels = self.open_channels(address).inspect_err(|e| {
            error!("Failed to open channels: {}", e);
        })?;
        self.channels = Some(channels);
        self.address = Some(address);

        if let Err(e) = self.run_handshake() {
            error!("Handshake failed: {}", e);
            self.disconnect();
            return Err(e);
        }

        info!("Connected to {}", address);
        Ok(())
    }

    fn calibrate_zero(&mut self) -> Result<()> {
        if self.channels.is_none() {
            return Err(BoardError::NotConnected);
        }

        info!("Sampling zero point - keep the board empty");
        // Offsets are learned from uncorrected masses; a failed run keeps the old ones.
        let previous = self.baseline.take();
        match self.sample_zero_point() {
            Ok(baseline) => {
                self.baseline = Some(baseline);
                Ok(())
            }
            Err(e) => {
                self.baseline = previous;
                Err(e)
            }
        }
    }

    fn disconnect(&mut self) {
        if self.channels.take().is_some() {
            info!("Disconnected from board");
        }
    }

    fn read(&mut self) -> Result<Option<Reading>> {
        let Some(channels) = self.channels.as_mut() else {
            return Ok(None);
        };

        let mut buf = [0u8; REPORT_BUFFER_LEN];
        let len = match channels.report.recv(&mut buf, self.timings.read_timeout()) {
            Ok(0) => {
                return Err(BoardError::TransportLost(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "report channel closed by peer",
                )))
            }
            Ok(n) => n,
            Err(e) if transport::is_transient(&e) => return Ok(None),
            Err(e) => return Err(BoardError::TransportLost(e)),
        };

        let report = match protocol::decode_report(&buf[..len]) {
            Ok(report) => report,
            Err(e) => {
                warn!("Dropping report: {}", e);
                return Ok(None);
            }
        };

        match report {
            Report::Status(status) => {
                debug!("Status report, battery {:?}", status.battery);
                if status.battery.is_some() {
                    self.battery = status.battery;
                }
                self.send_command(BoardCommand::EnableContinuousReporting)
                    .map_err(BoardError::TransportLost)?;
                Ok(None)
            }
            Report::CalibrationRead { payload, .. } => {
                self.handle_calibration_block(payload);
                Ok(None)
            }
            Report::Sensor { payload } => Ok(self.pipeline.process(
                payload,
                self.calibration.table(),
                self.baseline.as_ref(),
            )),
            Report::Unknown(tag) => {
                trace!("Ignoring report 0x{:02X}", tag);
                Ok(None)
            }
        }
    }

    fn set_indicator(&mut self, on: bool) -> Result<()> {
        if self.channels.is_none() {
            debug!("Indicator change ignored while disconnected");
            return Ok(());
        }
        self.send_command(BoardCommand::Indicator(on))
            .map_err(BoardError::TransportLost)
    }

    fn state(&self) -> SessionState {
        if self.channels.is_none() {
            SessionState::Disconnected
        } else if self.calibration.is_pending() {
            SessionState::CalibrationPending
        } else if self.calibration.table().is_complete() {
            SessionState::Ready
        } else {
            SessionState::Connected
        }
    }

    fn address(&self) -> Option<BdAddr> {
        self.address
    }

    /// Raw battery byte from the last status report.
    fn battery_level(&self) -> Option<u8> {
        self.battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Corner;
    use crate::infrastructure::bluetooth::mock::{
        be_block, read_data_report, sensor_report, status_report, MockTransport, ScriptedPairer,
    };
    use crate::infrastructure::bluetooth::pairing::DiscoveredDevice;

    const ADDR: BdAddr = BdAddr([0x00, 0x1F, 0x32, 0xAA, 0xBB, 0xCC]);

    fn board(transport: &MockTransport) -> WiiBalanceBoard<MockTransport, ScriptedPairer> {
        WiiBalanceBoard::new(
            transport.clone(),
            ScriptedPairer::default(),
            "Nintendo RVL-WBC-01".to_string(),
            TimingSettings::immediate(),
        )
    }

    /// EMPTY = 0 and FULL = 3400 on every corner: one count is 10 g.
    fn push_calibration(transport: &MockTransport) {
        transport.push_report(read_data_report(&be_block(&[
            0, 0, 0, 0, 1700, 1700, 1700, 1700,
        ])));
        transport.push_report(read_data_report(&be_block(&[3400, 3400, 3400, 3400])));
    }

    fn connected_board(transport: &MockTransport) -> WiiBalanceBoard<MockTransport, ScriptedPairer> {
        let mut board = board(transport);
        board.connect(ADDR).unwrap();
        push_calibration(transport);
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(board.read().unwrap(), None);
        transport.clear_sent();
        board
    }

    #[test]
    fn test_connect_sends_handshake_in_order() {
        let transport = MockTransport::new();
        let mut board = board(&transport);

        board.connect(ADDR).unwrap();

        assert_eq!(transport.opened(), vec![REPORT_PSM, COMMAND_PSM]);
        assert_eq!(
            transport.sent(),
            vec![
                vec![0x52, 0x00, 0x16, 0x04, 0xA4, 0x00, 0x40, 0x00],
                vec![0x52, 0x12, 0x04, 0x32],
                vec![0x52, 0x17, 0x04, 0xA4, 0x00, 0x24, 0x00, 0x18],
                vec![0x52, 0x00, 0x11, 0x10],
            ]
        );
        assert_eq!(board.state(), SessionState::CalibrationPending);
        assert_eq!(board.address(), Some(ADDR));
    }

    #[test]
    fn test_open_failure_leaves_nothing_open() {
        let transport = MockTransport::new();
        transport.fail_open(COMMAND_PSM);
        let mut board = board(&transport);

        let err = board.connect(ADDR).unwrap_err();
        assert!(matches!(
            err,
            BoardError::TransportOpenFailed { psm: COMMAND_PSM, .. }
        ));
        assert_eq!(transport.open_channels(), 0);
        assert_eq!(board.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_handshake_failure_tears_down() {
        let transport = MockTransport::new();
        transport.fail_send_at(2);
        let mut board = board(&transport);

        let err = board.connect(ADDR).unwrap_err();
        assert!(matches!(
            err,
            BoardError::ConnectionFailed {
                step: "request calibration",
                ..
            }
        ));
        assert_eq!(transport.open_channels(), 0);
        assert!(!board.is_connected());
    }

    #[test]
    fn test_read_while_disconnected_is_noop() {
        let transport = MockTransport::new();
        transport.push_report(sensor_report([5000; 4]));
        let mut board = board(&transport);

        assert_eq!(board.read().unwrap(), None);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_empty_poll_returns_nothing() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);
        assert_eq!(board.read().unwrap(), None);
        transport.push_error(io::ErrorKind::TimedOut);
        assert_eq!(board.read().unwrap(), None);
    }

    #[test]
    fn test_calibration_reports_complete_the_table() {
        let transport = MockTransport::new();
        let mut board = board(&transport);
        board.connect(ADDR).unwrap();

        transport.push_report(read_data_report(&be_block(&[
            10, 20, 30, 40, 50, 60, 70, 80,
        ])));
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(board.state(), SessionState::CalibrationPending);

        transport.push_report(read_data_report(&be_block(&[3000, 3100, 3200, 3300])));
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(board.state(), SessionState::Ready);
        assert_eq!(board.calibration().bounds(Corner::BottomRight), Some((20, 3100)));
    }

    #[test]
    fn test_unsolicited_calibration_is_ignored() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);
        let before = board.calibration().clone();

        transport.push_report(read_data_report(&be_block(&[9000, 9000, 9000, 9000])));
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(board.calibration(), &before);
    }

    #[test]
    fn test_sensor_report_yields_reading() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        // BL, TR, BR, TL
        transport.push_report(sensor_report([1000, 2000, 500, 1500]));
        let reading = board.read().unwrap().unwrap();
        assert_eq!(reading.bottom_left, 10.0);
        assert_eq!(reading.top_right, 20.0);
        assert_eq!(reading.bottom_right, 5.0);
        assert_eq!(reading.top_left, 15.0);
        assert_eq!(reading.total_weight, 50.0);
    }

    #[test]
    fn test_sensor_report_before_calibration_reads_zero() {
        let transport = MockTransport::new();
        let mut board = board(&transport);
        board.connect(ADDR).unwrap();

        transport.push_report(sensor_report([5000; 4]));
        let reading = board.read().unwrap().unwrap();
        assert_eq!(reading.total_weight, 0.0);
    }

    #[test]
    fn test_status_report_refreshes_reporting_mode() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        transport.push_report(status_report(0x83));
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(transport.sent(), vec![vec![0x52, 0x12, 0x04, 0x32]]);
        assert_eq!(board.battery_level(), Some(0x83));
    }

    #[test]
    fn test_malformed_report_is_dropped() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        transport.push_report(vec![0xA1]);
        transport.push_report(vec![0xA1, 0x21, 0x00, 0x00, 0xF0, 0x00, 0x24, 0x01]);
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(board.read().unwrap(), None);
        assert_eq!(board.state(), SessionState::Ready);
    }

    #[test]
    fn test_hard_error_surfaces_transport_lost() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        transport.push_error(io::ErrorKind::ConnectionReset);
        assert!(matches!(board.read(), Err(BoardError::TransportLost(_))));
        assert!(board.is_connected());

        transport.push_closed();
        assert!(matches!(board.read(), Err(BoardError::TransportLost(_))));
        assert!(board.is_connected());
    }

    #[test]
    fn test_calibrate_zero_without_readings_fails() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        assert!(matches!(
            board.calibrate_zero(),
            Err(BoardError::NoBaselineSamples)
        ));
        assert!(board.baseline().is_none());
    }

    #[test]
    fn test_calibrate_zero_requires_connection() {
        let transport = MockTransport::new();
        let mut board = board(&transport);
        assert!(matches!(board.calibrate_zero(), Err(BoardError::NotConnected)));
    }

    #[test]
    fn test_calibrate_zero_averages_readings() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        // 20 kg and 30 kg on every corner
        transport.push_report(sensor_report([2000; 4]));
        transport.push_report(sensor_report([3000; 4]));

        board.calibrate_zero().unwrap();
        let baseline = board.baseline().unwrap();
        for corner in Corner::ALL {
            assert_eq!(baseline.get(corner), 25.0);
        }

        // The baseline is subtracted from the raw count before scaling.
        transport.push_report(sensor_report([1025; 4]));
        let reading = board.read().unwrap().unwrap();
        assert_eq!(reading.top_left, 10.0);
    }

    #[test]
    fn test_failed_zeroing_keeps_previous_baseline() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);

        transport.push_report(sensor_report([2000; 4]));
        board.calibrate_zero().unwrap();
        let first = board.baseline().cloned();
        assert_eq!(first.as_ref().map(|b| b.get(Corner::TopLeft)), Some(20.0));

        assert!(matches!(
            board.calibrate_zero(),
            Err(BoardError::NoBaselineSamples)
        ));
        assert_eq!(board.baseline().cloned(), first);

        transport.push_error(io::ErrorKind::ConnectionReset);
        assert!(matches!(
            board.calibrate_zero(),
            Err(BoardError::TransportLost(_))
        ));
        assert_eq!(board.baseline().cloned(), first);
    }

    #[test]
    fn test_set_indicator() {
        let transport = MockTransport::new();
        let mut board = board(&transport);
        board.set_indicator(true).unwrap();
        assert!(transport.sent().is_empty());

        board.connect(ADDR).unwrap();
        transport.clear_sent();
        board.set_indicator(false).unwrap();
        board.set_indicator(true).unwrap();
        assert_eq!(
            transport.sent(),
            vec![vec![0x52, 0x00, 0x11, 0x00], vec![0x52, 0x00, 0x11, 0x10]]
        );
        assert!(board.is_connected());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);
        assert_eq!(transport.open_channels(), 2);

        board.disconnect();
        board.disconnect();
        assert_eq!(transport.open_channels(), 0);
        assert_eq!(board.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_reconnect_starts_a_fresh_session() {
        let transport = MockTransport::new();
        let mut board = connected_board(&transport);
        assert_eq!(board.state(), SessionState::Ready);

        board.connect(ADDR).unwrap();
        assert_eq!(transport.open_channels(), 2);
        assert_eq!(board.state(), SessionState::CalibrationPending);
        assert!(!board.calibration().is_complete());
    }

    #[test]
    fn test_setup_discovers_by_name() {
        let transport = MockTransport::new();
        let pairer = ScriptedPairer {
            devices: vec![
                DiscoveredDevice {
                    address: BdAddr([1, 2, 3, 4, 5, 6]),
                    name: "Headphones".to_string(),
                },
                DiscoveredDevice {
                    address: ADDR,
                    name: "Nintendo RVL-WBC-01".to_string(),
                },
            ],
            ..Default::default()
        };
        let paired = pairer.paired.clone();
        let mut board = WiiBalanceBoard::new(
            transport,
            pairer,
            "Nintendo RVL-WBC-01".to_string(),
            TimingSettings::immediate(),
        );

        assert_eq!(board.setup(None).unwrap(), ADDR);
        assert_eq!(board.address(), Some(ADDR));
        assert_eq!(*paired.lock().unwrap(), vec![ADDR]);
    }

    #[test]
    fn test_setup_without_match_fails() {
        let transport = MockTransport::new();
        let mut board = board(&transport);
        assert!(matches!(
            board.setup(None),
            Err(BoardError::DeviceNotFound(_))
        ));
        assert_eq!(board.address(), None);
    }

    #[test]
    fn test_setup_propagates_pairing_failure() {
        let pairer = ScriptedPairer {
            fail_pairing: true,
            ..Default::default()
        };
        let mut board = WiiBalanceBoard::new(
            MockTransport::new(),
            pairer,
            "Nintendo RVL-WBC-01".to_string(),
            TimingSettings::immediate(),
        );
        assert!(matches!(
            board.setup(Some(ADDR)),
            Err(BoardError::PairingFailed(_))
        ));
    }
}
