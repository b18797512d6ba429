//! Board worker
//!
//! Owns the board on a dedicated thread and polls it at a fixed interval.
//! Consumers never touch the board directly: they send `BluetoothCommand`s
//! and receive `AppEvent`s.

use crate::domain::board::Board;
use crate::domain::error::BoardError;
use crate::domain::models::{AppEvent, BdAddr, MessageSeverity, StatusMessage};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    Setup(Option<BdAddr>),
    /// Connect to the given address, or the one resolved by `Setup`.
    Connect(Option<BdAddr>),
    CalibrateZero,
    SetIndicator(bool),
    Disconnect,
    Shutdown,
}

/// Commands run to completion on the worker thread. A `Shutdown` queued
/// behind a slow command such as `CalibrateZero` waits for it to finish.
pub struct BoardWorker {
    commands: mpsc::UnboundedSender<BluetoothCommand>,
    handle: Option<JoinHandle<Box<dyn Board>>>,
}

impl BoardWorker {
    pub fn spawn(
        board: Box<dyn Board>,
        poll_interval: Duration,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> anyhow::Result<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();

        let handle = std::thread::Builder::new()
            .name("board-poll".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create tokio runtime for the board worker: {}", e);
                        return board;
                    }
                };
                rt.block_on(run(board, command_rx, events, poll_interval))
            })?;

        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Queue a command. Returns `false` once the worker has stopped.
    pub fn send(&self, command: BluetoothCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Disconnect the board, stop polling and hand the board back.
    pub fn shutdown(mut self) -> Option<Box<dyn Board>> {
        let _ = self.commands.send(BluetoothCommand::Shutdown);
        self.handle.take()?.join().ok()
    }
}

impl Drop for BoardWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(BluetoothCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

async fn run(
    board: Box<dyn Board>,
    mut commands: mpsc::UnboundedReceiver<BluetoothCommand>,
    events: mpsc::UnboundedSender<AppEvent>,
    poll_interval: Duration,
) -> Box<dyn Board> {
    let mut poller = Poller {
        board,
        events,
        last_connected: None,
        last_battery: None,
    };
    poller.publish_connection();

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(BluetoothCommand::Shutdown) | None => break,
                Some(command) => poller.handle(command),
            },
            _ = ticker.tick() => poller.poll(),
        }
    }

    poller.board.disconnect();
    poller.publish_connection();
    info!("Board worker stopped");
    poller.board
}

struct Poller {
    board: Box<dyn Board>,
    events: mpsc::UnboundedSender<AppEvent>,
    last_connected: Option<bool>,
    last_battery: Option<u8>,
}

impl Poller {
    fn handle(&mut self, command: BluetoothCommand) {
        let name = self.board.name().to_string();
        match command {
            BluetoothCommand::Setup(address) => match self.board.setup(address) {
                Ok(address) => self.send_log(
                    &format!("{} ready at {}", name, address),
                    MessageSeverity::Success,
                ),
                Err(e) => self.report_failure("Setup failed", &e),
            },
            BluetoothCommand::Connect(address) => {
                match address.or_else(|| self.board.address()) {
                    Some(address) => match self.board.connect(address) {
                        Ok(()) => self.send_log("Connected!", MessageSeverity::Success),
                        Err(e) => self.report_failure("Connection failed", &e),
                    },
                    None => self.send_log(
                        "No board address known, run setup first",
                        MessageSeverity::Error,
                    ),
                }
            }
            BluetoothCommand::CalibrateZero => match self.board.calibrate_zero() {
                Ok(()) => self.send_log("Calibration successful.", MessageSeverity::Success),
                Err(e) => self.report_failure("Failed to calibrate zero point", &e),
            },
            BluetoothCommand::SetIndicator(on) => {
                if let Err(e) = self.board.set_indicator(on) {
                    self.report_failure("Indicator command failed", &e);
                }
            }
            BluetoothCommand::Disconnect => self.board.disconnect(),
            BluetoothCommand::Shutdown => {}
        }
        self.publish_connection();
    }

    fn poll(&mut self) {
        if !self.board.is_connected() {
            return;
        }
        match self.board.read() {
            Ok(Some(reading)) => {
                let _ = self.events.send(AppEvent::Reading(reading));
            }
            Ok(None) => {}
            Err(e) => {
                self.report_failure("Board connection lost", &e);
                self.board.disconnect();
            }
        }
        self.publish_battery();
        self.publish_connection();
    }

    fn publish_battery(&mut self) {
        let level = self.board.battery_level();
        if level.is_some() && level != self.last_battery {
            self.last_battery = level;
            if let Some(level) = level {
                let _ = self.events.send(AppEvent::BatteryLevel(level));
            }
        }
    }

    /// Emit `ConnectionChanged` only when the state actually flips.
    fn publish_connection(&mut self) {
        let connected = self.board.is_connected();
        if self.last_connected != Some(connected) {
            self.last_connected = Some(connected);
            let _ = self.events.send(AppEvent::ConnectionChanged(connected));
        }
    }

    fn report_failure(&self, context: &str, err: &BoardError) {
        let severity = match err {
            BoardError::TransportLost(_) => {
                warn!("{}: {}", context, err);
                MessageSeverity::Warning
            }
            _ => {
                error!("{}: {}", context, err);
                MessageSeverity::Error
            }
        };
        self.send_log(&format!("{}: {}", context, err), severity);
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.events.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
