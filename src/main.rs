use anyhow::Context;
use balance_board::domain::models::{AppEvent, MessageSeverity};
use balance_board::domain::settings::SettingsService;
use balance_board::infrastructure::logging::init_logger;
use balance_board::{BdAddr, BluetoothCommand, BoardWorker, WiiBalanceBoard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Overrides the configured board address.
const ADDRESS_ENV: &str = "BALANCE_BOARD_ADDRESS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::load()?;
    if let Ok(text) = std::env::var(ADDRESS_ENV) {
        let address = text
            .parse::<BdAddr>()
            .with_context(|| format!("{} is not a Bluetooth address", ADDRESS_ENV))?;
        settings_service.get_mut().address = Some(address);
    }
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)?;
    info!("Starting Balance Board driver");
    if let Some(path) = settings_service.path() {
        info!("Settings loaded from {}", path.display());
    }

    let board = WiiBalanceBoard::from_settings(&settings);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let worker = BoardWorker::spawn(Box::new(board), settings.timings.poll_interval(), event_tx)?;

    info!("Press the red sync button on the Balance Board now");
    info!("DO NOT STEP ON BOARD until calibration is done");
    worker.send(BluetoothCommand::Setup(settings.address));
    worker.send(BluetoothCommand::Connect(None));
    worker.send(BluetoothCommand::CalibrateZero);

    let mut outcome = Ok(());
    let mut was_connected = false;
    let mut shown_total = None;

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    AppEvent::Reading(reading) => {
                        debug!("{:?}", reading);
                        let rounded = (reading.total_weight * 10.0).round() / 10.0;
                        if shown_total != Some(rounded) {
                            shown_total = Some(rounded);
                            info!(
                                "Weight: {:.1} kg (TL {:.1} | TR {:.1} | BL {:.1} | BR {:.1})",
                                rounded,
                                reading.top_left,
                                reading.top_right,
                                reading.bottom_left,
                                reading.bottom_right
                            );
                            if let Some((x, y)) = reading.center_of_balance() {
                                info!("Center of balance: x {:+.2}, y {:+.2}", x, y);
                            }
                        }
                    }
                    AppEvent::ConnectionChanged(true) => {
                        was_connected = true;
                        info!("Board connected");
                    }
                    AppEvent::ConnectionChanged(false) => {
                        if was_connected {
                            warn!("Board disconnected");
                            break;
                        }
                    }
                    AppEvent::BatteryLevel(level) => info!("Battery level: 0x{:02X}", level),
                    AppEvent::LogMessage(message) => match message.severity {
                        MessageSeverity::Error => {
                            error!("{}", message.message);
                            outcome = Err(anyhow::anyhow!(message.message));
                            break;
                        }
                        MessageSeverity::Warning => warn!("{}", message.message),
                        MessageSeverity::Info | MessageSeverity::Success => {
                            info!("{}", message.message)
                        }
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || worker.shutdown()).await?;
    outcome
}
