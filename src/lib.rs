//! Wii Balance Board driver.
//!
//! Connects to the board over L2CAP, runs its calibration handshake and
//! decodes sensor reports into per-corner and total weights in kilograms.

pub mod domain;
pub mod infrastructure;

pub use domain::board::Board;
pub use domain::error::BoardError;
pub use domain::models::{AppEvent, BdAddr, Corner, Reading, SessionState};
pub use infrastructure::bluetooth::WiiBalanceBoard;
pub use infrastructure::worker::{BluetoothCommand, BoardWorker};
