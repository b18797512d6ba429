//! Bluetooth Module
//!
//! Talks to the Balance Board over two L2CAP channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    WiiBalanceBoard                       │
//! │      (session state machine, implements `Board`)         │
//! └──────────┬──────────────┬──────────────┬────────────────┘
//!            │              │              │
//!            ▼              ▼              ▼
//! ┌────────────────┐ ┌────────────┐ ┌────────────┐
//! │   Transport    │ │  Protocol  │ │  Pairing   │
//! │                │ │            │ │            │
//! │ - L2CAP report │ │ - Commands │ │ - Discovery│
//! │ - L2CAP command│ │ - Reports  │ │ - bluetoothctl
//! └────────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Command frames and report decoding
//! - [`transport`] - Channel abstraction shared by real and scripted peers
//! - [`l2cap`] - Linux L2CAP sockets
//! - [`pairing`] - Discovery and pairing through `bluetoothctl`
//! - [`session`] - The board session itself

pub mod l2cap;
pub mod pairing;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

// Re-export the session for convenience
pub use session::WiiBalanceBoard;
