//! Board capability interface
//!
//! Every force-sensing board model is driven through the same polling
//! contract, so callers hold a `Box<dyn Board>` rather than a concrete type.

use crate::domain::error::Result;
use crate::domain::models::{BdAddr, Reading, SessionState};

pub trait Board: Send {
    /// Human readable model name.
    fn name(&self) -> &str;

    /// Resolve the device address (discovering it if `None`) and pair.
    fn setup(&mut self, address: Option<BdAddr>) -> Result<BdAddr>;

    /// Open the channels and run the initialization handshake.
    ///
    /// On failure the session is left fully disconnected.
    fn connect(&mut self, address: BdAddr) -> Result<()>;

    /// Sample the empty board and store the result as the zero point.
    fn calibrate_zero(&mut self) -> Result<()>;

    /// Close all channels. Safe to call when already disconnected.
    fn disconnect(&mut self);

    /// Poll for one report without blocking.
    ///
    /// `Ok(None)` means nothing was available or the report carried no
    /// reading. Always `Ok(None)` while disconnected.
    fn read(&mut self) -> Result<Option<Reading>>;

    /// Switch the indicator light.
    fn set_indicator(&mut self, on: bool) -> Result<()>;

    fn state(&self) -> SessionState;

    /// Address resolved by the last successful `setup`, if any.
    fn address(&self) -> Option<BdAddr>;

    /// Last battery level reported by the device, if it reports one.
    fn battery_level(&self) -> Option<u8> {
        None
    }

    fn is_connected(&self) -> bool {
        self.state() != SessionState::Disconnected
    }
}
