//! Transport boundary
//!
//! A board is reached through two independent packet channels to the same
//! peer, one per PSM. Closing a channel is dropping it.

use crate::domain::models::BdAddr;
use std::io;
use std::time::Duration;

pub trait Channel: Send {
    /// Send one frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Receive at most one packet, waiting up to `timeout`.
    ///
    /// `Ok(0)` means the peer closed the channel. A timeout surfaces as
    /// `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

pub trait Connector: Send {
    type Channel: Channel;

    fn open(&mut self, address: BdAddr, psm: u16) -> io::Result<Self::Channel>;
}

/// Read outcomes that only mean "nothing arrived yet".
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
