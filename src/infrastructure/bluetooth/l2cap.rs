//! L2CAP Transport
//!
//! Sequential-packet L2CAP sockets opened directly through the kernel
//! Bluetooth stack. Only available on Linux.

use crate::domain::models::BdAddr;
use crate::infrastructure::bluetooth::transport::{Channel, Connector};
use std::io;
use std::time::Duration;
use tracing::debug;

/// Opens L2CAP channels to a paired device.
#[derive(Debug, Default, Clone, Copy)]
pub struct L2capConnector;

impl L2capConnector {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    const BTPROTO_L2CAP: libc::c_int = 0;
    const BDADDR_BREDR: u8 = 0;

    /// `struct sockaddr_l2` from the kernel headers.
    #[repr(C)]
    struct SockaddrL2 {
        l2_family: libc::sa_family_t,
        l2_psm: u16,
        l2_bdaddr: [u8; 6],
        l2_cid: u16,
        l2_bdaddr_type: u8,
    }

    pub struct L2capChannel {
        fd: OwnedFd,
    }

    pub fn connect(address: BdAddr, psm: u16) -> io::Result<L2capChannel> {
        let raw = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
                BTPROTO_L2CAP,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // bdaddr_t is little-endian
        let mut bdaddr = address.0;
        bdaddr.reverse();
        let addr = SockaddrL2 {
            l2_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: psm.to_le(),
            l2_bdaddr: bdaddr,
            l2_cid: 0,
            l2_bdaddr_type: BDADDR_BREDR,
        };

        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const SockaddrL2 as *const libc::sockaddr,
                std::mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(L2capChannel { fd })
    }

    impl Channel for L2capChannel {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            let rc = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            if rc as usize != frame.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "short write on L2CAP channel",
                ));
            }
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
            let mut pollfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

            let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if ready < 0 {
                return Err(io::Error::last_os_error());
            }
            if ready == 0 {
                return Err(io::ErrorKind::TimedOut.into());
            }

            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::*;

    pub struct L2capChannel {
        _private: (),
    }

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "L2CAP sockets are only supported on Linux",
        )
    }

    pub fn connect(_address: BdAddr, _psm: u16) -> io::Result<L2capChannel> {
        Err(unsupported())
    }

    impl Channel for L2capChannel {
        fn send(&mut self, _frame: &[u8]) -> io::Result<()> {
            Err(unsupported())
        }

        fn recv(&mut self, _buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
            Err(unsupported())
        }
    }
}

pub use sys::L2capChannel;

impl Connector for L2capConnector {
    type Channel = L2capChannel;

    fn open(&mut self, address: BdAddr, psm: u16) -> io::Result<L2capChannel> {
        debug!("Opening L2CAP channel 0x{:02X} to {}", psm, address);
        sys::connect(address, psm)
    }
}
