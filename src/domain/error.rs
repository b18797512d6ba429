use thiserror::Error;

/// Errors surfaced by a board session.
///
/// A poll that finds no data and a calibration that is still incomplete are
/// not errors: the first is `Ok(None)`, the second reads as 0.0 kg.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("could not open channel 0x{psm:02X}: {source}")]
    TransportOpenFailed {
        psm: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("connection setup failed during {step}: {source}")]
    ConnectionFailed {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed report: {0}")]
    MalformedReport(String),

    #[error("transport lost: {0}")]
    TransportLost(#[source] std::io::Error),

    #[error("board is not connected")]
    NotConnected,

    #[error("no device named {0:?} found")]
    DeviceNotFound(String),

    #[error("pairing failed: {0}")]
    PairingFailed(String),

    #[error("no readings obtained while sampling the zero point")]
    NoBaselineSamples,

    #[error("invalid command token {0:?}")]
    InvalidCommandToken(String),

    #[error("invalid Bluetooth address {0:?}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, BoardError>;
