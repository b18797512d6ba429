//! Balance Board Protocol
//!
//! Command frames sent on the command channel and the reports received on
//! the report channel.

use crate::domain::error::{BoardError, Result};
use tracing::trace;

/// L2CAP channel carrying input reports.
pub const REPORT_PSM: u16 = 0x13;

/// L2CAP channel accepting command frames.
pub const COMMAND_PSM: u16 = 0x11;

/// First byte of every outbound frame.
pub const VENDOR_PREFIX: u8 = 0x52;

pub const COMMAND_LIGHT: u8 = 0x11;
pub const COMMAND_REPORTING: u8 = 0x12;
pub const COMMAND_REGISTER: u8 = 0x16;
pub const COMMAND_READ_REGISTER: u8 = 0x17;
pub const CONTINUOUS_REPORTING: u8 = 0x04;

pub const INPUT_STATUS: u8 = 0x20;
pub const INPUT_READ_DATA: u8 = 0x21;
pub const EXTENSION_8BYTES: u8 = 0x32;

/// Largest report the board sends.
pub const REPORT_BUFFER_LEN: usize = 25;

/// Offset of the data block inside a read-data report.
pub const READ_DATA_OFFSET: usize = 7;

/// Offset of the battery byte inside a status report.
pub const BATTERY_OFFSET: usize = 7;

/// Sensor payload location inside an extension report.
pub const SENSOR_PAYLOAD_START: usize = 2;
pub const SENSOR_PAYLOAD_LEN: usize = 8;

/// Commands understood by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardCommand {
    /// Activate the extension register block holding the load cells
    RegisterExtension,
    /// Stream 8-byte extension reports continuously
    EnableContinuousReporting,
    /// Read the 24 bytes of calibration memory
    RequestCalibration,
    /// Power button light
    Indicator(bool),
}

impl BoardCommand {
    /// Opcode and payload tokens, without the vendor prefix
    pub fn tokens(&self) -> (Token<'static>, &'static [Token<'static>]) {
        use Token::{Byte, Hex};
        match self {
            Self::RegisterExtension => (
                Hex("00"),
                &[Byte(COMMAND_REGISTER), Hex("04"), Hex("A4"), Hex("00"), Hex("40"), Hex("00")],
            ),
            Self::EnableContinuousReporting => (
                Byte(COMMAND_REPORTING),
                &[Byte(CONTINUOUS_REPORTING), Byte(EXTENSION_8BYTES)],
            ),
            Self::RequestCalibration => (
                Byte(COMMAND_READ_REGISTER),
                &[Hex("04"), Hex("A4"), Hex("00"), Hex("24"), Hex("00"), Hex("18")],
            ),
            Self::Indicator(true) => (Hex("00"), &[Byte(COMMAND_LIGHT), Hex("10")]),
            Self::Indicator(false) => (Hex("00"), &[Byte(COMMAND_LIGHT), Hex("00")]),
        }
    }

    /// Complete outbound frame
    pub fn frame(&self) -> Result<Vec<u8>> {
        let (opcode, payload) = self.tokens();
        encode_command(opcode, payload)
    }
}

/// Handshake sent right after the channels open, in order.
pub const INIT_SEQUENCE: &[(BoardCommand, &str)] = &[
    (BoardCommand::RegisterExtension, "register extension"),
    (BoardCommand::EnableContinuousReporting, "enable reporting"),
    (BoardCommand::RequestCalibration, "request calibration"),
    (BoardCommand::Indicator(true), "indicator on"),
];

/// One element of a command frame: either a byte or a two-digit hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Byte(u8),
    Hex(&'a str),
}

impl Token<'_> {
    fn to_byte(self) -> Result<u8> {
        match self {
            Token::Byte(b) => Ok(b),
            Token::Hex(text) if text.len() == 2 && text.bytes().all(|b| b.is_ascii_hexdigit()) => {
                u8::from_str_radix(text, 16)
                    .map_err(|_| BoardError::InvalidCommandToken(text.to_string()))
            }
            Token::Hex(text) => Err(BoardError::InvalidCommandToken(text.to_string())),
        }
    }
}

impl From<u8> for Token<'_> {
    fn from(b: u8) -> Self {
        Token::Byte(b)
    }
}

impl<'a> From<&'a str> for Token<'a> {
    fn from(text: &'a str) -> Self {
        Token::Hex(text)
    }
}

/// Build a frame from an opcode and payload tokens.
pub fn encode_command(opcode: Token<'_>, payload: &[Token<'_>]) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(VENDOR_PREFIX);
    frame.push(opcode.to_byte()?);
    for token in payload {
        frame.push(token.to_byte()?);
    }
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Raw battery level, if the report was long enough to carry it.
    pub battery: Option<u8>,
}

/// Inbound report, classified by its type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report<'a> {
    Status(StatusReport),
    CalibrationRead {
        /// Block length minus one, from the high nibble of byte 4.
        size_nibble: u8,
        payload: &'a [u8],
    },
    Sensor {
        payload: &'a [u8],
    },
    Unknown(u8),
}

/// Classify a raw report.
///
/// # Report Layout
///
/// ```text
/// [0]      : Transaction header
/// [1]      : Report type
///
/// 0x20 status:
/// [7]      : Battery level
///
/// 0x21 read data:
/// [4]      : High nibble = block length - 1
/// [7..]    : Block contents
///
/// 0x32 extension, 8 bytes:
/// [2..10]  : Four big-endian u16 counts (BL, TR, BR, TL)
/// ```
pub fn decode_report(bytes: &[u8]) -> Result<Report<'_>> {
    if bytes.len() < 2 {
        return Err(BoardError::MalformedReport(format!(
            "{} byte report",
            bytes.len()
        )));
    }

    #[cfg(debug_assertions)]
    trace!("Raw report: {:02X?}", bytes);

    let report = match bytes[1] {
        INPUT_STATUS => Report::Status(StatusReport {
            battery: bytes.get(BATTERY_OFFSET).copied(),
        }),
        INPUT_READ_DATA => {
            let size_byte = *bytes.get(4).ok_or_else(|| {
                BoardError::MalformedReport("read-data report without size byte".to_string())
            })?;
            let size_nibble = size_byte >> 4;
            let len = usize::from(size_nibble) + 1;
            let payload = bytes
                .get(READ_DATA_OFFSET..READ_DATA_OFFSET + len)
                .ok_or_else(|| {
                    BoardError::MalformedReport(format!(
                        "read-data report announces {} bytes, carries {}",
                        len,
                        bytes.len().saturating_sub(READ_DATA_OFFSET)
                    ))
                })?;
            Report::CalibrationRead {
                size_nibble,
                payload,
            }
        }
        EXTENSION_8BYTES => {
            let end = bytes.len().min(SENSOR_PAYLOAD_START + SENSOR_PAYLOAD_LEN);
            Report::Sensor {
                payload: &bytes[SENSOR_PAYLOAD_START.min(end)..end],
            }
        }
        other => Report::Unknown(other),
    };

    Ok(report)
}
