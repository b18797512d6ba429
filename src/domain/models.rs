use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::BoardError;

/// One of the four load cells under the board surface.
///
/// The discriminant is the column index used by the calibration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corner {
    TopRight = 0,
    BottomRight = 1,
    TopLeft = 2,
    BottomLeft = 3,
}

impl Corner {
    /// Logical (calibration column) order.
    pub const ALL: [Corner; 4] = [
        Corner::TopRight,
        Corner::BottomRight,
        Corner::TopLeft,
        Corner::BottomLeft,
    ];

    /// Order in which the corners appear in a sensor report payload.
    pub const WIRE_ORDER: [Corner; 4] = [
        Corner::BottomLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::TopLeft,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Bluetooth device address, displayed as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BdAddr {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BoardError::InvalidAddress(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(BdAddr(bytes))
    }
}

impl Serialize for BdAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BdAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw 16-bit load cell counts from one sensor report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    counts: [u16; 4],
}

impl RawSample {
    /// Parse the 8-byte sensor payload (big-endian pairs in wire order).
    ///
    /// Returns `None` if fewer than 8 bytes are given.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 8 {
            return None;
        }
        let mut counts = [0u16; 4];
        for (i, corner) in Corner::WIRE_ORDER.iter().enumerate() {
            counts[corner.index()] = u16::from_be_bytes([payload[2 * i], payload[2 * i + 1]]);
        }
        Some(Self { counts })
    }

    pub fn get(&self, corner: Corner) -> u16 {
        self.counts[corner.index()]
    }
}

/// Learned per-corner zero point, subtracted from the raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaselineOffsets([f64; 4]);

impl BaselineOffsets {
    pub fn new(offsets: [f64; 4]) -> Self {
        Self(offsets)
    }

    /// Average the corner masses of the given readings.
    ///
    /// Returns `None` for an empty slice.
    pub fn average(readings: &[Reading]) -> Option<Self> {
        if readings.is_empty() {
            return None;
        }
        let count = readings.len() as f64;
        let mut sums = [0.0f64; 4];
        for reading in readings {
            for corner in Corner::ALL {
                sums[corner.index()] += reading.corner(corner);
            }
        }
        Some(Self(sums.map(|sum| sum / count)))
    }

    pub fn get(&self, corner: Corner) -> f64 {
        self.0[corner.index()]
    }
}

/// One decoded weight measurement, in kilograms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub top_right: f64,
    pub bottom_right: f64,
    pub top_left: f64,
    pub bottom_left: f64,
    pub total_weight: f64,
}

impl Reading {
    pub fn corner(&self, corner: Corner) -> f64 {
        match corner {
            Corner::TopRight => self.top_right,
            Corner::BottomRight => self.bottom_right,
            Corner::TopLeft => self.top_left,
            Corner::BottomLeft => self.bottom_left,
        }
    }

    /// Normalized center of pressure in `[-1, 1]`, positive towards top right.
    pub fn center_of_balance(&self) -> Option<(f64, f64)> {
        let sum = self.top_right + self.bottom_right + self.top_left + self.bottom_left;
        if sum <= 0.0 {
            return None;
        }
        let x = ((self.top_right + self.bottom_right) - (self.top_left + self.bottom_left)) / sum;
        let y = ((self.top_right + self.top_left) - (self.bottom_right + self.bottom_left)) / sum;
        Some((x, y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// Connected, waiting for the remaining calibration memory.
    CalibrationPending,
    /// Connected with a usable calibration table.
    Ready,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Reading(Reading),
    ConnectionChanged(bool),
    /// Raw battery byte, sent when it changes.
    BatteryLevel(u8),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
