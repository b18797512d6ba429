//! Calibration Store
//!
//! The board keeps three reference counts per load cell in its extension
//! memory: the reading with no load, an intermediate point and the reading
//! at the full-scale reference mass. The memory is returned in two register
//! reads, a 16-byte block (EMPTY and MID rows) followed by a shorter block
//! (FULL row). Blocks are told apart by length, never by arrival order.

use crate::domain::error::{BoardError, Result};
use crate::domain::models::Corner;

/// Size of the block carrying the EMPTY and MID rows.
pub const REFERENCE_BLOCK_LEN: usize = 16;

/// Bytes needed for one row of four big-endian counts.
pub const ROW_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationRow {
    Empty = 0,
    Mid = 1,
    Full = 2,
}

/// Reference counts for one corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationPoint {
    pub empty: u16,
    pub mid: u16,
    pub full: u16,
}

impl CalibrationPoint {
    pub fn get(&self, row: CalibrationRow) -> u16 {
        match row {
            CalibrationRow::Empty => self.empty,
            CalibrationRow::Mid => self.mid,
            CalibrationRow::Full => self.full,
        }
    }

    fn set(&mut self, row: CalibrationRow, value: u16) {
        match row {
            CalibrationRow::Empty => self.empty = value,
            CalibrationRow::Mid => self.mid = value,
            CalibrationRow::Full => self.full = value,
        }
    }
}

/// Calibration table, keyed by corner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationTable {
    points: [CalibrationPoint; 4],
    has_reference: bool,
    has_full: bool,
}

impl CalibrationTable {
    /// Build a fully populated table, one point per corner in `Corner::ALL` order.
    pub fn from_points(points: [CalibrationPoint; 4]) -> Self {
        Self {
            points,
            has_reference: true,
            has_full: true,
        }
    }

    pub fn point(&self, corner: Corner) -> CalibrationPoint {
        self.points[corner.index()]
    }

    pub fn get(&self, row: CalibrationRow, corner: Corner) -> u16 {
        self.point(corner).get(row)
    }

    /// `(empty, full)` for a corner once both rows have been received.
    pub fn bounds(&self, corner: Corner) -> Option<(u16, u16)> {
        if !self.is_complete() {
            return None;
        }
        let point = self.point(corner);
        Some((point.empty, point.full))
    }

    pub fn is_complete(&self) -> bool {
        self.has_reference && self.has_full
    }

    fn write_row(&mut self, row: CalibrationRow, bytes: &[u8]) {
        for corner in Corner::ALL {
            let at = corner.index() * 2;
            let value = u16::from_be_bytes([bytes[at], bytes[at + 1]]);
            self.points[corner.index()].set(row, value);
        }
    }
}

/// Which part of the table a calibration block filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// EMPTY and MID rows.
    ReferenceRows,
    /// FULL row; the outstanding read is complete.
    FullRow,
}

/// Accumulates calibration blocks and tracks the outstanding read request.
#[derive(Debug, Default)]
pub struct CalibrationStore {
    table: CalibrationTable,
    pending: bool,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a calibration read as requested.
    pub fn begin_request(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    /// Forget everything learned from the current device.
    pub fn reset(&mut self) {
        self.table = CalibrationTable::default();
        self.pending = false;
    }

    /// Decode one calibration block by its length.
    pub fn ingest(&mut self, payload: &[u8]) -> Result<IngestOutcome> {
        match payload.len() {
            REFERENCE_BLOCK_LEN => {
                self.table.write_row(CalibrationRow::Empty, &payload[..ROW_LEN]);
                self.table.write_row(CalibrationRow::Mid, &payload[ROW_LEN..]);
                self.table.has_reference = true;
                Ok(IngestOutcome::ReferenceRows)
            }
            len if (ROW_LEN..REFERENCE_BLOCK_LEN).contains(&len) => {
                self.table.write_row(CalibrationRow::Full, &payload[..ROW_LEN]);
                self.table.has_full = true;
                self.pending = false;
                Ok(IngestOutcome::FullRow)
            }
            len => Err(BoardError::MalformedReport(format!(
                "calibration block of {} bytes",
                len
            ))),
        }
    }
}
