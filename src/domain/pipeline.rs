//! Reading Pipeline
//!
//! Turns sensor payloads into readings and damps sudden jumps in the total.

use crate::domain::calibration::{CalibrationRow, CalibrationTable};
use crate::domain::mass;
use crate::domain::models::{BaselineOffsets, Corner, RawSample, Reading};
use tracing::trace;

/// Raw counts this far above EMPTY still count as an empty board.
pub const EMPTY_BOARD_MARGIN: u16 = 100;

/// Jumps in the total larger than this are blended with the previous total.
pub const SPIKE_THRESHOLD_KG: f64 = 5.0;

/// Weight kept from the previous total when blending.
pub const PREVIOUS_WEIGHT: f64 = 0.7;

#[derive(Debug, Default)]
pub struct ReadingPipeline {
    previous_total: Option<f64>,
}

impl ReadingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known previous total.
    pub fn with_previous_total(total: f64) -> Self {
        Self {
            previous_total: Some(total),
        }
    }

    pub fn previous_total(&self) -> Option<f64> {
        self.previous_total
    }

    pub fn reset(&mut self) {
        self.previous_total = None;
    }

    /// Decode one 8-byte sensor payload.
    ///
    /// Returns `None` if the payload is too short.
    pub fn process(
        &mut self,
        payload: &[u8],
        calibration: &CalibrationTable,
        baseline: Option<&BaselineOffsets>,
    ) -> Option<Reading> {
        let sample = RawSample::parse(payload)?;

        // Compared on raw counts, before any baseline correction.
        let empty_board = Corner::ALL.iter().all(|&corner| {
            let floor = u32::from(calibration.get(CalibrationRow::Empty, corner))
                + u32::from(EMPTY_BOARD_MARGIN);
            u32::from(sample.get(corner)) <= floor
        });
        // The smoothing history survives stepping off the board.
        if empty_board {
            return Some(Reading::default());
        }

        let mass_of = |corner| mass::estimate(sample.get(corner), corner, calibration, baseline);
        let mut reading = Reading {
            top_right: mass_of(Corner::TopRight),
            bottom_right: mass_of(Corner::BottomRight),
            top_left: mass_of(Corner::TopLeft),
            bottom_left: mass_of(Corner::BottomLeft),
            total_weight: 0.0,
        };

        let sum = reading.top_right + reading.bottom_right + reading.top_left + reading.bottom_left;
        reading.total_weight = self.smooth(sum);
        trace!(raw = ?sample, total = reading.total_weight, "sensor sample");

        Some(reading)
    }

    fn smooth(&mut self, total: f64) -> f64 {
        let smoothed = match self.previous_total {
            Some(previous) if (total - previous).abs() > SPIKE_THRESHOLD_KG => {
                PREVIOUS_WEIGHT * previous + (1.0 - PREVIOUS_WEIGHT) * total
            }
            _ => total,
        };
        self.previous_total = Some(smoothed);
        smoothed
    }
}
