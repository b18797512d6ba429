//! Mass Estimator
//!
//! Linear interpolation between the EMPTY and FULL calibration counts of a
//! corner. Any unusable input degrades to 0.0 kg instead of failing.

use crate::domain::calibration::CalibrationTable;
use crate::domain::models::{BaselineOffsets, Corner};

/// Mass represented by the FULL calibration row, per load cell.
pub const FULL_SCALE_KG: f64 = 34.0;

/// Adjusted counts at or below this are sensor noise.
pub const NOISE_FLOOR_COUNTS: f64 = 50.0;

/// Minimum span between EMPTY and FULL for a usable calibration.
pub const MIN_CALIBRATION_SPAN: u16 = 100;

/// Estimated masses below this are reported as zero.
pub const MIN_REPORTED_KG: f64 = 3.0;

/// Convert a raw count into kilograms for one corner.
pub fn estimate(
    raw: u16,
    corner: Corner,
    calibration: &CalibrationTable,
    baseline: Option<&BaselineOffsets>,
) -> f64 {
    let Some((empty, full)) = calibration.bounds(corner) else {
        return 0.0;
    };

    let mut adjusted = f64::from(raw);
    if let Some(baseline) = baseline {
        adjusted -= baseline.get(corner);
    }

    if adjusted <= NOISE_FLOOR_COUNTS {
        return 0.0;
    }

    if full <= empty || full - empty < MIN_CALIBRATION_SPAN {
        return 0.0;
    }

    let weight = FULL_SCALE_KG * (adjusted - f64::from(empty)) / f64::from(full - empty);
    if weight < MIN_REPORTED_KG {
        return 0.0;
    }
    weight
}
