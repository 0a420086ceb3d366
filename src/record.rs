//! Typed CSV rows.
//!
//! A [`LogRow`] is the only thing the Log Rotation Writer accepts. The eleven
//! physical fields are rounded to [`ROUND_PLACES`] decimals when the row is
//! built; the timestamp and the error count are never rounded.

use crate::calibration::{ProcessedSample, MEASUREMENT_COUNT};
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Local, Timelike};

/// Decimal places kept for physical fields.
pub const ROUND_PLACES: i32 = 8;

/// Timestamp format of high-frequency rows.
pub const SUB_SECOND_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Timestamp format of standard rows.
pub const WHOLE_SECOND_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Round `value` to `places` decimals, half away from zero.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// One CSV row ready to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    /// Pre-formatted timestamp
    pub timestamp: String,
    /// Physical fields in column order, already rounded
    pub measurements: [f64; MEASUREMENT_COUNT],
    /// Error count, verbatim
    pub error: f64,
}

impl LogRow {
    /// Column names, in order.
    pub const COLUMNS: [&'static str; MEASUREMENT_COUNT + 2] = [
        "tNow",
        "u_m_s",
        "v_m_s",
        "w_m_s",
        "2dSpeed_m_s",
        "3DSpeed_m_s",
        "Azimuth_deg",
        "Elev_deg",
        "Press_Pa",
        "Temp_C",
        "Hum_RH",
        "SonicTemp_C",
        "Error",
    ];

    /// Row for the high-frequency path: capture time with sub-second precision.
    pub fn high_frequency(sample: &ProcessedSample) -> Self {
        Self {
            timestamp: sample.captured_at.format(SUB_SECOND_FORMAT).to_string(),
            measurements: sample.measurements().map(|v| round_to(v, ROUND_PLACES)),
            error: sample.error,
        }
    }

    /// Row for the standard path: `stamp` truncated to whole seconds.
    pub fn standard(
        stamp: DateTime<Local>,
        measurements: [f64; MEASUREMENT_COUNT],
        error: f64,
    ) -> Self {
        let stamp = stamp.with_nanosecond(0).unwrap_or(stamp);
        Self {
            timestamp: stamp.format(WHOLE_SECOND_FORMAT).to_string(),
            measurements: measurements.map(|v| round_to(v, ROUND_PLACES)),
            error,
        }
    }

    /// Field values as CSV strings, in [`Self::COLUMNS`] order.
    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(Self::COLUMNS.len());
        record.push(self.timestamp.clone());
        record.extend(self.measurements.iter().map(|v| v.to_string()));
        record.push(self.error.to_string());
        record
    }

    /// Check a configured header against the row schema.
    pub fn check_schema(fieldnames: &[String]) -> AppResult<()> {
        let matches = fieldnames.len() == Self::COLUMNS.len()
            && fieldnames.iter().zip(Self::COLUMNS).all(|(a, b)| a == b);
        if matches {
            Ok(())
        } else {
            Err(DaqError::SchemaMismatch {
                expected: fieldnames.len(),
                actual: Self::COLUMNS.len(),
                fields: fieldnames.join(","),
            })
        }
    }
}
