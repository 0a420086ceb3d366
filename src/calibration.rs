//! Raw anemometer frames and their calibrated form.
//!
//! The sonic anemometer reports twelve whitespace separated fields per frame:
//!
//! ```text
//! u v w speed2d speed3d azimuth elevation press_raw temp_raw rh_raw sonic errors
//! ```
//!
//! Wind components, speeds, angles and the sonic temperature are already in
//! physical units. The three analog channels are raw counts and are converted
//! with fixed formulas:
//!
//! - `pressure    = (0.02 * press_raw + 950) * 100`  (Pa)
//! - `temperature = (100 / 4000) * temp_raw - 50`    (°C)
//! - `humidity    = (100 / 4000) * rh_raw`           (%RH)

use chrono::{DateTime, Local};

/// Number of fields in a raw frame.
pub const RAW_FIELD_COUNT: usize = 12;

/// Number of calibrated physical fields (everything but timestamp and error).
pub const MEASUREMENT_COUNT: usize = 11;

/// One uncalibrated frame, fields in transport order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    fields: Vec<String>,
}

impl RawSample {
    /// Wrap already tokenised fields.
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Split a decoded frame on whitespace.
    pub fn from_line(line: &str) -> Self {
        Self::new(line.split_whitespace().map(str::to_string).collect())
    }

    /// Fields in transport order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// A calibrated reading. Copied between components, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedSample {
    /// Capture time
    pub captured_at: DateTime<Local>,
    /// Wind component U (m/s)
    pub u: f64,
    /// Wind component V (m/s)
    pub v: f64,
    /// Wind component W (m/s)
    pub w: f64,
    /// Horizontal wind speed (m/s)
    pub speed_2d: f64,
    /// Total wind speed (m/s)
    pub speed_3d: f64,
    /// Azimuth (deg)
    pub azimuth: f64,
    /// Elevation (deg)
    pub elevation: f64,
    /// Barometric pressure (Pa)
    pub pressure: f64,
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Sonic temperature (°C)
    pub sonic_temp: f64,
    /// Error count; integer valued, never rounded
    pub error: f64,
}

impl ProcessedSample {
    /// The eleven physical fields in column order.
    pub fn measurements(&self) -> [f64; MEASUREMENT_COUNT] {
        [
            self.u,
            self.v,
            self.w,
            self.speed_2d,
            self.speed_3d,
            self.azimuth,
            self.elevation,
            self.pressure,
            self.temperature,
            self.humidity,
            self.sonic_temp,
        ]
    }

    /// Rebuild a sample from physical fields in column order.
    pub fn from_measurements(
        captured_at: DateTime<Local>,
        m: [f64; MEASUREMENT_COUNT],
        error: f64,
    ) -> Self {
        Self {
            captured_at,
            u: m[0],
            v: m[1],
            w: m[2],
            speed_2d: m[3],
            speed_3d: m[4],
            azimuth: m[5],
            elevation: m[6],
            pressure: m[7],
            temperature: m[8],
            humidity: m[9],
            sonic_temp: m[10],
            error,
        }
    }
}

/// Result of [`calibrate`]: the sample and the (possibly incremented) error count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibrated {
    /// Calibrated sample
    pub sample: ProcessedSample,
    /// Error count after this frame
    pub error_count: u64,
}

/// Pressure in Pa from the raw pressure channel.
pub fn pressure_pa(press_raw: f64) -> f64 {
    (0.02 * press_raw + 950.0) * 100.0
}

/// Air temperature in °C from the raw temperature channel.
pub fn temperature_c(temp_raw: f64) -> f64 {
    (100.0 / 4000.0) * temp_raw - 50.0
}

/// Relative humidity in % from the raw humidity channel.
pub fn humidity_rh(rh_raw: f64) -> f64 {
    (100.0 / 4000.0) * rh_raw
}

/// Calibrate a raw frame.
///
/// On success the error field carries the sensor's own error counter and
/// `error_count` is returned unchanged. If any field is missing or not a
/// number every physical field is zeroed, the error field becomes
/// `error_count + 1`, and that incremented count is returned.
pub fn calibrate(raw: &RawSample, error_count: u64, captured_at: DateTime<Local>) -> Calibrated {
    match parse_fields(raw.fields()) {
        Some(v) => Calibrated {
            sample: ProcessedSample {
                captured_at,
                u: v[0],
                v: v[1],
                w: v[2],
                speed_2d: v[3],
                speed_3d: v[4],
                azimuth: v[5],
                elevation: v[6],
                pressure: pressure_pa(v[7]),
                temperature: temperature_c(v[8]),
                humidity: humidity_rh(v[9]),
                sonic_temp: v[10],
                error: v[11],
            },
            error_count,
        },
        None => {
            tracing::debug!(fields = ?raw.fields(), "unparseable frame, zeroing sample");
            let error_count = error_count + 1;
            Calibrated {
                sample: ProcessedSample::from_measurements(
                    captured_at,
                    [0.0; MEASUREMENT_COUNT],
                    error_count as f64,
                ),
                error_count,
            }
        }
    }
}

fn parse_fields(fields: &[String]) -> Option<[f64; RAW_FIELD_COUNT]> {
    if fields.len() < RAW_FIELD_COUNT {
        return None;
    }
    let mut out = [0.0; RAW_FIELD_COUNT];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field.trim().parse().ok()?;
    }
    Some(out)
}
