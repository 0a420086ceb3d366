//! Synthetic anemometer frames.
//!
//! Values are uniform over plausible physical ranges so that downstream code
//! exercises realistic magnitudes (101-103 kPa after calibration).

use super::SensorSource;
use crate::calibration::RawSample;
use crate::error::AppResult;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;

/// Ranges for the twelve raw fields, in transport order (error count excluded).
const RANGES: [Range<f64>; 11] = [
    -10.0..10.0,    // U (m/s)
    -10.0..10.0,    // V (m/s)
    -10.0..10.0,    // W (m/s)
    0.0..20.0,      // 2D speed (m/s)
    0.0..30.0,      // 3D speed (m/s)
    0.0..360.0,     // azimuth (deg)
    -90.0..90.0,    // elevation (deg)
    3000.0..4000.0, // pressure raw
    2700.0..3000.0, // temperature raw
    2000.0..3000.0, // humidity raw
    15.0..35.0,     // sonic temperature (C)
];

/// Generates random frames; never fails.
pub struct SimulatedSensor {
    rng: StdRng,
}

impl SimulatedSensor {
    /// Create a generator with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Produce one frame synchronously.
    pub fn frame(&mut self) -> RawSample {
        let mut fields: Vec<String> = RANGES
            .iter()
            .map(|r| self.rng.gen_range(r.clone()).to_string())
            .collect();
        fields.push("0".to_string());
        RawSample::new(fields)
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for SimulatedSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSensor").finish_non_exhaustive()
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn read(&mut self) -> AppResult<RawSample> {
        Ok(self.frame())
    }

    fn describe(&self) -> String {
        "simulated anemometer".to_string()
    }
}
