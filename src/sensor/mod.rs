//! Anemometer transports.
//!
//! The sampler only sees the [`SensorSource`] trait. Two implementations exist:
//!
//! - [`SimulatedSensor`]: uniform synthetic frames, used when no hardware is
//!   attached and as the substitute reading after a failed read.
//! - [`SerialSensor`]: the RS-232 link to the anemometer (feature
//!   `instrument_serial`).

mod frame;
mod simulated;

#[cfg(feature = "instrument_serial")]
mod serial;

pub use frame::{clean_token, decode_frame, is_plain_float};
pub use simulated::SimulatedSensor;

#[cfg(feature = "instrument_serial")]
pub use serial::SerialSensor;

use crate::calibration::RawSample;
use crate::error::AppResult;
use async_trait::async_trait;

/// Something that yields raw anemometer frames.
#[async_trait]
pub trait SensorSource: Send {
    /// Read the next frame. Errors are recoverable; the caller substitutes a
    /// simulated frame.
    async fn read(&mut self) -> AppResult<RawSample>;

    /// Human readable description for log output.
    fn describe(&self) -> String;
}

#[async_trait]
impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    async fn read(&mut self) -> AppResult<RawSample> {
        (**self).read().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
