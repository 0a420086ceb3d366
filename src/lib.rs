//! # wx_daq
//!
//! Dual-rate telemetry logger for a sonic anemometer weather station.
//!
//! The station samples continuously and logs one averaged row per second. On
//! an operator command it switches to logging every raw sample at 32 Hz and
//! back again, while a live feed goes out over UDP to a remote viewer.
//!
//! ## Crate Structure
//!
//! - **`calibration`**: raw frame → physical units.
//! - **`config`**: figment-based `Settings` (defaults, TOML, `WX_DAQ_*` env).
//! - **`error`**: the `DaqError` enum and exit codes.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`mode`**: the shared mode flag and the UDP control socket.
//! - **`queue`**: non-blocking bounded queues with drain-on-full.
//! - **`record`**: typed CSV rows and rounding.
//! - **`rotation`**: the rotating log writer and its `current`/`previous` links.
//! - **`sampler`**: the mode-paced producer.
//! - **`hf_logger`** / **`standard_logger`**: the two log paths.
//! - **`forwarder`**: the rate-limited visualization feed.
//! - **`sensor`**: `SensorSource` with serial and simulated transports.
//! - **`operator`**: client side of the control protocol.
//! - **`station`**: assembly, supervision and shutdown.

pub mod calibration;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod hf_logger;
pub mod logging;
pub mod mode;
pub mod operator;
pub mod queue;
pub mod record;
pub mod rotation;
pub mod sampler;
pub mod sensor;
pub mod standard_logger;
pub mod station;
