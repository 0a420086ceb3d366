//! RS-232 link to the sonic anemometer.
//!
//! The instrument streams continuously; one frame is everything up to the next
//! carriage return. Reads are blocking, so they run on tokio's blocking pool.

use super::{decode_frame, SensorSource};
use crate::calibration::RawSample;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, trace};

/// Upper bound on a frame; longer input without `\r` is treated as garbage.
const MAX_FRAME_BYTES: usize = 512;

/// Serial anemometer source.
pub struct SerialSensor {
    port_name: String,
    timeout: Duration,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

impl SerialSensor {
    /// Open `port_name` at `baud_rate`.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> AppResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| DaqError::Sensor(format!("failed to open {port_name}: {e}")))?;
        info!(port = port_name, baud_rate, "serial port opened");
        Ok(Self {
            port_name: port_name.to_string(),
            timeout,
            port: Arc::new(Mutex::new(port)),
        })
    }
}

/// Read bytes until `\r`, the deadline, or [`MAX_FRAME_BYTES`].
fn read_frame(port: &mut Box<dyn SerialPort>, timeout: Duration) -> AppResult<Vec<u8>> {
    let start = Instant::now();
    let mut frame = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while start.elapsed() < timeout {
        match port.read(&mut byte) {
            Ok(1) => {
                if byte[0] == b'\r' {
                    return Ok(frame);
                }
                frame.push(byte[0]);
                if frame.len() > MAX_FRAME_BYTES {
                    return Err(DaqError::Sensor("frame exceeds maximum length".into()));
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(DaqError::Sensor(format!("serial read failed: {e}"))),
        }
    }
    Err(DaqError::Sensor(format!(
        "no frame terminator within {}ms ({} bytes)",
        timeout.as_millis(),
        frame.len()
    )))
}

#[async_trait]
impl SensorSource for SerialSensor {
    async fn read(&mut self) -> AppResult<RawSample> {
        let port = Arc::clone(&self.port);
        let timeout = self.timeout;
        let bytes = tokio::task::spawn_blocking(move || {
            let mut port = port.blocking_lock();
            read_frame(&mut port, timeout)
        })
        .await
        .map_err(|e| DaqError::Sensor(format!("serial read task failed: {e}")))??;
        trace!(port = %self.port_name, frame = %String::from_utf8_lossy(&bytes).escape_default(), "frame");
        decode_frame(&bytes)
    }

    fn describe(&self) -> String {
        format!("serial anemometer on {}", self.port_name)
    }
}
