//! High-frequency logger.
//!
//! Persists every queued sample while the station is in HIGH_FREQUENCY mode,
//! never faster than one row per `1/high_freq_hz` seconds. Any mode transition
//! discards whatever is queued so that a stale burst never bleeds into the next
//! period.

use crate::calibration::ProcessedSample;
use crate::config::Settings;
use crate::error::AppResult;
use crate::mode::{Mode, ModeFlag};
use crate::queue::BoundedQueue;
use crate::record::LogRow;
use crate::rotation::LogRotationWriter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Idle sleep when there is nothing to write.
pub const IDLE_POLL: Duration = Duration::from_millis(5);

/// Outcome of one [`HighFrequencyLogger::poll_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HfPoll {
    /// A row was written.
    Wrote,
    /// Too soon after the previous write; retry at the given instant.
    Throttled(Instant),
    /// High-frequency mode, empty queue.
    Empty,
    /// Standard mode.
    Standby,
}

/// Drains the high-frequency queue into the log.
pub struct HighFrequencyLogger {
    queue: BoundedQueue<ProcessedSample>,
    mode: ModeFlag,
    writer: Arc<LogRotationWriter>,
    spacing: Duration,
    last_mode: Mode,
    last_write: Option<Instant>,
    rows_written: u64,
    discarded: u64,
}

impl HighFrequencyLogger {
    /// Logger writing at most `settings.acquisition.high_freq_hz` rows per second.
    pub fn new(
        queue: BoundedQueue<ProcessedSample>,
        mode: ModeFlag,
        writer: Arc<LogRotationWriter>,
        settings: &Settings,
    ) -> Self {
        let last_mode = mode.get();
        Self {
            queue,
            mode,
            writer,
            spacing: settings.high_freq_interval(),
            last_mode,
            last_write: None,
            rows_written: 0,
            discarded: 0,
        }
    }

    /// Rows written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Samples thrown away on mode transitions.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Observe the mode and write at most one row.
    pub fn poll_once(&mut self, now: Instant) -> AppResult<HfPoll> {
        let mode = self.mode.get();
        if mode != self.last_mode {
            let n = self.queue.clear();
            self.discarded += n as u64;
            info!(from = %self.last_mode, to = %mode, discarded = n, "high-frequency queue reset");
            self.last_mode = mode;
            self.last_write = None;
        }

        if mode != Mode::HighFrequency {
            return Ok(HfPoll::Standby);
        }

        if let Some(last) = self.last_write {
            let due = last + self.spacing;
            if now < due {
                return Ok(HfPoll::Throttled(due));
            }
        }

        let Some(sample) = self.queue.try_pop() else {
            return Ok(HfPoll::Empty);
        };
        self.writer.submit(&LogRow::high_frequency(&sample))?;
        self.last_write = Some(now);
        self.rows_written += 1;
        debug!(rows = self.rows_written, backlog = self.queue.len(), "high-frequency row written");
        Ok(HfPoll::Wrote)
    }

    /// Write rows until the exit signal is raised. Writer failures are fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        info!(spacing_ms = self.spacing.as_secs_f64() * 1e3, "high-frequency logger started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Instant::now();
            let wake = match self.poll_once(now)? {
                HfPoll::Wrote => now + self.spacing,
                HfPoll::Throttled(due) => due,
                HfPoll::Empty | HfPoll::Standby => now + IDLE_POLL,
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
        info!(rows = self.rows_written, discarded = self.discarded, "high-frequency logger stopped");
        Ok(())
    }
}
