//! One-per-second averaged output.
//!
//! The [`StandardLogger`] folds every queued sample into a [`DownsampleWindow`]
//! (the last 32 samples) and on each persist tick reduces it to one row:
//!
//! * a full window is averaged field by field,
//! * a partial window (startup) yields the latest sample verbatim,
//! * the error field always comes from the latest sample.
//!
//! Rows are persisted only in STANDARD mode. In HIGH_FREQUENCY mode the same
//! computation runs for display and the result is discarded, and a separate
//! display timer keeps the live reading fresh. Every computed reading is
//! published on a watch channel (see [`StandardLogger::subscribe`]).

use crate::calibration::{ProcessedSample, MEASUREMENT_COUNT};
use crate::config::Settings;
use crate::error::AppResult;
use crate::mode::{Mode, ModeFlag};
use crate::queue::BoundedQueue;
use crate::record::LogRow;
use crate::rotation::LogRotationWriter;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Longest the loop sleeps before looking at the mode again.
pub const MODE_POLL: Duration = Duration::from_millis(50);

/// Sliding window over the most recent samples.
#[derive(Debug, Clone)]
pub struct DownsampleWindow {
    samples: VecDeque<ProcessedSample>,
    capacity: usize,
}

impl DownsampleWindow {
    /// Empty window holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, trimming the oldest samples beyond capacity.
    pub fn push(&mut self, sample: ProcessedSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the window holds `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Most recently appended sample.
    pub fn latest(&self) -> Option<&ProcessedSample> {
        self.samples.back()
    }

    /// Per-field arithmetic mean over the window.
    pub fn mean(&self) -> Option<[f64; MEASUREMENT_COUNT]> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sums = [0.0; MEASUREMENT_COUNT];
        for sample in &self.samples {
            for (sum, value) in sums.iter_mut().zip(sample.measurements()) {
                *sum += value;
            }
        }
        let n = self.samples.len() as f64;
        Some(sums.map(|sum| sum / n))
    }

    /// Reduce the window to one set of values, or `None` if nothing arrived yet.
    pub fn summarize(&self) -> Option<Summary> {
        let latest = self.latest()?;
        let (measurements, averaged) = match self.is_full().then(|| self.mean()).flatten() {
            Some(mean) => (mean, true),
            None => (latest.measurements(), false),
        };
        Some(Summary {
            measurements,
            error: latest.error,
            averaged,
        })
    }
}

/// Unrounded window reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Physical fields
    pub measurements: [f64; MEASUREMENT_COUNT],
    /// Error field of the latest sample
    pub error: f64,
    /// Whether `measurements` is a mean (full window) or the latest sample
    pub averaged: bool,
}

/// A computed 1 Hz reading, persisted or display-only.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardReading {
    /// Rounded row as it is (or would be) logged
    pub row: LogRow,
    /// Mode at computation time
    pub mode: Mode,
    /// Whether the row is a window mean
    pub averaged: bool,
    /// Whether the row went to the log
    pub persisted: bool,
}

/// Averaging consumer of the standard queue.
pub struct StandardLogger {
    queue: BoundedQueue<ProcessedSample>,
    mode: ModeFlag,
    writer: Arc<LogRotationWriter>,
    window: DownsampleWindow,
    period: Duration,
    readings: watch::Sender<Option<StandardReading>>,
    last_mode: Mode,
    rows_written: u64,
}

impl StandardLogger {
    /// Logger with window size and period from `settings`.
    pub fn new(
        queue: BoundedQueue<ProcessedSample>,
        mode: ModeFlag,
        writer: Arc<LogRotationWriter>,
        settings: &Settings,
    ) -> Self {
        let (readings, _) = watch::channel(None);
        let last_mode = mode.get();
        Self {
            queue,
            mode,
            writer,
            window: DownsampleWindow::new(settings.acquisition.window_capacity),
            period: settings.standard_period(),
            readings,
            last_mode,
            rows_written: 0,
        }
    }

    /// Receive every computed reading.
    pub fn subscribe(&self) -> watch::Receiver<Option<StandardReading>> {
        self.readings.subscribe()
    }

    /// The averaging window.
    pub fn window(&self) -> &DownsampleWindow {
        &self.window
    }

    /// Rows persisted so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Move everything queued into the window.
    pub fn drain_queue(&mut self) -> usize {
        let mut n = 0;
        while let Some(sample) = self.queue.try_pop() {
            self.window.push(sample);
            n += 1;
        }
        n
    }

    /// Persist tick: compute a row and log it in STANDARD mode.
    pub fn persist_tick(&mut self, now: DateTime<Local>) -> AppResult<Option<StandardReading>> {
        self.drain_queue();
        let mode = self.mode.get();
        let Some(mut reading) = self.compute(now, mode) else {
            debug!("no samples yet, skipping persist tick");
            return Ok(None);
        };
        if mode == Mode::Standard {
            self.writer.submit(&reading.row)?;
            self.rows_written += 1;
            reading.persisted = true;
        }
        self.readings.send_replace(Some(reading.clone()));
        Ok(Some(reading))
    }

    /// Display tick: compute and publish, never persist.
    pub fn display_tick(&mut self, now: DateTime<Local>) -> Option<StandardReading> {
        self.drain_queue();
        let reading = self.compute(now, self.mode.get())?;
        self.readings.send_replace(Some(reading.clone()));
        Some(reading)
    }

    fn compute(&self, now: DateTime<Local>, mode: Mode) -> Option<StandardReading> {
        let summary = self.window.summarize()?;
        Some(StandardReading {
            row: LogRow::standard(now, summary.measurements, summary.error),
            mode,
            averaged: summary.averaged,
            persisted: false,
        })
    }

    /// Run both timers until the exit signal is raised. Writer failures are fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        info!(
            period_secs = self.period.as_secs_f64(),
            window = self.window.capacity,
            "standard logger started"
        );
        let start = Instant::now();
        let mut next_persist = start + self.period;
        let mut next_display = start + self.period;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Instant::now();
            let mode = self.mode.get();
            if mode != self.last_mode {
                info!(from = %self.last_mode, to = %mode, "standard logger following mode change");
                if mode == Mode::HighFrequency {
                    next_display = now;
                }
                self.last_mode = mode;
            }

            let due = if mode == Mode::HighFrequency {
                next_persist.min(next_display)
            } else {
                next_persist
            };
            if now < due {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(due.min(now + MODE_POLL)) => {}
                }
                continue;
            }

            if now >= next_persist {
                self.persist_tick(Local::now())?;
                next_persist += self.period;
                if next_persist <= now {
                    next_persist = now + self.period;
                }
            }
            if mode == Mode::HighFrequency && now >= next_display {
                self.display_tick(Local::now());
                next_display = now + self.period;
            }
        }
        info!(rows = self.rows_written, "standard logger stopped");
        Ok(())
    }
}
