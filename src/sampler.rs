//! Acquisition loop.
//!
//! The sampler is the only producer in the pipeline. It paces itself by the
//! current [`Mode`], reads one frame, calibrates it and fans the sample out to
//! three queues:
//!
//! ```text
//!                  ┌──► standard       (always)
//! SensorSource ──► calibrate ──► visualization (always)
//!                  └──► high_frequency (only in HIGH_FREQUENCY)
//! ```
//!
//! In STANDARD mode the sampler runs `oversample_factor` times faster than the
//! 1 Hz output so the averaging window is populated.

use crate::calibration::{calibrate, ProcessedSample};
use crate::config::{AcquisitionConfig, Settings};
use crate::error::AppResult;
use crate::mode::{Mode, ModeFlag};
use crate::queue::{BoundedQueue, PushOutcome};
use crate::sensor::{SensorSource, SimulatedSensor};
use chrono::Local;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often the sampler reports its mode and throughput.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Every n-th sample is traced at debug level.
const TRACE_EVERY: u64 = 100;

/// The three fan-out queues.
#[derive(Debug, Clone)]
pub struct SamplerQueues {
    /// Raw samples for the high-frequency logger
    pub high_frequency: BoundedQueue<ProcessedSample>,
    /// Samples for the averaging logger
    pub standard: BoundedQueue<ProcessedSample>,
    /// Samples for the visualization forwarder
    pub visualization: BoundedQueue<ProcessedSample>,
}

impl SamplerQueues {
    /// Queues sized from the acquisition settings.
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            high_frequency: BoundedQueue::new("high_frequency", config.hf_queue_capacity),
            standard: BoundedQueue::new("standard", config.standard_queue_capacity),
            visualization: BoundedQueue::new("visualization", config.viz_queue_capacity),
        }
    }
}

/// Sampler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Samples produced
    pub samples: u64,
    /// Reads that failed and were replaced by simulated frames
    pub read_failures: u64,
    /// Samples dropped because a queue stayed full
    pub dropped: u64,
    /// Backlog items discarded to make room for fresh samples
    pub discarded: u64,
}

/// Mode-paced producer.
pub struct Sampler<S> {
    source: S,
    fallback: SimulatedSensor,
    mode: ModeFlag,
    queues: SamplerQueues,
    high_freq_interval: Duration,
    standard_interval: Duration,
    error_count: u64,
    stats: SamplerStats,
    failing: bool,
}

impl<S: SensorSource> Sampler<S> {
    /// Build a sampler with cadences taken from `settings`.
    pub fn new(source: S, mode: ModeFlag, queues: SamplerQueues, settings: &Settings) -> Self {
        let oversample = settings.acquisition.oversample_factor.max(1);
        Self {
            source,
            fallback: SimulatedSensor::default(),
            mode,
            queues,
            high_freq_interval: settings.high_freq_interval(),
            standard_interval: settings.standard_period() / oversample,
            error_count: 0,
            stats: SamplerStats::default(),
            failing: false,
        }
    }

    /// Seed the fallback generator (tests).
    pub fn with_fallback(mut self, fallback: SimulatedSensor) -> Self {
        self.fallback = fallback;
        self
    }

    /// Target spacing between samples in `mode`.
    pub fn interval(&self, mode: Mode) -> Duration {
        match mode {
            Mode::HighFrequency => self.high_freq_interval,
            Mode::Standard => self.standard_interval,
        }
    }

    /// Running error counter.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Counters so far.
    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Acquire, calibrate and fan out one sample.
    pub async fn step(&mut self) -> ProcessedSample {
        let raw = match self.source.read().await {
            Ok(raw) => {
                if self.failing {
                    info!(source = %self.source.describe(), "sensor reads recovered");
                    self.failing = false;
                }
                raw
            }
            Err(e) => {
                self.error_count += 1;
                self.stats.read_failures += 1;
                if self.failing {
                    debug!(error = %e, errors = self.error_count, "sensor read failed, using simulated frame");
                } else {
                    warn!(error = %e, errors = self.error_count, "sensor read failed, using simulated frame");
                    self.failing = true;
                }
                self.fallback.frame()
            }
        };

        let calibrated = calibrate(&raw, self.error_count, Local::now());
        self.error_count = calibrated.error_count;
        let sample = calibrated.sample;

        if self.mode.get() == Mode::HighFrequency {
            self.record_push(self.queues.high_frequency.push_fresh(sample));
        }
        self.record_push(self.queues.standard.push_fresh(sample));
        self.record_push(self.queues.visualization.push_fresh(sample));

        self.stats.samples += 1;
        if self.stats.samples % TRACE_EVERY == 0 {
            debug!(
                samples = self.stats.samples,
                rate_hz = 1.0 / self.interval(self.mode.get()).as_secs_f64(),
                "sampling"
            );
        }
        sample
    }

    fn record_push(&mut self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Pushed => {}
            PushOutcome::PushedAfterDrain { discarded } => {
                self.stats.discarded += discarded as u64;
            }
            PushOutcome::Dropped => self.stats.dropped += 1,
        }
    }

    /// Sample until the exit signal is raised.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        info!(
            source = %self.source.describe(),
            mode = %self.mode.get(),
            "sampler started"
        );
        let mut next = Instant::now();
        let mut status_at = next + STATUS_INTERVAL;
        let mut since_status = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep_until(next) => {}
            }

            let started = Instant::now();
            let mode = self.mode.get();
            self.step().await;
            since_status += 1;

            next = (started + self.interval(mode)).max(Instant::now());

            if started >= status_at {
                info!(mode = %mode, samples = since_status, "current mode");
                since_status = 0;
                status_at = started + STATUS_INTERVAL;
            }
        }

        info!(
            samples = self.stats.samples,
            read_failures = self.stats.read_failures,
            dropped = self.stats.dropped,
            "sampler stopped"
        );
        Ok(())
    }
}
