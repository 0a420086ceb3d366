//! Station assembly and supervision.
//!
//! [`Station`] wires the pipeline together and runs every worker as a tokio
//! task:
//!
//! ```text
//!   ModeController ──► ModeFlag ◄── Sampler, HighFrequencyLogger, StandardLogger
//!   Sampler ──► {high_frequency, standard, visualization} queues
//!   HighFrequencyLogger ─┐
//!   StandardLogger ──────┴──► LogRotationWriter ◄── rotation poller
//!   VisualizationForwarder ──► UDP peer
//! ```
//!
//! All workers share one exit signal. The first fatal worker error raises it
//! for everyone else; once all tasks have joined the log file is flushed and
//! closed and that error is returned.

use crate::config::{SerialConfig, Settings};
use crate::error::{AppResult, DaqError};
use crate::forwarder::VisualizationForwarder;
use crate::hf_logger::HighFrequencyLogger;
use crate::mode::{ModeController, ModeFlag};
use crate::rotation::LogRotationWriter;
use crate::sampler::{Sampler, SamplerQueues};
use crate::sensor::{SensorSource, SimulatedSensor};
use crate::standard_logger::{StandardLogger, StandardReading};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type WorkerSet = JoinSet<(&'static str, AppResult<()>)>;

fn spawn_worker<F>(tasks: &mut WorkerSet, name: &'static str, worker: F)
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    tasks.spawn(async move { (name, worker.await) });
    debug!(worker = name, "worker spawned");
}

/// Open the configured anemometer, falling back to the simulator.
pub fn open_sensor(config: &SerialConfig) -> Box<dyn SensorSource> {
    if !config.enabled {
        info!("serial input disabled, using simulated data");
        return Box::new(SimulatedSensor::default());
    }
    match open_serial(config) {
        Ok(sensor) => sensor,
        Err(e) => {
            warn!(port = %config.port, error = %e, "serial port unavailable, using simulated data");
            Box::new(SimulatedSensor::default())
        }
    }
}

#[cfg(feature = "instrument_serial")]
fn open_serial(config: &SerialConfig) -> AppResult<Box<dyn SensorSource>> {
    let sensor = crate::sensor::SerialSensor::open(
        &config.port,
        config.baud_rate,
        Duration::from_millis(config.timeout_ms),
    )?;
    Ok(Box::new(sensor))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_config: &SerialConfig) -> AppResult<Box<dyn SensorSource>> {
    Err(DaqError::SerialFeatureDisabled)
}

/// The assembled telemetry pipeline.
pub struct Station {
    settings: Settings,
    mode: ModeFlag,
    queues: SamplerQueues,
    writer: Arc<LogRotationWriter>,
    standard: StandardLogger,
}

impl Station {
    /// Validate settings and open the log. Storage failures are fatal here.
    pub fn new(settings: Settings) -> AppResult<Self> {
        settings.validate()?;
        let writer = Arc::new(LogRotationWriter::open(&settings.storage)?);
        let mode = ModeFlag::default();
        let queues = SamplerQueues::from_config(&settings.acquisition);
        let standard = StandardLogger::new(
            queues.standard.clone(),
            mode.clone(),
            Arc::clone(&writer),
            &settings,
        );
        Ok(Self {
            settings,
            mode,
            queues,
            writer,
            standard,
        })
    }

    /// Shared mode flag.
    pub fn mode(&self) -> ModeFlag {
        self.mode.clone()
    }

    /// The log writer.
    pub fn writer(&self) -> Arc<LogRotationWriter> {
        Arc::clone(&self.writer)
    }

    /// Live 1 Hz readings.
    pub fn readings(&self) -> watch::Receiver<Option<StandardReading>> {
        self.standard.subscribe()
    }

    /// Run until `shutdown` turns true or a worker fails fatally.
    pub async fn run<S>(self, source: S, mut shutdown: watch::Receiver<bool>) -> AppResult<()>
    where
        S: SensorSource + 'static,
    {
        let Station {
            settings,
            mode,
            queues,
            writer,
            standard,
        } = self;

        let controller = ModeController::bind(
            settings.control_addr()?,
            settings.status_addr()?,
            mode.clone(),
            Duration::from_millis(settings.network.control_poll_ms),
        )
        .await?;
        let forwarder =
            VisualizationForwarder::bind(queues.visualization.clone(), &settings).await?;
        let sampler = Sampler::new(source, mode.clone(), queues.clone(), &settings);
        let hf_logger = HighFrequencyLogger::new(
            queues.high_frequency.clone(),
            mode.clone(),
            Arc::clone(&writer),
            &settings,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = WorkerSet::new();
        spawn_worker(&mut tasks, "mode_controller", controller.run(stop_rx.clone()));
        spawn_worker(&mut tasks, "sampler", sampler.run(stop_rx.clone()));
        spawn_worker(&mut tasks, "high_frequency_logger", hf_logger.run(stop_rx.clone()));
        spawn_worker(&mut tasks, "standard_logger", standard.run(stop_rx.clone()));
        spawn_worker(&mut tasks, "visualization_forwarder", forwarder.run(stop_rx.clone()));
        spawn_worker(
            &mut tasks,
            "rotation_poller",
            Arc::clone(&writer).run_poller(
                Duration::from_secs(settings.storage.rotation_check_secs),
                stop_rx,
            ),
        );
        info!(mode = %mode.get(), workers = tasks.len(), "station running");

        let mut failure: Option<DaqError> = None;
        let mut stopping = *shutdown.borrow();
        if stopping {
            stop_tx.send_replace(true);
        }
        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let outcome = match joined {
                        Ok((name, Ok(()))) => {
                            debug!(worker = name, "worker finished");
                            None
                        }
                        Ok((name, Err(e))) => {
                            error!(worker = name, error = %e, "worker failed");
                            Some(e)
                        }
                        Err(e) => {
                            error!(error = %e, "worker task aborted");
                            Some(DaqError::WorkerAborted(e.to_string()))
                        }
                    };
                    if let Some(e) = outcome {
                        failure.get_or_insert(e);
                        stop_tx.send_replace(true);
                        stopping = true;
                    }
                }
                changed = shutdown.changed(), if !stopping => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, stopping workers");
                        stop_tx.send_replace(true);
                        stopping = true;
                    }
                }
            }
        }

        let closed = writer.close();
        match (failure, closed) {
            (Some(e), Err(close_err)) => {
                error!(error = %close_err, "failed to close logfile");
                Err(e)
            }
            (Some(e), Ok(())) => Err(e),
            (None, closed) => {
                closed?;
                info!(rows = writer.rows_written(), "station stopped");
                Ok(())
            }
        }
    }
}
