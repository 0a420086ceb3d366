//! CLI entry point for wx_daq
//!
//! ```bash
//! wx_daq run --config config/wx_daq.toml   # start the station (Ctrl-C to stop)
//! wx_daq mode high                         # switch a running station to 32 Hz
//! wx_daq mode low                          # back to 1 Hz
//! wx_daq status                            # print the current mode
//! ```
//!
//! Fatal station errors exit with a distinct status (see `DaqError::exit_code`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use wx_daq::config::Settings;
use wx_daq::logging;
use wx_daq::mode::Mode;
use wx_daq::operator::{self, OperatorClient};
use wx_daq::station::{open_sensor, Station};

#[derive(Parser)]
#[command(name = "wx_daq")]
#[command(about = "Dual-rate anemometer logger with rotating CSV output", long_about = None)]
struct Cli {
    /// Optional TOML config file (environment `WX_DAQ_*` overrides it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the station until Ctrl-C
    Run,

    /// Switch a running station's logging rate
    Mode {
        /// Target rate
        rate: Rate,

        /// How many times to send the command
        #[arg(long, default_value_t = operator::DEFAULT_REPEATS)]
        repeats: u32,
    },

    /// Ask a running station for its current mode
    Status {
        /// Reply timeout in milliseconds
        #[arg(long, default_value_t = operator::DEFAULT_STATUS_TIMEOUT.as_millis() as u64)]
        timeout_ms: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Rate {
    /// 32 Hz raw logging
    High,
    /// 1 Hz averaged logging
    Low,
}

impl From<Rate> for Mode {
    fn from(rate: Rate) -> Self {
        match rate {
            Rate::High => Mode::HighFrequency,
            Rate::Low => Mode::Standard,
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> wx_daq::error::AppResult<Settings> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_ref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("wx_daq: {e}");
            std::process::exit(e.exit_code());
        }
    };
    if let Err(e) = logging::init_from_config(&settings) {
        eprintln!("wx_daq: {e}");
        std::process::exit(e.exit_code());
    }

    match cli.command {
        Commands::Run => run_station(settings).await,
        Commands::Mode { rate, repeats } => {
            let client = OperatorClient::from_settings(&settings)?;
            let mode = Mode::from(rate);
            client
                .set_mode(mode, repeats, operator::DEFAULT_SPACING)
                .await
                .context("failed to send mode command")?;
            println!("{mode} command sent to {}", settings.control_addr()?);
            Ok(())
        }
        Commands::Status { timeout_ms } => {
            let client = OperatorClient::from_settings(&settings)?;
            let mode = client
                .query_status(Duration::from_millis(timeout_ms))
                .await
                .context("no status reply from station")?;
            println!("CURRENT_MODE:{}", mode.rate_label());
            Ok(())
        }
    }
}

async fn run_station(settings: Settings) -> Result<()> {
    let sensor = open_sensor(&settings.serial);
    let station = match Station::new(settings) {
        Ok(station) => station,
        Err(e) => {
            error!(error = %e, "station failed to start");
            eprintln!("wx_daq: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let mut readings = station.readings();
    tokio::spawn(async move {
        while readings.changed().await.is_ok() {
            let reading = readings.borrow_and_update().clone();
            if let Some(reading) = reading {
                info!(
                    mode = %reading.mode,
                    persisted = reading.persisted,
                    averaged = reading.averaged,
                    row = ?reading.row.to_record(),
                    "reading"
                );
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, closing logfile and exiting");
            shutdown_tx.send_replace(true);
        }
    });

    if let Err(e) = station.run(sensor, shutdown_rx).await {
        error!(error = %e, "station stopped on fatal error");
        eprintln!("wx_daq: {e}");
        std::process::exit(e.exit_code());
    }
    Ok(())
}
