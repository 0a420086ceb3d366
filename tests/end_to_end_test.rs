//! End-to-end pipeline scenario under paused time.
//!
//! Five seconds in STANDARD mode must produce exactly five whole-second rows.
//! After the operator switches to high frequency, 3.2 s of 32 Hz sampling must
//! produce about a hundred sub-second rows and no further standard rows.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wx_daq::config::Settings;
use wx_daq::hf_logger::HighFrequencyLogger;
use wx_daq::mode::{ControlEvent, Mode, ModeController, ModeFlag};
use wx_daq::rotation::LogRotationWriter;
use wx_daq::sampler::{Sampler, SamplerQueues};
use wx_daq::sensor::SimulatedSensor;
use wx_daq::standard_logger::StandardLogger;

/// (standard rows, high-frequency rows) in a log file.
fn count_rows(path: &Path) -> (usize, usize) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.get(0), Some("tNow"));
    assert_eq!(headers.len(), 13);

    let mut standard = 0;
    let mut high = 0;
    for record in reader.records() {
        let record = record.unwrap();
        let ts = record.get(0).unwrap();
        if ts.contains('.') {
            high += 1;
        } else {
            standard += 1;
        }
    }
    (standard, high)
}

#[tokio::test(start_paused = true)]
async fn standard_then_high_frequency_scenario() {
    let tmp = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.storage.log_dir = tmp.path().to_path_buf();

    let writer = Arc::new(LogRotationWriter::open(&settings.storage).unwrap());
    let path = writer.current_path().unwrap();
    let mode = ModeFlag::default();
    let queues = SamplerQueues::from_config(&settings.acquisition);

    let sampler = Sampler::new(
        SimulatedSensor::new(Some(11)),
        mode.clone(),
        queues.clone(),
        &settings,
    );
    let hf_logger = HighFrequencyLogger::new(
        queues.high_frequency.clone(),
        mode.clone(),
        Arc::clone(&writer),
        &settings,
    );
    let standard = StandardLogger::new(
        queues.standard.clone(),
        mode.clone(),
        Arc::clone(&writer),
        &settings,
    );
    let controller = ModeController::bind(
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1:9".parse().unwrap(),
        mode.clone(),
        Duration::from_millis(5),
    )
    .await
    .unwrap();

    let (tx, rx) = watch::channel(false);
    let tasks = vec![
        tokio::spawn(sampler.run(rx.clone())),
        tokio::spawn(hf_logger.run(rx.clone())),
        tokio::spawn(standard.run(rx)),
    ];

    tokio::time::sleep(Duration::from_millis(5050)).await;
    writer.flush().unwrap();
    assert_eq!(count_rows(&path), (5, 0));

    assert_eq!(
        controller.handle("1").await,
        ControlEvent::Transition {
            from: Mode::Standard,
            to: Mode::HighFrequency
        }
    );
    // operator tools repeat the command; repeats must not reset anything
    assert_eq!(controller.handle("1").await, ControlEvent::Unchanged(Mode::HighFrequency));
    assert_eq!(controller.handle("1").await, ControlEvent::Unchanged(Mode::HighFrequency));

    tokio::time::sleep(Duration::from_millis(3200)).await;
    tx.send(true).unwrap();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    writer.close().unwrap();

    let (standard_rows, high_rows) = count_rows(&path);
    assert_eq!(standard_rows, 5, "no standard rows while in high-frequency mode");
    assert!(
        (95..=104).contains(&high_rows),
        "expected about 102 high-frequency rows, got {high_rows}"
    );
}

#[tokio::test(start_paused = true)]
async fn returning_to_standard_resumes_one_hertz_rows() {
    let tmp = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.storage.log_dir = tmp.path().to_path_buf();

    let writer = Arc::new(LogRotationWriter::open(&settings.storage).unwrap());
    let path = writer.current_path().unwrap();
    let mode = ModeFlag::new(Mode::HighFrequency);
    let queues = SamplerQueues::from_config(&settings.acquisition);

    let sampler = Sampler::new(SimulatedSensor::new(Some(2)), mode.clone(), queues.clone(), &settings);
    let hf_logger = HighFrequencyLogger::new(
        queues.high_frequency.clone(),
        mode.clone(),
        Arc::clone(&writer),
        &settings,
    );
    let standard = StandardLogger::new(
        queues.standard.clone(),
        mode.clone(),
        Arc::clone(&writer),
        &settings,
    );

    let (tx, rx) = watch::channel(false);
    let tasks = vec![
        tokio::spawn(sampler.run(rx.clone())),
        tokio::spawn(hf_logger.run(rx.clone())),
        tokio::spawn(standard.run(rx)),
    ];

    tokio::time::sleep(Duration::from_millis(1020)).await;
    mode.replace(Mode::Standard);
    tokio::time::sleep(Duration::from_millis(3000)).await;
    tx.send(true).unwrap();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    writer.close().unwrap();

    let (standard_rows, high_rows) = count_rows(&path);
    assert_eq!(standard_rows, 3);
    assert!((30..=34).contains(&high_rows), "got {high_rows}");
    assert!(queues.high_frequency.is_empty());
}
