//! Integration tests for graceful shutdown behavior.

use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wx_daq::config::Settings;
use wx_daq::error::DaqError;
use wx_daq::sensor::SimulatedSensor;
use wx_daq::station::Station;

/// Settings that keep every socket and file inside the test's reach.
fn create_test_settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.log_dir = dir.to_path_buf();
    settings.network.control_port = 0;
    settings.network.viz_port = 9;
    settings.serial.enabled = false;
    settings
}

#[tokio::test]
async fn test_shutdown_signal_stops_every_worker() {
    let tmp = TempDir::new().unwrap();
    let station = Station::new(create_test_settings(tmp.path())).unwrap();
    let writer = station.writer();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(station.run(SimulatedSensor::new(Some(1)), rx));

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let path = writer.current_path().unwrap();
    tx.send(true).unwrap();

    // Should complete well within the slowest worker's poll interval
    let result = tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("shutdown took too long");
    result.unwrap().unwrap();

    assert!(writer.rows_written() >= 1);
    assert!(writer.current_path().is_none());

    // the closed file is complete CSV
    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len() as u64, writer.rows_written());
    assert!(rows.iter().all(|r| r.len() == 13));
}

#[tokio::test]
async fn test_dropped_signal_sender_also_stops() {
    let tmp = TempDir::new().unwrap();
    let station = Station::new(create_test_settings(tmp.path())).unwrap();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(station.run(SimulatedSensor::new(Some(2)), rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(tx);

    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("shutdown took too long")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_readings_feed_publishes_standard_rows() {
    let tmp = TempDir::new().unwrap();
    let station = Station::new(create_test_settings(tmp.path())).unwrap();
    let mut readings = station.readings();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(station.run(SimulatedSensor::new(Some(3)), rx));

    tokio::time::timeout(Duration::from_secs(3), readings.changed())
        .await
        .expect("no reading published")
        .unwrap();
    let reading = readings.borrow_and_update().clone().unwrap();
    assert!(reading.persisted);

    tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[test]
fn test_unusable_log_directory_exits_with_code_two() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();

    let err = Station::new(create_test_settings(&blocker.join("logs")))
        .err()
        .unwrap();
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_header_schema_mismatch_exits_with_code_four() {
    let tmp = TempDir::new().unwrap();
    let mut settings = create_test_settings(tmp.path());
    settings.storage.fieldnames.pop();
    let err = Station::new(settings).err().unwrap();
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_fatal_worker_error_stops_the_station() {
    let tmp = TempDir::new().unwrap();
    let log_dir = tmp.path().join("logs");
    let mut settings = create_test_settings(&log_dir);
    settings.storage.rotation_format = "%Y_%m_%d__%H_%M_%S".into();
    settings.storage.rotation_check_secs = 1;
    let station = Station::new(settings).unwrap();
    let writer = station.writer();
    fs::remove_dir_all(&log_dir).unwrap();

    // the shutdown sender stays alive and silent: only the failure can end the run
    let (_tx, rx) = watch::channel(false);
    let task = tokio::spawn(station.run(SimulatedSensor::new(Some(4)), rx));

    let err = tokio::time::timeout(Duration::from_secs(6), task)
        .await
        .expect("station kept running after a fatal error")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DaqError::LogFile { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(writer.current_path().is_none());
}
