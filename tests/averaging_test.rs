//! Averaging behaviour of the standard path, checked against the log file.

use chrono::Local;
use std::sync::Arc;
use tempfile::TempDir;
use wx_daq::calibration::{ProcessedSample, MEASUREMENT_COUNT};
use wx_daq::config::Settings;
use wx_daq::mode::{Mode, ModeFlag};
use wx_daq::queue::BoundedQueue;
use wx_daq::record::round_to;
use wx_daq::rotation::LogRotationWriter;
use wx_daq::standard_logger::StandardLogger;

struct Harness {
    logger: StandardLogger,
    queue: BoundedQueue<ProcessedSample>,
    writer: Arc<LogRotationWriter>,
    _tmp: TempDir,
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.storage.log_dir = tmp.path().to_path_buf();
    let writer = Arc::new(LogRotationWriter::open(&settings.storage).unwrap());
    let queue = BoundedQueue::new("standard", 500);
    let logger = StandardLogger::new(
        queue.clone(),
        ModeFlag::new(Mode::Standard),
        Arc::clone(&writer),
        &settings,
    );
    Harness {
        logger,
        queue,
        writer,
        _tmp: tmp,
    }
}

/// Sample `i` with distinct, non-terminating values in every field.
fn sample(i: usize) -> ProcessedSample {
    let m: [f64; MEASUREMENT_COUNT] =
        std::array::from_fn(|f| (i as f64 + 1.0) / 3.0 + f as f64 * 10.0 + 0.123456789);
    ProcessedSample::from_measurements(Local::now(), m, i as f64 + 100.0)
}

fn expected_mean(range: std::ops::Range<usize>) -> [f64; MEASUREMENT_COUNT] {
    let n = range.len() as f64;
    let mut sums = [0.0; MEASUREMENT_COUNT];
    for i in range {
        for (sum, v) in sums.iter_mut().zip(sample(i).measurements()) {
            *sum += v;
        }
    }
    sums.map(|s| s / n)
}

/// Last data row of the log file as parsed numbers (timestamp excluded).
fn last_logged(writer: &LogRotationWriter) -> (String, Vec<f64>) {
    let path = writer.current_path().unwrap();
    writer.flush().unwrap();
    let mut reader = csv::Reader::from_path(path).unwrap();
    let record = reader.records().last().unwrap().unwrap();
    let ts = record.get(0).unwrap().to_string();
    let values = record.iter().skip(1).map(|v| v.parse().unwrap()).collect();
    (ts, values)
}

#[test]
fn thirty_two_samples_are_averaged() {
    let mut h = harness();
    for i in 0..32 {
        h.queue.try_push(sample(i)).unwrap();
    }
    let reading = h.logger.persist_tick(Local::now()).unwrap().unwrap();
    assert!(reading.averaged);

    let (ts, values) = last_logged(&h.writer);
    assert_eq!(ts.len(), "2024-01-01 00:00:00".len());
    let mean = expected_mean(0..32);
    for (got, want) in values.iter().zip(mean) {
        assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        assert_eq!(*got, round_to(want, 8));
    }
    assert_eq!(values[MEASUREMENT_COUNT], 131.0);
}

#[test]
fn forty_samples_use_only_the_latest_thirty_two() {
    let mut h = harness();
    for i in 0..40 {
        h.queue.try_push(sample(i)).unwrap();
    }
    h.logger.persist_tick(Local::now()).unwrap();

    let (_, values) = last_logged(&h.writer);
    let mean = expected_mean(8..40);
    let with_stale = expected_mean(0..40);
    for (i, got) in values.iter().take(MEASUREMENT_COUNT).enumerate() {
        assert!((got - mean[i]).abs() < 1e-6);
        assert!((got - with_stale[i]).abs() > 1e-3);
    }
    assert_eq!(values[MEASUREMENT_COUNT], 139.0);
}

#[test]
fn fewer_than_thirty_two_samples_pass_the_latest_through() {
    let mut h = harness();
    for i in 0..7 {
        h.queue.try_push(sample(i)).unwrap();
    }
    let reading = h.logger.persist_tick(Local::now()).unwrap().unwrap();
    assert!(!reading.averaged);

    let (_, values) = last_logged(&h.writer);
    let latest = sample(6).measurements().map(|v| round_to(v, 8));
    assert_eq!(&values[..MEASUREMENT_COUNT], &latest);
    assert_eq!(values[MEASUREMENT_COUNT], 106.0);
}

#[test]
fn window_accumulates_across_ticks() {
    let mut h = harness();
    for i in 0..20 {
        h.queue.try_push(sample(i)).unwrap();
    }
    assert!(!h.logger.persist_tick(Local::now()).unwrap().unwrap().averaged);
    for i in 20..32 {
        h.queue.try_push(sample(i)).unwrap();
    }
    assert!(h.logger.persist_tick(Local::now()).unwrap().unwrap().averaged);
    assert_eq!(h.logger.window().len(), 32);
    assert_eq!(h.logger.rows_written(), 2);
}
