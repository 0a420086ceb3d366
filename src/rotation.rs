//! Rotating CSV log writer.
//!
//! The writer is the single owner of the open log file. Both loggers hand it
//! typed [`LogRow`]s through [`LogRotationWriter::submit`], which serializes
//! "rotate if requested → write header if needed → append" under one lock.
//!
//! # Rotation
//!
//! A file is tagged with its *rotation key*: `now` formatted with the
//! configured chrono pattern (`%Y_%m_%d` rotates daily, `%Y_%m_%d__%H_%M` every
//! minute). A background poller compares the key of `now` with the open file's
//! key and, on mismatch, parks a rotation request. The next submitted row picks
//! it up, so a file is never swapped out from under a half-written row.
//!
//! ```text
//! poller (10 s) ──► pending key ──► submit(): close old, open <key>_<suffix>
//!                                             header if the file is new
//!                                             append row
//! ```
//!
//! # Stable links
//!
//! `current` always points at the active file and `previous` at the one before
//! it, so plotting tools can follow the last 24 h across a rotation without
//! knowing the key. Link failures are logged and otherwise ignored.

use crate::config::{check_rotation_format, StorageConfig};
use crate::error::{AppResult, DaqError};
use crate::record::LogRow;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// The one open log file.
struct LogFileHandle {
    key: String,
    path: PathBuf,
    writer: csv::Writer<File>,
    existed_before_open: bool,
    header_written: bool,
}

impl LogFileHandle {
    fn open(path: PathBuf, key: String) -> AppResult<Self> {
        let existed_before_open = path.is_file();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| DaqError::LogFile {
                path: path.clone(),
                source,
            })?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Self {
            key,
            path,
            writer,
            existed_before_open,
            header_written: false,
        })
    }

    fn write_record(&mut self, record: &[String]) -> AppResult<()> {
        self.writer
            .write_record(record)
            .map_err(|e| self.file_error(io::Error::other(e)))
    }

    fn flush(&mut self) -> AppResult<()> {
        self.writer.flush().map_err(|e| self.file_error(e))
    }

    fn file_error(&self, source: io::Error) -> DaqError {
        DaqError::LogFile {
            path: self.path.clone(),
            source,
        }
    }
}

#[derive(Default)]
struct WriterState {
    handle: Option<LogFileHandle>,
    closed: bool,
}

/// Exclusive owner of the rotating log file.
pub struct LogRotationWriter {
    config: StorageConfig,
    state: Mutex<WriterState>,
    pending: Mutex<Option<String>>,
    rotation_checks: AtomicU64,
    rotations: AtomicU64,
    rows_written: AtomicU64,
    link_failures: AtomicU64,
}

impl LogRotationWriter {
    /// Prepare the log directory and open the file for the current key.
    pub fn open(config: &StorageConfig) -> AppResult<Self> {
        Self::open_at(config, Local::now())
    }

    /// Like [`Self::open`], keyed on `now` instead of the wall clock.
    pub fn open_at(config: &StorageConfig, now: DateTime<Local>) -> AppResult<Self> {
        LogRow::check_schema(&config.fieldnames)?;
        check_rotation_format(&config.rotation_format)?;
        ensure_log_dir(&config.log_dir)?;

        let writer = Self {
            config: config.clone(),
            state: Mutex::new(WriterState::default()),
            pending: Mutex::new(None),
            rotation_checks: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            link_failures: AtomicU64::new(0),
        };
        let key = writer.rotation_key(now);
        let handle = writer.open_file(key)?;
        writer.state.lock().handle = Some(handle);
        Ok(writer)
    }

    /// Rotation key for `now`.
    pub fn rotation_key(&self, now: DateTime<Local>) -> String {
        now.format(&self.config.rotation_format).to_string()
    }

    /// Full path of the file for `key`.
    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.config
            .log_dir
            .join(format!("{key}_{}", self.config.file_suffix))
    }

    /// Path of the `current` link.
    pub fn current_link(&self) -> PathBuf {
        self.config.log_dir.join(&self.config.current_link)
    }

    /// Path of the `previous` link.
    pub fn previous_link(&self) -> PathBuf {
        self.config.log_dir.join(&self.config.previous_link)
    }

    /// Path of the open file, if any.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state.lock().handle.as_ref().map(|h| h.path.clone())
    }

    /// Key of the open file, if any.
    pub fn current_key(&self) -> Option<String> {
        self.state.lock().handle.as_ref().map(|h| h.key.clone())
    }

    /// Number of rotation checks performed.
    pub fn rotation_checks(&self) -> u64 {
        self.rotation_checks.load(Ordering::Relaxed)
    }

    /// Number of completed rotations (initial open excluded).
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Rows appended since startup.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Link updates that failed.
    pub fn link_failures(&self) -> u64 {
        self.link_failures.load(Ordering::Relaxed)
    }

    /// Compare the key of the wall clock with the open file.
    pub fn check_rotation(&self) -> bool {
        self.check_rotation_at(Local::now())
    }

    /// Park a rotation request if `now` maps to a different key than the open
    /// file (or the already pending request). Returns whether a new request
    /// was queued.
    pub fn check_rotation_at(&self, now: DateTime<Local>) -> bool {
        let count = self.rotation_checks.fetch_add(1, Ordering::Relaxed) + 1;
        let key = self.rotation_key(now);
        let open_key = self.current_key();
        let mut pending = self.pending.lock();

        let target = pending.as_deref().or(open_key.as_deref());
        if target == Some(key.as_str()) {
            debug!(checks = count, key = %key, "no logfile name change needed");
            return false;
        }
        info!(key = %key, "time period changed, rotation requested");
        *pending = Some(key);
        true
    }

    /// Append one row. Fatal errors must stop the process.
    pub fn submit(&self, row: &LogRow) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            warn!(timestamp = %row.timestamp, "row submitted after close, dropped");
            return Ok(());
        }

        if let Some(key) = self.pending.lock().take() {
            let same = state.handle.as_ref().is_some_and(|h| h.key == key);
            if !same {
                if let Some(mut old) = state.handle.take() {
                    info!(path = %old.path.display(), "closing logfile for rotation");
                    old.flush()?;
                }
                state.handle = Some(self.open_file(key)?);
                self.rotations.fetch_add(1, Ordering::Relaxed);
            }
        }

        if state.handle.is_none() {
            let key = self.rotation_key(Local::now());
            state.handle = Some(self.open_file(key)?);
        }
        let Some(handle) = state.handle.as_mut() else {
            return Ok(());
        };

        if !handle.header_written {
            if handle.existed_before_open {
                debug!(
                    path = %handle.path.display(),
                    "logfile existed before open, not repeating header"
                );
            } else {
                handle.write_record(&self.config.fieldnames)?;
            }
            handle.header_written = true;
        }

        let record = row.to_record();
        if record.len() != self.config.fieldnames.len() {
            return Err(DaqError::SchemaMismatch {
                expected: self.config.fieldnames.len(),
                actual: record.len(),
                fields: self.config.fieldnames.join(","),
            });
        }
        handle.write_record(&record)?;
        if self.config.flush_each_row {
            handle.flush()?;
        }
        self.rows_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush buffered rows.
    pub fn flush(&self) -> AppResult<()> {
        match self.state.lock().handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Ok(()),
        }
    }

    /// Flush and close the file; later submissions are dropped.
    pub fn close(&self) -> AppResult<()> {
        let mut state = self.state.lock();
        state.closed = true;
        if let Some(mut handle) = state.handle.take() {
            handle.flush()?;
            info!(
                path = %handle.path.display(),
                rows = self.rows_written(),
                rotations = self.rotations(),
                "logfile closed"
            );
        }
        Ok(())
    }

    /// Periodically check the rotation key until the exit signal is raised.
    pub async fn run_poller(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> AppResult<()> {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs_f64(), "rotation poller started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.check_rotation();
                }
            }
        }
        info!(checks = self.rotation_checks(), "rotation poller stopped");
        Ok(())
    }

    fn open_file(&self, key: String) -> AppResult<LogFileHandle> {
        let path = self.path_for_key(&key);
        let handle = LogFileHandle::open(path, key)?;
        info!(
            path = %handle.path.display(),
            resumed = handle.existed_before_open,
            "logging data to file"
        );
        if let Err(e) = self.update_links(&handle.path) {
            self.link_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "could not update logfile links, continuing");
        }
        Ok(handle)
    }

    fn update_links(&self, target: &Path) -> AppResult<()> {
        let current = self.current_link();
        let previous = self.previous_link();
        let link_target = target
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| target.to_path_buf());

        if fs::read_link(&current).ok().as_deref() == Some(link_target.as_path()) {
            debug!(link = %current.display(), "current link already up to date");
            return Ok(());
        }

        let link_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| DaqError::Link { path, source }
        };

        if fs::symlink_metadata(&previous).is_ok() {
            fs::remove_file(&previous).map_err(link_err(&previous))?;
        }
        if fs::symlink_metadata(&current).is_ok() {
            fs::rename(&current, &previous).map_err(link_err(&previous))?;
            debug!(from = %current.display(), to = %previous.display(), "current link became previous");
        }
        make_symlink(&link_target, &current).map_err(link_err(&current))?;
        debug!(link = %current.display(), target = %link_target.display(), "current link created");
        Ok(())
    }
}

impl Drop for LogRotationWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "failed to flush logfile on drop");
        }
    }
}

fn ensure_log_dir(dir: &Path) -> AppResult<()> {
    let dir_err = |source| DaqError::LogDirectory {
        path: dir.to_path_buf(),
        source,
    };
    if dir.is_dir() {
        return Ok(());
    }
    if dir.exists() {
        return Err(dir_err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a directory",
        )));
    }
    debug!(dir = %dir.display(), "log directory not found, creating it");
    fs::create_dir_all(dir).map_err(dir_err)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
