use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;

use crate::{config::RotationPolicy, error::RotateError};

pub const LOG_BASE_NAME: &str = "LogAIS";

/// The process' own operational log.
///
/// Cloning is cheap; every clone writes to the same file. The active handle
/// sits behind a mutex and [`AppLog::rotate`] keeps it locked for the whole
/// rotation, so writers never see a handle that is being closed. Nothing in
/// here may emit tracing events while the lock is held, since the tracing
/// subscriber writes through this same lock.
#[derive(Clone)]
pub struct AppLog {
    shared: Arc<Shared>,
}

struct Shared {
    dir: PathBuf,
    max_generations: u32,
    active: Mutex<Option<File>>,
}

impl AppLog {
    /// Opens the log in `dir`, always starting a fresh file: existing logs are
    /// shifted one generation down first.
    pub fn open(dir: impl Into<PathBuf>, max_generations: u32) -> Result<Self, RotateError> {
        let log = Self {
            shared: Arc::new(Shared {
                dir: dir.into(),
                max_generations: max_generations.max(1),
                active: Mutex::new(None),
            }),
        };
        log.rotate()?;
        Ok(log)
    }

    /// Path of the active log for generation 0, of rotated copy `n` otherwise.
    pub fn generation_path(&self, generation: u32) -> PathBuf {
        generation_path(&self.shared.dir, generation)
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut active = self.shared.active.lock();
        match active.as_mut() {
            Some(file) => {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")
            }
            None => Err(io::Error::new(ErrorKind::NotConnected, "log file closed")),
        }
    }

    /// Current size of the active log in bytes.
    pub fn size(&self) -> io::Result<u64> {
        match self.shared.active.lock().as_ref() {
            Some(file) => Ok(file.metadata()?.len()),
            None => Ok(0),
        }
    }

    /// Rotates when the active log has grown past `max_bytes`. Returns whether
    /// a rotation happened.
    pub fn rotate_if_larger(&self, max_bytes: u64) -> Result<bool, RotateError> {
        let size = self.size().map_err(|source| RotateError::Open {
            path: self.generation_path(0),
            source,
        })?;
        if size <= max_bytes {
            return Ok(false);
        }
        self.rotate()?;
        Ok(true)
    }

    /// Drops the oldest generation, shifts the others down by one, moves the
    /// active log to generation 1 and opens an empty one in its place.
    pub fn rotate(&self) -> Result<(), RotateError> {
        let dir = &self.shared.dir;
        let oldest = self.shared.max_generations;
        let mut active = self.shared.active.lock();

        let path = generation_path(dir, oldest);
        if let Err(source) = std::fs::remove_file(&path) {
            if source.kind() == ErrorKind::PermissionDenied {
                return Err(RotateError::Delete { path, source });
            }
        }

        for generation in (2..=oldest).rev() {
            shift(dir, generation - 1, generation)?;
        }

        // closing before the rename keeps this working where open files can't be moved
        drop(active.take());
        shift(dir, 0, 1)?;

        let path = generation_path(dir, 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RotateError::Open { path, source })?;
        *active = Some(file);
        Ok(())
    }
}

fn generation_path(dir: &Path, generation: u32) -> PathBuf {
    if generation == 0 {
        dir.join(format!("{LOG_BASE_NAME}.log"))
    } else {
        dir.join(format!("{LOG_BASE_NAME}{generation}.log"))
    }
}

fn shift(dir: &Path, from: u32, to: u32) -> Result<(), RotateError> {
    let from = generation_path(dir, from);
    let to = generation_path(dir, to);
    match std::fs::rename(&from, &to) {
        Err(source) if source.kind() == ErrorKind::PermissionDenied => {
            Err(RotateError::Rename { from, to, source })
        }
        _ => Ok(()),
    }
}

/// Write handle handed to the tracing subscriber for one event.
pub struct AppLogWriter<'a> {
    active: MutexGuard<'a, Option<File>>,
}

impl Write for AppLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.active.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.active.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for AppLog {
    type Writer = AppLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        AppLogWriter {
            active: self.shared.active.lock(),
        }
    }
}

/// Periodically checks the log size and rotates when it is over the limit.
/// Only a failed rotation ends this task early.
pub async fn run_rotator(
    log: AppLog,
    policy: RotationPolicy,
    shutdown_token: CancellationToken,
) -> Result<(), RotateError> {
    let mut ticker = tokio::time::interval(policy.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately, the log was just rotated at startup
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                return Ok(());
            },
            _ = ticker.tick() => {}
        }

        let checked = log.clone();
        let max_bytes = policy.max_bytes;
        let rotated = tokio::task::spawn_blocking(move || checked.rotate_if_larger(max_bytes))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "log size check did not complete");
                Ok(false)
            })?;
        if rotated {
            info!("operational log rotated");
        }
    }
}
