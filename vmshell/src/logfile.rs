//! Per-file, timestamped output logs for guest sessions.
//!
//! A [`LogSink`] is owned by the caller (typically one per test run) and
//! shared with sessions through an `Arc`. File handles are opened lazily on
//! the first line for each filename and stay open until [`LogSink::close`],
//! [`LogSink::close_all`], or the sink is dropped.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::channel::OutputFn;

/// Timestamp prefix of every logged line.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One open log file, shared by every writer of that filename.
type SharedFile = Arc<Mutex<File>>;

/// Append-only text logs keyed by filename.
///
/// Each filename has its own handle lock, so a slow write to one file never
/// holds up writers of another. Two sessions writing the same filename
/// interleave whole lines.
#[derive(Debug)]
pub struct LogSink {
    dir: PathBuf,
    files: Mutex<HashMap<PathBuf, SharedFile>>,
}

impl LogSink {
    /// Create a sink resolving relative filenames against `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Base directory for relative filenames.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path a filename is written to.
    pub fn path_for(&self, filename: &Path) -> PathBuf {
        // Joining an absolute path replaces the base directory.
        self.dir.join(filename)
    }

    /// Append `"<timestamp>: <line>\n"` to `filename`.
    pub fn log_line(&self, filename: impl AsRef<Path>, line: &str) -> io::Result<()> {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let handle = self.handle(filename.as_ref())?;

        let mut file = handle.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{timestamp}: {line}")?;
        file.flush()
    }

    /// The open handle for `filename`, opening it if needed. The map lock is
    /// not held while the file is created.
    fn handle(&self, filename: &Path) -> io::Result<SharedFile> {
        if let Some(handle) = self.lock_files().get(filename) {
            return Ok(Arc::clone(handle));
        }

        let path = self.path_for(filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        // Another writer may have opened it meanwhile; keep the first handle.
        let mut files = self.lock_files();
        let handle = files
            .entry(filename.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(file)));
        Ok(Arc::clone(handle))
    }

    fn lock_files(&self) -> MutexGuard<'_, HashMap<PathBuf, SharedFile>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close the handle for `filename`. Returns whether it was open.
    pub fn close(&self, filename: impl AsRef<Path>) -> bool {
        self.lock_files().remove(filename.as_ref()).is_some()
    }

    /// Close every open handle.
    pub fn close_all(&self) {
        self.lock_files().clear();
    }

    /// Number of currently open files.
    pub fn open_files(&self) -> usize {
        self.lock_files().len()
    }

    /// Session output callback writing every line to `filename`.
    ///
    /// Write failures are logged and otherwise ignored so that a full disk
    /// never breaks a guest session.
    pub fn output_fn(self: &Arc<Self>, filename: impl Into<PathBuf>) -> OutputFn {
        let sink = Arc::clone(self);
        let filename = filename.into();
        Arc::new(move |line: &str| {
            if let Err(e) = sink.log_line(&filename, line) {
                warn!("failed to write to log file {}: {}", filename.display(), e);
            }
        })
    }
}

/// A sink together with the filename one session logs to.
#[derive(Debug, Clone)]
pub struct LogTarget {
    sink: Arc<LogSink>,
    filename: PathBuf,
}

impl LogTarget {
    pub fn new(sink: Arc<LogSink>, filename: impl Into<PathBuf>) -> Self {
        Self {
            sink,
            filename: filename.into(),
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// The output callback to bind to a session.
    pub fn output_fn(&self) -> OutputFn {
        self.sink.output_fn(self.filename.clone())
    }
}
