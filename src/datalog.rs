// datalog.rs

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use log::*;

/// Append-only reading log on durable storage (SD card on the device).
///
/// No handle is held between calls; every append opens, writes and
/// closes. All access goes through one internal lock, so appends from
/// the telemetry loop and clears from the HTTP surface never
/// interleave. Storage faults are logged and swallowed so a full or
/// unmounted card never stalls the telemetry loop.
pub struct DataLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DataLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn hold(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) {
        if let Err(e) = self.try_append(line) {
            error!("Log append to {p} failed: {e:?}", p = self.path.display());
        }
    }

    fn try_append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.hold();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    /// All-or-nothing: drops the whole backing file. The next append
    /// recreates it. A log that never existed counts as cleared.
    pub fn clear(&self) {
        let _guard = self.hold();
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Log {p} cleared", p = self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!("Log clear of {p} failed: {e:?}", p = self.path.display()),
        }
    }

    /// Raw bytes of the backing file, empty when absent or unreadable.
    pub fn read_all(&self) -> Vec<u8> {
        let _guard = self.hold();
        match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                error!("Log read of {p} failed: {e:?}", p = self.path.display());
                Vec::new()
            }
        }
    }
}


// EOF
