//! Append-only trace of every line crossing the gateway.
//!
//! `< ` marks hub-to-client traffic, `> ` marks client-to-hub traffic.
//! Records are byte-accurate payload copies terminated by `\n` regardless of
//! the terminator used on the wire. The file is written unbuffered so a
//! crash preserves everything up to the last completed write.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// A trace log shared between the hub worker and the client reader tasks.
pub type SharedTraceLog = Arc<Mutex<TraceLog>>;

pub fn shared(log: TraceLog) -> SharedTraceLog {
    Arc::new(Mutex::new(log))
}

pub enum TraceLog {
    Noop,
    File(File),
}

impl TraceLog {
    /// Discard all records.
    pub fn noop() -> Self {
        info!("trace logging disabled");
        TraceLog::Noop
    }

    /// Append records to the file at `path`, creating it if needed.
    pub fn file(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "trace logging to file");
        Ok(TraceLog::File(file))
    }

    /// Record a hub-to-clients line.
    pub fn input(&mut self, line: &[u8]) {
        self.write(b"< ", line);
    }

    /// Record a clients-to-hub line.
    pub fn output(&mut self, line: &[u8]) {
        self.write(b"> ", line);
    }

    fn write(&mut self, direction: &[u8], line: &[u8]) {
        let TraceLog::File(file) = self else { return };
        let mut record = Vec::with_capacity(direction.len() + line.len() + 1);
        record.extend_from_slice(direction);
        record.extend_from_slice(line);
        record.push(b'\n');
        // One write_all per record; the OS file offset is the only buffer.
        if let Err(e) = file.write_all(&record) {
            warn!(error = %e, "trace write failed");
        }
    }
}
