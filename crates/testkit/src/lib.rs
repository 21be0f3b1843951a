#![warn(missing_docs)]
//! In-memory test doubles for the reconciliation engine: a replication authority,
//! a host engine and JSON sinks for headless runs.

mod engine;
mod provider;
mod report;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub use engine::{standard_classes, MockEngine, Props, STAND_IN_CLASS};
pub use provider::LocalProvider;
pub use report::{SessionReport, TestResult};

/// One line of a headless event log.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Tick the event was applied on.
    pub tick: u64,
    /// Which side produced it (`"host"` or `"remote"`).
    pub source: &'a str,
    /// Short event label.
    pub kind: &'a str,
    /// Free-form detail.
    pub payload: String,
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    /// Create a new sink at `path`, creating parent directories if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self { file })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(())
    }
}
