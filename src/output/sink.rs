//! Result sinks
//!
//! Every externally visible record (suite lifecycle events, measurements and
//! script logs) is appended to one sink as a `{type, data}` object. The
//! reporting pipeline consumes the file line by line, so records are written
//! in occurrence order, one JSON document per line.

use crate::output::results::{HistogramEntry, LogEntry, Measurement};
use crate::suite::model::{Suite, TestCase};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One result record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Record {
    StartSuite(Suite),
    FinishSuite(Suite),
    StartSuiteTest(TestCase),
    FinishSuiteTest(TestCase),
    Timing(Measurement),
    Counter(Measurement),
    Histogram(HistogramEntry),
    Log(LogEntry),
}

impl Record {
    /// The record's `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Record::StartSuite(_) => "StartSuite",
            Record::FinishSuite(_) => "FinishSuite",
            Record::StartSuiteTest(_) => "StartSuiteTest",
            Record::FinishSuiteTest(_) => "FinishSuiteTest",
            Record::Timing(_) => "Timing",
            Record::Counter(_) => "Counter",
            Record::Histogram(_) => "Histogram",
            Record::Log(_) => "Log",
        }
    }
}

/// Append-only destination for result records
pub trait ResultSink: Send + Sync {
    fn emit(&self, record: &Record) -> Result<()>;
}

/// NDJSON result file
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open result file: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl ResultSink for FileSink {
    fn emit(&self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write result file: {}", self.path.display()))?;
        file.flush()?;
        Ok(())
    }
}

/// Pretty-printed records on stdout, for local runs
pub struct ConsoleSink;

impl ResultSink for ConsoleSink {
    fn emit(&self, record: &Record) -> Result<()> {
        println!("[Result] {}", serde_json::to_string_pretty(record)?);
        Ok(())
    }
}

/// Records kept in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, record: &Record) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// File sink when a result file is configured, console otherwise
pub fn sink_for(result_file: Option<&Path>) -> Result<Arc<dyn ResultSink>> {
    Ok(match result_file {
        Some(path) => Arc::new(FileSink::open(path)?),
        None => Arc::new(ConsoleSink),
    })
}
