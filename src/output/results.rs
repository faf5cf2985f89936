//! Measurements and script logs
//!
//! Scripts record timings, counters and histogram samples against an optional
//! resource/url scope. The records are write-only from the client's point of
//! view: they land in the result sink and are aggregated downstream.

use crate::output::sink::{Record, ResultSink};
use crate::util::time::now_millis;
use crate::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// A timing or counter sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub name: String,
    pub val: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

/// A keyed histogram sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub name: String,
    pub key: String,
    pub val: f64,
}

/// Script log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Error,
    Fatal,
}

/// A script log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Writes measurements for one resource/url scope
#[derive(Clone)]
pub struct ResultWriter {
    sink: Arc<dyn ResultSink>,
    resource: Option<String>,
    url: Option<String>,
}

impl ResultWriter {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            sink,
            resource: None,
            url: None,
        }
    }

    /// Writer for a resource (and optional url) sharing this writer's sink
    pub fn scoped(&self, resource: Option<String>, url: Option<String>) -> Self {
        Self {
            sink: self.sink.clone(),
            resource,
            url,
        }
    }

    pub fn timing(&self, name: &str, val: f64, units: Option<&str>) -> Result<()> {
        self.sink.emit(&Record::Timing(self.measurement(name, val, units)))
    }

    pub fn counter(&self, name: &str, val: f64, units: Option<&str>) -> Result<()> {
        self.sink.emit(&Record::Counter(self.measurement(name, val, units)))
    }

    pub fn histogram(&self, name: &str, key: &str, val: f64) -> Result<()> {
        self.sink.emit(&Record::Histogram(HistogramEntry {
            resource: self.resource.clone(),
            url: self.url.clone(),
            name: name.to_string(),
            key: key.to_string(),
            val,
        }))
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        self.sink.emit(&Record::Log(LogEntry {
            level,
            message: message.into(),
            timestamp: now_millis(),
        }))
    }

    /// Run `work` and record how long it took, in milliseconds
    pub async fn stopwatch<F, T>(&self, name: &str, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let output = work.await;
        self.timing(name, start.elapsed().as_millis() as f64, Some("ms"))?;
        Ok(output)
    }

    fn measurement(&self, name: &str, val: f64, units: Option<&str>) -> Measurement {
        Measurement {
            resource: self.resource.clone(),
            url: self.url.clone(),
            name: name.to_string(),
            val,
            units: units.map(str::to_string),
        }
    }
}
