//! Configuration module
//!
//! Handles the per-process execution info (who this client is), the TOML run
//! configuration, CLI argument parsing, and validation.
//!
//! A client learns its identity once at startup from a JSON info file written by
//! the orchestrator. When no info file is present the process is treated as a
//! local run: one client, iteration 0, no remote store.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Execution id used by local runs
pub const LOCAL_EXECUTION_ID: i64 = -1;

/// Identity of one client process within an execution
///
/// Immutable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    /// Index of this client across all regions (0-based)
    pub global_client_index: u64,
    /// Index of this client within its region (0-based)
    pub regional_client_index: u64,
    /// Iteration this client is executing (0-based)
    pub iteration: u64,
    /// Number of clients running concurrently across the execution
    pub concurrent_clients: u64,
    /// Execution identifier shared by every client of the run
    pub execution_id: i64,
}

impl ClientIdentity {
    /// Identity of a single local client
    pub fn local() -> Self {
        Self {
            global_client_index: 0,
            regional_client_index: 0,
            iteration: 0,
            concurrent_clients: 1,
            execution_id: LOCAL_EXECUTION_ID,
        }
    }
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self::local()
    }
}

/// Execution info as written by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInfo {
    #[serde(default)]
    pub iteration: u64,
    #[serde(default)]
    pub global_client_index: u64,
    #[serde(default)]
    pub regional_client_index: u64,
    pub execution: ExecutionRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkRef>,
    #[serde(default)]
    pub region: RegionRef,
    #[serde(default)]
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

/// Execution-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRef {
    pub id: i64,
    #[serde(default = "default_concurrent_clients")]
    pub concurrent_clients: u64,
}

/// The chunk of the execution this client belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRef {
    pub id: i64,
    #[serde(default = "default_concurrent_clients")]
    pub concurrent_clients: u64,
}

/// Region the client runs in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRef {
    pub name: String,
}

impl Default for RegionRef {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
        }
    }
}

fn default_concurrent_clients() -> u64 {
    1
}

impl ExecutionInfo {
    /// Info used when no orchestrator info file is available
    pub fn local() -> Self {
        let agent = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "local".to_string());

        Self {
            iteration: 0,
            global_client_index: 0,
            regional_client_index: 0,
            execution: ExecutionRef {
                id: LOCAL_EXECUTION_ID,
                concurrent_clients: 1,
            },
            chunk: Some(ChunkRef {
                id: LOCAL_EXECUTION_ID,
                concurrent_clients: 1,
            }),
            region: RegionRef::default(),
            agent,
            output_dir: std::env::current_dir().ok(),
        }
    }

    /// Load info from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read info file: {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse info file: {}", path.display()))
    }

    /// Resolve the info for this process
    ///
    /// Returns the info and whether this is a local run. An unreadable info file
    /// is logged and the run falls back to local.
    pub fn resolve(path: Option<&Path>) -> (Self, bool) {
        match path {
            Some(path) => match Self::from_file(path) {
                Ok(info) => (info, false),
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "Error loading info file, treating run as local");
                    (Self::local(), true)
                }
            },
            None => (Self::local(), true),
        }
    }

    /// Identity derived from this info
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            global_client_index: self.global_client_index,
            regional_client_index: self.regional_client_index,
            iteration: self.iteration,
            concurrent_clients: self.execution.concurrent_clients,
            execution_id: self.execution.id,
        }
    }
}

/// Run configuration (TOML file, overridable from the CLI)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Remote metric store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the metric store; no URL means no store
    pub url: Option<String>,
    /// Interval between condition polls (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Result sink settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Append-only NDJSON result file; console when unset
    pub result_file: Option<PathBuf>,
}

/// Dataset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Wrap to the first row once a table is exhausted
    #[serde(default = "default_wrap")]
    pub wrap: bool,
    /// Advance cursors through the remote store instead of in memory
    #[serde(default)]
    pub shared_cursor: bool,
}

fn default_wrap() -> bool {
    true
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            wrap: default_wrap(),
            shared_cursor: false,
        }
    }
}

/// Live event settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// NDJSON file the orchestrator appends events to
    pub file: Option<PathBuf>,
    /// Tail interval (milliseconds)
    #[serde(default = "default_tail_interval_ms")]
    pub tail_interval_ms: u64,
}

fn default_tail_interval_ms() -> u64 {
    100
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            file: None,
            tail_interval_ms: default_tail_interval_ms(),
        }
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub info: ExecutionInfo,
    /// True when no orchestrator info was available
    pub local: bool,
    pub run: RunConfig,
}

impl Config {
    pub fn identity(&self) -> ClientIdentity {
        self.info.identity()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.identity();
        writeln!(f, "Configuration:")?;
        writeln!(
            f,
            "  Client: {} (regional {}) of {}, iteration {}, execution {}{}",
            id.global_client_index,
            id.regional_client_index,
            id.concurrent_clients,
            id.iteration,
            id.execution_id,
            if self.local { " [local]" } else { "" }
        )?;
        writeln!(
            f,
            "  Store: {} (poll every {}ms)",
            self.run.store.url.as_deref().unwrap_or("none"),
            self.run.store.poll_interval_ms
        )?;
        match self.run.output.result_file {
            Some(ref path) => writeln!(f, "  Results: {}", path.display())?,
            None => writeln!(f, "  Results: console")?,
        }
        write!(
            f,
            "  Data: wrap={}, shared_cursor={}",
            self.run.data.wrap, self.run.data.shared_cursor
        )
    }
}
