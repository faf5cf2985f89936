//! CLI argument parsing using clap

use crate::output::LogLevel;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// fleetsync - coordination primitives for distributed load-test clients
#[derive(Parser, Debug)]
#[command(name = "fleetsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution info file written by the orchestrator (local run when absent)
    #[arg(long, global = true, env = "FLEETSYNC_INFO")]
    pub info: Option<PathBuf>,

    /// TOML run configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append-only result file (console when absent)
    #[arg(long, global = true, env = "FLEETSYNC_RESULT_FILE")]
    pub result_file: Option<PathBuf>,

    /// Base URL of the remote metric store
    #[arg(long, global = true, env = "FLEETSYNC_STORE_URL")]
    pub store_url: Option<String>,

    /// Interval between condition polls (e.g., 1s, 250ms)
    #[arg(long, global = true)]
    pub poll_interval: Option<String>,

    /// Live events file to tail
    #[arg(long, global = true, env = "FLEETSYNC_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resolved client identity as JSON
    Info,
    /// Read rows from a CSV dataset
    #[command(subcommand)]
    Csv(CsvCommand),
    /// Read metric values from the store
    #[command(subcommand)]
    Metric(MetricCommand),
    /// Wait until a metric reaches a value
    Wait(WaitArgs),
    /// Signal arrival at a barrier and wait for every client
    Barrier(BarrierArgs),
    /// Wait for live events
    #[command(subcommand)]
    Event(EventCommand),
    /// Write result records
    #[command(subcommand)]
    Result(ResultCommand),
}

#[derive(Subcommand, Debug)]
pub enum CsvCommand {
    /// Row at a 1-based index
    Get {
        table: PathBuf,
        index: usize,
    },
    /// A uniformly chosen row
    Random {
        table: PathBuf,
    },
    /// Next rows from this client's partition cursor
    Next {
        table: PathBuf,
        /// Number of rows to read
        #[arg(long, default_value = "1")]
        rows: usize,
        /// Fail instead of wrapping to the first row
        #[arg(long)]
        no_wrap: bool,
        /// Advance the cursor through the remote store
        #[arg(long)]
        shared: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum MetricCommand {
    /// Current value of a metric (NaN without a store)
    Get {
        name: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value = "User")]
        namespace: String,
    },
}

#[derive(Args, Debug)]
pub struct WaitArgs {
    pub name: String,
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long, default_value = "User")]
    pub namespace: String,
    /// Target value (defaults to the execution's concurrent clients)
    #[arg(long)]
    pub value: Option<f64>,
    /// Give up after this long (e.g., 30s, 2m); waits forever when absent
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct BarrierArgs {
    pub name: String,
    /// Participants expected (defaults to the execution's concurrent clients)
    #[arg(long)]
    pub value: Option<f64>,
    /// Give up after this long (e.g., 30s, 2m); waits forever when absent
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum EventCommand {
    /// Wait for a named event and print its contents
    Wait {
        name: String,
        #[arg(long)]
        timeout: Option<String>,
        /// Contents to print in a local run
        #[arg(long)]
        default: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ResultCommand {
    /// Record a timing
    Timing(MeasurementArgs),
    /// Record a counter
    Counter(MeasurementArgs),
    /// Write a log line to the result sink
    Log {
        #[arg(value_enum)]
        level: LogLevel,
        message: String,
    },
}

#[derive(Args, Debug)]
pub struct MeasurementArgs {
    pub name: String,
    pub val: f64,
    #[arg(long)]
    pub units: Option<String>,
    #[arg(long)]
    pub resource: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Command::Csv(CsvCommand::Next { rows, .. }) = &self.command {
            if *rows == 0 {
                anyhow::bail!("rows must be at least 1");
            }
        }

        if let Command::Csv(CsvCommand::Get { index, .. }) = &self.command {
            if *index == 0 {
                anyhow::bail!("index is 1-based, got 0");
            }
        }

        if let Some(ref url) = self.store_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("store_url must be an http(s) URL, got {}", url);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_barrier() {
        let cli = Cli::try_parse_from(["fleetsync", "barrier", "ready", "--timeout", "30s"]).unwrap();
        match cli.command {
            Command::Barrier(args) => {
                assert_eq!(args.name, "ready");
                assert_eq!(args.timeout.as_deref(), Some("30s"));
                assert!(args.value.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_csv_next() {
        let cli = Cli::try_parse_from(["fleetsync", "csv", "next", "users.csv", "--rows", "3", "--no-wrap"]).unwrap();
        assert!(cli.validate().is_ok());
        match cli.command {
            Command::Csv(CsvCommand::Next { rows, no_wrap, shared, .. }) => {
                assert_eq!(rows, 3);
                assert!(no_wrap);
                assert!(!shared);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_index() {
        let cli = Cli::try_parse_from(["fleetsync", "csv", "get", "users.csv", "0"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rows() {
        let cli = Cli::try_parse_from(["fleetsync", "csv", "next", "users.csv", "--rows", "0"]).unwrap();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_store_url() {
        let cli = Cli::try_parse_from(["fleetsync", "--store-url", "ftp://x", "info"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
