//! fleetsync - coordination for distributed load-test clients
//!
//! Many client processes run the same script against shared test data and a
//! shared remote metric store, with no direct link between them. This crate
//! gives each client what it needs to cooperate with its siblings.
//!
//! # Architecture
//!
//! - **Data partitioning**: collision-free row cursors over CSV datasets, derived
//!   from the client's index, iteration and the execution's concurrency
//! - **Barriers**: rendezvous and condition waits built on polling counters in
//!   the remote metric store
//! - **Suites**: nested suites and tests run one at a time, with hooks and
//!   per-test failure isolation, reported as an ordered record stream
//! - **Results**: timings, counters and logs appended to the same result sink

pub mod config;
pub mod data;
pub mod distributed;
pub mod output;
pub mod suite;
pub mod telemetry;
pub mod util;

// Re-export commonly used types
pub use config::{ClientIdentity, Config};
pub use data::{DataTable, NextOptions, Row, TableRegistry};
pub use distributed::{BarrierCoordinator, Condition, MetricStore};
pub use output::ResultWriter;
pub use suite::{Step, SuiteRunner};

/// Result type used throughout fleetsync
pub type Result<T> = anyhow::Result<T>;
