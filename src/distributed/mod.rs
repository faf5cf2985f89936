//! Cross-process coordination
//!
//! Client processes share no direct link. Everything they coordinate on goes
//! through a remote metric store (atomic increments and reads) or through the
//! live events file the orchestrator appends to.
//!
//! # Modules
//!
//! - `store`: Metric store trait, wire types and the HTTP client
//! - `memory`: In-process store for local runs and tests
//! - `barrier`: Condition polling and barriers on top of the store
//! - `events`: Live events tailed from the orchestrator's events file

pub mod barrier;
pub mod events;
pub mod memory;
pub mod store;

// Re-export key types
pub use barrier::{BarrierCoordinator, BarrierError, Condition};
pub use events::{EventError, EventWatcher, LiveEvent};
pub use memory::InMemoryMetricStore;
pub use store::{HttpMetricStore, Metric, MetricQuery, MetricStore, MetricValue, StoreError};
