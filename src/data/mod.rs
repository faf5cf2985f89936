//! Shared test data
//!
//! Every client of an execution reads the same CSV tables. Rows are handed out
//! through a per-client partition cursor whose starting offset is derived from
//! the client identity alone:
//!
//! ```text
//! initial cursor = concurrent_clients * iteration + global_client_index
//! ```
//!
//! Clients running the same iteration therefore start on distinct rows without
//! sharing any state. Optionally the cursor of a table can instead be advanced
//! through an atomic counter in the metric store, which keeps the sequence
//! continuous across process restarts.

pub mod cursor;
pub mod parse;
pub mod table;

use crate::distributed::StoreError;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use cursor::{NextOptions, PartitionCursor};
pub use table::{DataTable, TableRegistry};

/// Errors reading test data
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Could not find {}. Please upload.", path.display())]
    Missing { path: PathBuf },

    #[error("Expected a .csv file, got {}", path.display())]
    NotCsv { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("table {name} has no rows")]
    Empty { name: String },

    #[error("Errors occurred parsing {name}: line {line}: {reason}")]
    Parse {
        name: String,
        line: usize,
        reason: String,
    },

    #[error("row index {index} is invalid, indices start at 1")]
    InvalidIndex { index: usize },

    #[error("{index} is out of range (table has {len} rows)")]
    OutOfRange { index: usize, len: usize },

    #[error("table {name} exhausted: requested {requested} rows, {available} left")]
    Exhausted {
        name: String,
        requested: usize,
        available: usize,
    },

    #[error("shared cursor unavailable: {0}")]
    Store(#[from] StoreError),
}

/// One row of a table
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based position in the table
    pub index: usize,
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    pub(crate) fn new(index: usize, headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self {
            index,
            headers,
            values,
        }
    }

    /// Field values in column order
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value of a named field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// `(name, value)` pairs in column order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

struct FieldMap<'a>(&'a Row);

impl Serialize for FieldMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.values.len()))?;
        for (name, value) in self.0.fields() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_struct("Row", 3)?;
        row.serialize_field("index", &self.index)?;
        row.serialize_field("fields", &FieldMap(self))?;
        row.serialize_field("values", &self.values)?;
        row.end()
    }
}
