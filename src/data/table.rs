//! Data tables and the per-process table registry

use crate::config::ClientIdentity;
use crate::data::cursor::{row_indices, NextOptions, PartitionCursor};
use crate::data::parse::parse_csv;
use crate::data::{DataError, Row};
use crate::distributed::store::{Metric, MetricStore, StoreError};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace of the shared cursor counters in the metric store
pub const CURSOR_NAMESPACE: &str = "Cursor";

/// A loaded CSV table with this client's partition cursor
#[derive(Debug)]
pub struct DataTable {
    name: String,
    headers: Arc<[String]>,
    records: Vec<Vec<String>>,
    cursor: PartitionCursor,
    execution_id: i64,
    rng: Xoshiro256PlusPlus,
}

impl DataTable {
    /// Open a CSV file
    pub fn open(path: &Path, identity: &ClientIdentity) -> Result<Self, DataError> {
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            return Err(DataError::NotCsv {
                path: path.to_path_buf(),
            });
        }
        if !path.exists() {
            return Err(DataError::Missing {
                path: path.to_path_buf(),
            });
        }

        let contents = fs::read_to_string(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_csv(&path.display().to_string(), &contents, identity)
    }

    /// Build a table from CSV text
    ///
    /// Parse problems are tolerated (and logged) as long as some rows survive.
    pub fn from_csv(name: &str, contents: &str, identity: &ClientIdentity) -> Result<Self, DataError> {
        let parsed = parse_csv(contents);

        if let Some(issue) = parsed.issues.first() {
            if parsed.records.is_empty() {
                return Err(DataError::Parse {
                    name: name.to_string(),
                    line: issue.line,
                    reason: issue.reason.clone(),
                });
            }
            for issue in &parsed.issues {
                warn!(table = name, line = issue.line, reason = %issue.reason, "Errors occurred parsing table");
            }
        }

        if parsed.records.is_empty() {
            return Err(DataError::Empty {
                name: name.to_string(),
            });
        }

        let cursor = PartitionCursor::for_client(identity);
        debug!(table = name, rows = parsed.records.len(), cursor = cursor.position(), "opened table");

        Ok(Self {
            name: name.to_string(),
            headers: parsed.headers.into(),
            records: parsed.records,
            cursor,
            execution_id: identity.execution_id,
            rng: Xoshiro256PlusPlus::from_entropy(),
        })
    }

    /// Use a fixed seed for `random()`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of rows (never zero)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn cursor(&self) -> PartitionCursor {
        self.cursor
    }

    /// Row at a 1-based index
    pub fn get(&self, index: usize) -> Result<Row, DataError> {
        if index == 0 {
            return Err(DataError::InvalidIndex { index });
        }
        let values = self.records.get(index - 1).ok_or(DataError::OutOfRange {
            index,
            len: self.len(),
        })?;
        Ok(Row::new(index, self.headers.clone(), values.clone()))
    }

    /// A uniformly chosen row
    pub fn random(&mut self) -> Row {
        let len = self.len();
        let index = self.rng.gen_range(1..=len);
        self.row_unchecked(index)
    }

    /// Next rows from this client's private cursor
    pub fn next(&mut self, options: NextOptions) -> Result<Vec<Row>, DataError> {
        let len = self.len();
        let rows = options.count();
        let indices = self
            .cursor
            .take(rows, len, options.wrap)
            .map_err(|available| self.exhausted(rows, available))?;

        Ok(indices.into_iter().map(|i| self.row_unchecked(i)).collect())
    }

    /// Next rows from the execution-wide cursor kept in the metric store
    ///
    /// The store counter for this table is incremented by the number of rows
    /// requested; the rows taken are the ones just below the new value. Without
    /// a store this is the private cursor.
    pub async fn next_shared(
        &mut self,
        store: Option<&dyn MetricStore>,
        options: NextOptions,
    ) -> Result<Vec<Row>, DataError> {
        let Some(store) = store else {
            return self.next(options);
        };

        let rows = options.count();
        let metric = Metric {
            namespace: CURSOR_NAMESPACE.to_string(),
            name: format!("{}:{}", self.execution_id, self.name),
            key: None,
            value: rows as f64,
            units: None,
        };
        let end = store.increment(&metric).await?;
        // Anything but a whole number covering this increment would hand out
        // rows another client may also get
        if !end.is_finite() || end.fract() != 0.0 || end < rows as f64 {
            return Err(DataError::Store(StoreError::Decode(format!(
                "shared cursor for {} returned {} after adding {} rows",
                self.name, end, rows
            ))));
        }
        let start = end as u64 - rows as u64;
        debug!(table = %self.name, start, rows, "advanced shared cursor");

        let indices = row_indices(start, rows, self.len(), options.wrap)
            .map_err(|available| self.exhausted(rows, available))?;

        Ok(indices.into_iter().map(|i| self.row_unchecked(i)).collect())
    }

    fn row_unchecked(&self, index: usize) -> Row {
        Row::new(index, self.headers.clone(), self.records[index - 1].clone())
    }

    fn exhausted(&self, requested: usize, available: usize) -> DataError {
        DataError::Exhausted {
            name: self.name.clone(),
            requested,
            available,
        }
    }
}

/// Tables opened by this process, one per path
pub struct TableRegistry {
    identity: ClientIdentity,
    tables: HashMap<PathBuf, DataTable>,
}

impl TableRegistry {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity,
            tables: HashMap::new(),
        }
    }

    /// Open a table, reusing it (and its cursor) when already open
    pub fn open(&mut self, path: &Path) -> Result<&mut DataTable, DataError> {
        if !self.tables.contains_key(path) {
            let table = DataTable::open(path, &self.identity)?;
            self.tables.insert(path.to_path_buf(), table);
        }
        self.tables
            .get_mut(path)
            .ok_or_else(|| DataError::Missing {
                path: path.to_path_buf(),
            })
    }
}
