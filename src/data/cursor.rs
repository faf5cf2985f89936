//! Partition cursors
//!
//! A cursor is a raw 0-based position into a table. The row it yields is
//! `position % len + 1` while wrapping; without wrapping a position past the
//! end of the table is exhausted.

use crate::config::ClientIdentity;

/// Options for reading the next rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextOptions {
    /// Number of rows to read; zero reads one row
    pub rows: usize,
    /// Start over at the first row once the table is exhausted
    pub wrap: bool,
}

impl NextOptions {
    pub fn rows(rows: usize) -> Self {
        Self {
            rows: rows.max(1),
            ..Self::default()
        }
    }

    /// Rows actually read
    pub fn count(&self) -> usize {
        self.rows.max(1)
    }

    pub fn no_wrap(mut self) -> Self {
        self.wrap = false;
        self
    }
}

impl Default for NextOptions {
    fn default() -> Self {
        Self { rows: 1, wrap: true }
    }
}

/// Per-table, per-process cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCursor {
    position: u64,
}

impl PartitionCursor {
    /// Cursor at a raw position
    pub fn at(position: u64) -> Self {
        Self { position }
    }

    /// Starting cursor for a client
    ///
    /// Clients of the same iteration get consecutive, distinct positions.
    pub fn for_client(identity: &ClientIdentity) -> Self {
        Self::at(
            identity
                .concurrent_clients
                .saturating_mul(identity.iteration)
                .saturating_add(identity.global_client_index),
        )
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Take `rows` 1-based row indices from a table of `len` rows
    ///
    /// All or nothing: an exhausted non-wrapping cursor is left untouched.
    pub fn take(&mut self, rows: usize, len: usize, wrap: bool) -> Result<Vec<usize>, usize> {
        let indices = row_indices(self.position, rows, len, wrap)?;
        self.position = if wrap {
            (self.position % len as u64 + rows as u64) % len as u64
        } else {
            self.position + rows as u64
        };
        Ok(indices)
    }
}

/// 1-based row indices for `rows` positions starting at `start`
///
/// On exhaustion returns the number of rows still available.
pub fn row_indices(start: u64, rows: usize, len: usize, wrap: bool) -> Result<Vec<usize>, usize> {
    let len_u = len as u64;
    if len == 0 {
        return Err(0);
    }

    if wrap {
        let first = start % len_u;
        return Ok((0..rows as u64)
            .map(|k| ((first + k) % len_u) as usize + 1)
            .collect());
    }

    let available = len_u.saturating_sub(start);
    if rows as u64 > available {
        return Err(available as usize);
    }
    Ok((0..rows as u64).map(|k| (start + k) as usize + 1).collect())
}
