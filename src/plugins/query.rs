//! Read-only projections of the batch freezing log for operator review.

use crate::core::error::HaccpError;
use crate::plugins::freezing_log::{AppendOnlyLog, BatchFreezingRecord};

pub const DEFAULT_PAGE: usize = 25;

pub struct QueryView<'a> {
    log: &'a AppendOnlyLog,
}

impl<'a> QueryView<'a> {
    pub fn new(log: &'a AppendOnlyLog) -> Self {
        Self { log }
    }

    /// Newest first, at most `n` records. Insertion order is timestamp order,
    /// so the tail of the log is the most recent page.
    pub fn recent(&self, n: usize) -> Result<Vec<BatchFreezingRecord>, HaccpError> {
        let mut records = self.log.read_all()?;
        records.reverse();
        records.truncate(n);
        Ok(records)
    }

    /// Full export in the persisted CSV format.
    pub fn all(&self) -> Result<Vec<u8>, HaccpError> {
        self.log.export()
    }
}
