//! Page payloads returned by the listing endpoints and the cursor that walks them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One API record: field name to scalar value, in server order.
pub type Record = Map<String, Value>;

/// A single page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Records in this page.
    #[serde(default)]
    pub result: Vec<Record>,
    /// Number of records in this page.
    pub result_count: u64,
    /// Server's current estimate of all matching records.
    pub total_count: u64,
}

impl PageResult {
    /// Builds a page whose `result_count` matches its records.
    pub fn new(result: Vec<Record>, total_count: u64) -> Self {
        Self {
            result_count: result.len() as u64,
            result,
            total_count,
        }
    }

    /// True when the page carries nothing to persist.
    pub fn is_empty(&self) -> bool {
        self.result_count == 0
    }
}

/// `(records_processed, total_count)` pair driving pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Records consumed so far.
    pub processed: u64,
    /// Latest server-reported total.
    pub total: u64,
}

impl Cursor {
    /// Cursor positioned before the first page.
    pub fn start() -> Self {
        Self::default()
    }

    /// Adds a page's count and adopts its total, which may have grown or shrunk.
    pub fn advance(&mut self, result_count: u64, total_count: u64) {
        self.processed += result_count;
        self.total = total_count;
    }

    /// True once every reported record has been consumed.
    pub fn is_done(&self) -> bool {
        self.processed >= self.total
    }
}
