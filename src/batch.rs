//! Key batching and date windows for queries whose parameter lists must stay bounded.

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;

use chrono::{Days, NaiveDate};
use tracing::info;

use crate::dataset::WriteMode;
use crate::error::{PullError, Result};
use crate::paginate::PaginationOutcome;

/// Loans per payments query.
pub const DEFAULT_BATCH_SIZE: usize = 25;
/// Width of each payments date window.
pub const DEFAULT_WINDOW_DAYS: u32 = 90;

/// Fails with every repeated key if `keys` contains duplicates.
pub fn ensure_unique<K>(keys: &[K]) -> Result<()>
where
    K: Eq + Hash + Display,
{
    let mut seen = HashSet::with_capacity(keys.len());
    let mut duplicates = Vec::new();
    for key in keys {
        if !seen.insert(key) {
            duplicates.push(key.to_string());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(PullError::DuplicateKeys(duplicates))
    }
}

/// Contiguous batches of at most `batch_size` keys, in input order.
pub fn partition<K>(keys: &[K], batch_size: usize) -> Vec<&[K]> {
    keys.chunks(batch_size.max(1)).collect()
}

/// Window start dates `start`, `start + window_days`, ... up to and including `end`.
pub fn time_windows(start: NaiveDate, end: NaiveDate, window_days: u32) -> Vec<NaiveDate> {
    let step = Days::new(u64::from(window_days.max(1)));
    let mut windows = Vec::new();
    let mut current = Some(start);
    while let Some(day) = current.filter(|day| *day <= end) {
        windows.push(day);
        current = day.checked_add_days(step);
    }
    windows
}

/// Runs `per_pair` once for every `(batch, window)` pair, batches outermost.
///
/// Each walk starts in [`WriteMode::Create`] while `dataset_exists` reports no
/// file and in [`WriteMode::Append`] afterwards, so a pull that already wrote
/// some windows keeps adding to the same dataset. Returns the records written.
pub fn drive_batched_pagination<K, E, F>(
    keys: &[K],
    batch_size: usize,
    windows: &[NaiveDate],
    dataset_exists: E,
    mut per_pair: F,
) -> Result<u64>
where
    E: Fn() -> bool,
    F: FnMut(&[K], NaiveDate, WriteMode) -> Result<PaginationOutcome>,
{
    let batches = partition(keys, batch_size);
    let mut written = 0u64;
    for (idx, batch) in batches.iter().enumerate() {
        for window in windows {
            info!(
                batch = idx + 1,
                batches = batches.len(),
                window = %window,
                "retrieving payments for window"
            );
            let mode = if dataset_exists() {
                WriteMode::Append
            } else {
                WriteMode::Create
            };
            let outcome = per_pair(batch, *window, mode)?;
            written += outcome.records_processed;
        }
        let done = (idx + 1) * batch_size.max(1);
        info!(keys_done = done.min(keys.len()), keys = keys.len(), "batch complete");
    }
    Ok(written)
}
