//! Sequential offset pagination that follows a moving server total.

use tracing::{debug, info, warn};

use crate::dataset::{persist, Dataset, PageWrite, WriteMode};
use crate::error::{PullError, Result};
use crate::page::{Cursor, PageResult};
use crate::schema::{ColumnSchema, SchemaPolicy};

/// Fetches one page starting at `offset`.
pub trait PageFetcher {
    /// Returns up to `limit` records beginning at `offset`.
    fn fetch_page(&mut self, offset: u64, limit: u64) -> Result<PageResult>;
}

impl<F> PageFetcher for F
where
    F: FnMut(u64, u64) -> Result<PageResult>,
{
    fn fetch_page(&mut self, offset: u64, limit: u64) -> Result<PageResult> {
        self(offset, limit)
    }
}

/// Receives each fetched page.
pub trait PageSink {
    /// Persists `page` and echoes its counts back.
    fn write_page(
        &mut self,
        page: &PageResult,
        mode: WriteMode,
        cursor: Cursor,
    ) -> Result<PageWrite>;
}

/// Sink that projects pages onto a schema and writes them to a dataset.
#[derive(Debug, Clone)]
pub struct DatasetSink {
    dataset: Dataset,
    schema: Option<ColumnSchema>,
    policy: SchemaPolicy,
}

impl DatasetSink {
    /// Builds a sink writing to `dataset`.
    pub fn new(dataset: Dataset, schema: Option<ColumnSchema>, policy: SchemaPolicy) -> Self {
        Self {
            dataset,
            schema,
            policy,
        }
    }
}

impl PageSink for DatasetSink {
    fn write_page(
        &mut self,
        page: &PageResult,
        mode: WriteMode,
        cursor: Cursor,
    ) -> Result<PageWrite> {
        persist(page, &self.dataset, self.schema.as_ref(), self.policy, mode, cursor)
    }
}

/// Page size and the optional convergence guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationSettings {
    /// Records requested per page.
    pub page_size: u64,
    /// Give up with [`PullError::DidNotConverge`] after this many pages. `None` walks until done.
    pub max_pages: Option<u64>,
}

impl PaginationSettings {
    /// Unbounded walk with `page_size` records per page.
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
            max_pages: None,
        }
    }
}

/// Final cursor and page count of a completed walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationOutcome {
    /// Records consumed.
    pub records_processed: u64,
    /// Last server total.
    pub total_count: u64,
    /// Pages fetched, the first one included.
    pub pages: u64,
}

/// Walks every page, writing the first in `first_mode` and the rest in append mode.
///
/// The total is re-read from every page, so records added on the server while
/// the walk is running are picked up. The walk ends once the processed count
/// reaches the latest total.
pub fn paginate_all<F, S>(
    fetcher: &mut F,
    sink: &mut S,
    settings: &PaginationSettings,
    first_mode: WriteMode,
) -> Result<PaginationOutcome>
where
    F: PageFetcher + ?Sized,
    S: PageSink + ?Sized,
{
    let limit = settings.page_size.max(1);

    debug!("getting first page...");
    let first = fetch_checked(fetcher, 0, limit)?;
    let echoed = sink.write_page(&first, first_mode, Cursor::start())?;
    let mut cursor = Cursor {
        processed: echoed.result_count,
        total: echoed.total_count,
    };
    let mut pages = 1u64;

    while !cursor.is_done() {
        if let Some(max_pages) = settings.max_pages {
            if pages >= max_pages {
                return Err(PullError::DidNotConverge {
                    pages,
                    processed: cursor.processed,
                    total: cursor.total,
                });
            }
        }
        info!(processed = cursor.processed, total = cursor.total, "records processed");
        let page = fetch_checked(fetcher, cursor.processed, limit)?;
        let echoed = sink.write_page(&page, WriteMode::Append, cursor)?;
        cursor.advance(echoed.result_count, echoed.total_count);
        pages += 1;
    }

    info!(
        processed = cursor.processed,
        total = cursor.total,
        pages,
        "pagination complete"
    );
    Ok(PaginationOutcome {
        records_processed: cursor.processed,
        total_count: cursor.total,
        pages,
    })
}

fn fetch_checked<F>(fetcher: &mut F, offset: u64, limit: u64) -> Result<PageResult>
where
    F: PageFetcher + ?Sized,
{
    let page = fetcher.fetch_page(offset, limit)?;
    if page.result_count > limit {
        warn!(
            offset,
            limit,
            result_count = page.result_count,
            "page larger than requested limit"
        );
    }
    Ok(page)
}
