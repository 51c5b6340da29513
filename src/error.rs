//! Error kinds surfaced by the pull engine and their process exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T, E = PullError> = std::result::Result<T, E>;

/// Every failure the request, pagination and persistence layers can report.
#[derive(Debug, Error)]
pub enum PullError {
    /// The API rejected the configured credentials (HTTP 401).
    #[error("credentials rejected by API: {body}")]
    InvalidCredentials {
        /// Response body returned with the 401.
        body: String,
    },
    /// A request kept failing with transient statuses until the retry bound ran out.
    #[error("request to {url} failed after {attempts} attempt(s); last status {status}: {body}")]
    RetriesExhausted {
        /// Requested URL.
        url: String,
        /// Attempts made before giving up.
        attempts: usize,
        /// Last HTTP status observed.
        status: u16,
        /// Last response body observed.
        body: String,
    },
    /// The access token could not be refreshed, or kept being rejected after refreshes.
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),
    /// Network-level failure from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// A response body did not match the expected JSON shape.
    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),
    /// Projection or write of a page failed.
    #[error("on write at iteration {iteration} of {total}: {source}")]
    Persist {
        /// Records processed before the failing page.
        iteration: u64,
        /// Server-reported total at the time of the failure.
        total: u64,
        /// Underlying failure.
        #[source]
        source: Box<PullError>,
    },
    /// Page columns differ from the configured schema under the fail-fast policy.
    #[error("response columns do not match schema; missing {missing:?}, unexpected {unexpected:?}")]
    SchemaMismatch {
        /// Schema columns absent from every record of the page.
        missing: Vec<String>,
        /// Record fields not present in the schema.
        unexpected: Vec<String>,
    },
    /// Write mode other than create/append.
    #[error("mode must be set to \"w\"/\"create\" or \"a\"/\"append\", got {0:?}")]
    InvalidWriteMode(String),
    /// The server total never converged within the page guard.
    #[error("pagination did not converge after {pages} page(s): processed {processed} of {total}")]
    DidNotConverge {
        /// Pages fetched before giving up.
        pages: u64,
        /// Records processed so far.
        processed: u64,
        /// Last reported total.
        total: u64,
    },
    /// Batch input contains keys more than once.
    #[error("duplicate keys in batch input: {0:?}")]
    DuplicateKeys(Vec<String>),
    /// Payments need a start date and none could be derived.
    #[error("could not determine start date: {0}")]
    MissingStartDate(String),
    /// A dataset the run depends on is absent.
    #[error("dataset not found: {0}")]
    MissingDataset(PathBuf),
    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV encoding or decoding failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Timezone that cannot be sent as a header value.
    #[error("invalid timezone header value: {0:?}")]
    InvalidTimezone(String),
    /// Invalid endpoint URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl PullError {
    /// Wraps a persistence failure with the cursor it happened at.
    pub fn persist(iteration: u64, total: u64, source: PullError) -> Self {
        PullError::Persist {
            iteration,
            total,
            source: Box::new(source),
        }
    }

    /// Process exit status for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            PullError::InvalidCredentials { .. } => 2,
            PullError::InvalidWriteMode(_)
            | PullError::DuplicateKeys(_)
            | PullError::MissingDataset(_)
            | PullError::InvalidTimezone(_)
            | PullError::Url(_) => 3,
            PullError::Persist { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}
