#![warn(missing_docs)]
//! Core library for pulling owned marketplace-lending records into local datasets.

pub mod auth;
pub mod batch;
pub mod config;
pub mod dataset;
pub mod error;
pub mod page;
pub mod paginate;
pub mod pipeline;
pub mod request;
pub mod resource;
pub mod schema;

pub use auth::{AuthToken, Credentials, OAuthClient, TokenProvider};
pub use batch::{drive_batched_pagination, ensure_unique, partition, time_windows};
pub use config::{Cli, Command};
pub use dataset::{persist, Dataset, PageWrite, WriteMode};
pub use error::{PullError, Result};
pub use page::{Cursor, PageResult, Record};
pub use paginate::{
    paginate_all, DatasetSink, PageFetcher, PageSink, PaginationOutcome, PaginationSettings,
};
pub use pipeline::{load_loan_numbers, PaymentPlan, PullContext, RunOptions, RunSummary};
pub use request::{AuthedClient, HttpTransport, RawResponse, RequestPolicy, Transport};
pub use resource::{ApiPageFetcher, ListingFilter, Resource, ResourceQuery};
pub use schema::{ColumnSchema, Frame, SchemaPolicy};
