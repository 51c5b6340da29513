//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use url::Url;

use crate::auth::{Credentials, DEFAULT_TOKEN_URL};
use crate::batch::{DEFAULT_BATCH_SIZE, DEFAULT_WINDOW_DAYS};
use crate::error::Result;
use crate::pipeline::RunOptions;
use crate::request::{RequestPolicy, DEFAULT_TIMEZONE};
use crate::resource::{ListingFilter, DEFAULT_API_BASE};
use crate::schema::SchemaPolicy;

/// Command-line interface for the puller.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lendsync",
    version,
    about = "Pull owned marketplace-lending records into compressed CSV datasets"
)]
pub struct Cli {
    /// Directory datasets are written under
    #[arg(long, env = "LENDSYNC_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// API root URL
    #[arg(long, env = "LENDSYNC_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// OAuth2 token endpoint
    #[arg(long, env = "LENDSYNC_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// Value of the `timezone` header sent with each request
    #[arg(long, env = "LENDSYNC_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// OAuth client id
    #[arg(long, env = "LENDSYNC_CLIENT_ID", hide_env_values = true)]
    pub client_id: String,

    /// OAuth client secret
    #[arg(long, env = "LENDSYNC_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// Account username
    #[arg(long, env = "LENDSYNC_USERNAME", hide_env_values = true)]
    pub username: String,

    /// Account password
    #[arg(long, env = "LENDSYNC_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Attempts per request before a transient failure becomes fatal
    #[arg(long, env = "LENDSYNC_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: usize,

    /// Milliseconds to sleep between attempts
    #[arg(long, env = "LENDSYNC_RETRY_BACKOFF_MS", default_value_t = 2000)]
    pub retry_backoff_ms: u64,

    /// Token refreshes allowed per request
    #[arg(long, env = "LENDSYNC_MAX_TOKEN_REFRESHES", default_value_t = 3)]
    pub max_token_refreshes: usize,

    /// Max seconds to wait for each HTTP request
    #[arg(long, env = "LENDSYNC_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Records per page (defaults to the resource's own page size)
    #[arg(long, env = "LENDSYNC_PAGE_SIZE")]
    pub page_size: Option<u64>,

    /// Abort a walk that has not converged after this many pages
    #[arg(long, env = "LENDSYNC_MAX_PAGES")]
    pub max_pages: Option<u64>,

    /// Handling of pages whose fields differ from the column schema
    #[arg(long, env = "LENDSYNC_SCHEMA_POLICY", value_enum, default_value_t = SchemaPolicy::Warn)]
    pub schema_policy: SchemaPolicy,

    /// Overwrite the previous dataset instead of moving it to `.bak`
    #[arg(long, default_value_t = false)]
    pub no_backup: bool,

    /// Append the log to this file instead of stderr
    #[arg(long, env = "LENDSYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Resource to pull
    #[command(subcommand)]
    pub command: Command,
}

/// Resources the CLI can pull.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Owned loans
    Loans,
    /// Owned notes
    Notes,
    /// Listings
    Listings {
        /// Which listings to pull
        #[arg(long, value_enum, default_value_t = ListingFilter::Owned)]
        filter: ListingFilter,
    },
    /// Payments on the loans in the loans dataset
    Payments {
        /// First window start (YYYY-MM-DD); defaults to the earliest owned loan
        #[arg(long, env = "LENDSYNC_PAYMENTS_SINCE")]
        since: Option<NaiveDate>,

        /// Loan numbers per query
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Days per date window
        #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS)]
        window_days: u32,
    },
}

impl Cli {
    /// Retry knobs for the request layer.
    pub fn request_policy(&self) -> RequestPolicy {
        RequestPolicy {
            max_retries: self.max_retries.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
            max_token_refreshes: self.max_token_refreshes.max(1),
        }
    }

    /// Options shared by every pull.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            data_dir: self.data_dir.clone(),
            page_size: self.page_size.filter(|size| *size > 0),
            max_pages: self.max_pages.filter(|pages| *pages > 0),
            schema_policy: self.schema_policy,
            backup: !self.no_backup,
        }
    }

    /// The four secrets used for token acquisition.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Parsed API root, with a trailing slash so endpoint paths join beneath it.
    pub fn api_base_url(&self) -> Result<Url> {
        let mut base = self.api_base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?)
    }
}
