//! Run orchestration: one pull per resource, plus the batched payments pull.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::auth::{AuthToken, TokenProvider};
use crate::batch::{drive_batched_pagination, ensure_unique, time_windows};
use crate::dataset::{Dataset, WriteMode};
use crate::error::{PullError, Result};
use crate::paginate::{paginate_all, DatasetSink, PageFetcher, PaginationSettings};
use crate::request::{AuthedClient, Transport};
use crate::resource::{ApiPageFetcher, Resource, ResourceQuery};
use crate::schema::SchemaPolicy;

/// Options shared by every pull in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Root directory for datasets.
    pub data_dir: PathBuf,
    /// Page size override; `None` uses each resource's default.
    pub page_size: Option<u64>,
    /// Convergence guard handed to the paginator.
    pub max_pages: Option<u64>,
    /// Schema mismatch handling.
    pub schema_policy: SchemaPolicy,
    /// Move the previous dataset to `.bak` before pulling.
    pub backup: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            page_size: None,
            max_pages: None,
            schema_policy: SchemaPolicy::Warn,
            backup: true,
        }
    }
}

/// Batching and date range for a payments pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentPlan {
    /// Loans per query.
    pub batch_size: usize,
    /// Days per date window.
    pub window_days: u32,
    /// First window start; `None` looks up the earliest owned loan.
    pub since: Option<NaiveDate>,
    /// Last date a window may start on.
    pub until: NaiveDate,
}

/// What a pull wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Resource pulled.
    pub resource: Resource,
    /// Dataset written to.
    pub path: PathBuf,
    /// Records consumed across every walk.
    pub records_written: u64,
    /// Pages fetched.
    pub pages: u64,
}

/// Everything a run needs: request layer, current token, API root and options.
pub struct PullContext<T, P> {
    client: AuthedClient<T, P>,
    token: AuthToken,
    api_base: Url,
    options: RunOptions,
}

impl<T: Transport, P: TokenProvider> PullContext<T, P> {
    /// Builds a context around an already-acquired token.
    pub fn new(
        client: AuthedClient<T, P>,
        token: AuthToken,
        api_base: Url,
        options: RunOptions,
    ) -> Self {
        Self {
            client,
            token,
            api_base,
            options,
        }
    }

    /// Request layer the context pulls through.
    pub fn client(&self) -> &AuthedClient<T, P> {
        &self.client
    }

    /// Token currently in use, including any refreshes made so far.
    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    /// Dataset a resource is written to.
    pub fn dataset(&self, resource: Resource) -> Dataset {
        Dataset::new(self.options.data_dir.join(resource.dataset_file()))
    }

    fn settings(&self, resource: Resource) -> PaginationSettings {
        PaginationSettings {
            max_pages: self.options.max_pages,
            ..PaginationSettings::new(
                self.options
                    .page_size
                    .unwrap_or(resource.default_page_size()),
            )
        }
    }

    /// Backs up the resource's dataset and writes every page of `query` into a fresh one.
    pub fn pull(&mut self, query: ResourceQuery) -> Result<RunSummary> {
        let resource = query.resource();
        let dataset = self.dataset(resource);
        if self.options.backup {
            dataset.backup()?;
        }
        info!(?resource, path = %dataset.path().display(), "initiating data pull...");
        let settings = self.settings(resource);
        let mut sink = DatasetSink::new(
            dataset.clone(),
            resource.schema(),
            self.options.schema_policy,
        );
        let mut fetcher = ApiPageFetcher::new(&self.client, &mut self.token, &self.api_base, query);
        let outcome = paginate_all(&mut fetcher, &mut sink, &settings, WriteMode::Create)?;
        Ok(RunSummary {
            resource,
            path: dataset.path().to_path_buf(),
            records_written: outcome.records_processed,
            pages: outcome.pages,
        })
    }

    /// Pulls payments for `loan_numbers`, one walk per (batch, window) pair.
    ///
    /// Duplicate loan numbers are rejected before any request is made.
    pub fn pull_payments(
        &mut self,
        loan_numbers: &[String],
        plan: &PaymentPlan,
    ) -> Result<RunSummary> {
        ensure_unique(loan_numbers)?;
        let dataset = self.dataset(Resource::Payments);
        if self.options.backup {
            dataset.backup()?;
        }
        let start = match plan.since {
            Some(date) => date,
            None => self.first_origination_date()?,
        };
        let windows = time_windows(start, plan.until, plan.window_days);
        info!(
            loans = loan_numbers.len(),
            windows = windows.len(),
            start = %start,
            "initiating payment data pull..."
        );

        let settings = self.settings(Resource::Payments);
        let schema = Resource::Payments.schema();
        let policy = self.options.schema_policy;
        let Self {
            client,
            token,
            api_base,
            ..
        } = self;
        let mut pages = 0u64;
        let written = drive_batched_pagination(
            loan_numbers,
            plan.batch_size,
            &windows,
            || dataset.exists(),
            |batch, window, mode| {
                let query = ResourceQuery::payments(batch, Some(window));
                let mut fetcher = ApiPageFetcher::new(&*client, &mut *token, &*api_base, query);
                let mut sink = DatasetSink::new(dataset.clone(), schema.clone(), policy);
                let outcome = paginate_all(&mut fetcher, &mut sink, &settings, mode)?;
                pages += outcome.pages;
                Ok(outcome)
            },
        )?;
        Ok(RunSummary {
            resource: Resource::Payments,
            path: dataset.path().to_path_buf(),
            records_written: written,
            pages,
        })
    }

    /// Origination date of the earliest owned loan, via a one-record loans query.
    pub fn first_origination_date(&mut self) -> Result<NaiveDate> {
        let query = ResourceQuery::new(Resource::Loans);
        let mut fetcher = ApiPageFetcher::new(&self.client, &mut self.token, &self.api_base, query);
        let page = fetcher.fetch_page(0, 1)?;
        let raw = page
            .result
            .first()
            .and_then(|loan| loan.get("origination_date"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PullError::MissingStartDate("no owned loan with an origination_date".into())
            })?;
        parse_api_date(raw)
    }
}

/// Parses the date part of an API timestamp such as `2017-06-20` or `2017-06-20T00:00:00-07:00`.
pub fn parse_api_date(raw: &str) -> Result<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|err| PullError::MissingStartDate(format!("unparseable date {raw:?}: {err}")))
}

/// Loan numbers from the loans dataset, oldest origination first. Fails on duplicates.
pub fn load_loan_numbers(loans: &Dataset) -> Result<Vec<String>> {
    info!(path = %loans.path().display(), "retrieving loan numbers");
    let mut rows = loans.read_columns(&["loan_number", "origination_date"])?;
    rows.sort_by(|a, b| a[1].cmp(&b[1]));
    let numbers: Vec<String> = rows
        .into_iter()
        .filter_map(|mut row| {
            let number = row.swap_remove(0);
            (!number.is_empty()).then_some(number)
        })
        .collect();
    ensure_unique(&numbers)?;
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Frame;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn api_dates_accept_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2017, 6, 20).expect("date");
        assert_eq!(parse_api_date("2017-06-20").expect("plain"), expected);
        assert_eq!(parse_api_date("2017-06-20T07:00:00-07:00").expect("ts"), expected);
        assert!(matches!(parse_api_date("June"), Err(PullError::MissingStartDate(_))));
    }

    fn write_loans(dataset: &Dataset, loans: serde_json::Value) {
        let records: Vec<_> = loans
            .as_array()
            .expect("array")
            .iter()
            .map(|v| v.as_object().cloned().expect("object"))
            .collect();
        dataset
            .write_frame(&Frame::natural(&records), WriteMode::Create)
            .expect("write loans");
    }

    #[test]
    fn loan_numbers_come_back_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loans = Dataset::new(dir.path().join("myloans.csv.gz"));
        write_loans(
            &loans,
            json!([
                {"loan_number": 30, "origination_date": "2019-02-01"},
                {"loan_number": 10, "origination_date": "2017-01-15"},
                {"loan_number": 20, "origination_date": "2018-07-04"},
            ]),
        );
        assert_eq!(load_loan_numbers(&loans).expect("numbers"), vec!["10", "20", "30"]);
    }

    #[test]
    fn duplicate_loan_numbers_halt_before_pulling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loans = Dataset::new(dir.path().join("myloans.csv.gz"));
        write_loans(
            &loans,
            json!([
                {"loan_number": 10, "origination_date": "2017-01-15"},
                {"loan_number": 10, "origination_date": "2018-07-04"},
            ]),
        );
        assert!(matches!(load_loan_numbers(&loans), Err(PullError::DuplicateKeys(_))));
    }

    #[test]
    fn missing_loans_dataset_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loans = Dataset::new(dir.path().join("absent.csv.gz"));
        assert!(matches!(load_loan_numbers(&loans), Err(PullError::MissingDataset(_))));
    }
}
