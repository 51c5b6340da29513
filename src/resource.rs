//! API resources, their query parameters, and the page fetcher built on the request layer.

use chrono::NaiveDate;
use clap::ValueEnum;
use tracing::debug;
use url::Url;

use crate::auth::{AuthToken, TokenProvider};
use crate::error::Result;
use crate::page::PageResult;
use crate::paginate::PageFetcher;
use crate::request::{AuthedClient, Transport};
use crate::schema::ColumnSchema;

/// Default API root.
pub const DEFAULT_API_BASE: &str = "https://api.prosper.com/";

const LOAN_COLUMNS: &[&str] = &[
    "age_in_months",
    "amount_borrowed",
    "borrower_rate",
    "days_past_due",
    "group_leader_award",
    "collection_fees_paid",
    "debt_sale_proceeds_received",
    "interest_paid",
    "late_fees_paid",
    "loan_default_reason",
    "loan_default_reason_description",
    "loan_number",
    "loan_status",
    "loan_status_description",
    "next_payment_due_date",
    "next_payment_due_amount",
    "origination_date",
    "principal_balance",
    "principal_paid",
    "prosper_fees_paid",
    "prosper_rating",
    "service_fees_paid",
    "term",
];

// group_leader_award is deprecated on notes
const NOTE_COLUMNS: &[&str] = &[
    "age_in_months",
    "amount_borrowed",
    "borrower_rate",
    "collection_fees_paid_pro_rata_share",
    "days_past_due",
    "debt_sale_proceeds_received_pro_rata_share",
    "interest_paid_pro_rata_share",
    "is_sold",
    "late_fees_paid_pro_rata_share",
    "listing_number",
    "loan_note_id",
    "loan_number",
    "next_payment_due_amount_pro_rata_share",
    "next_payment_due_date",
    "note_default_reason",
    "note_default_reason_description",
    "note_ownership_amount",
    "note_sale_fees_paid",
    "note_sale_gross_amount_received",
    "note_status",
    "note_status_description",
    "origination_date",
    "principal_balance_pro_rata_share",
    "principal_paid_pro_rata_share",
    "prosper_fees_paid_pro_rata_share",
    "prosper_rating",
    "service_fees_paid_pro_rata_share",
    "term",
];

const PAYMENT_COLUMNS: &[&str] = &[
    "loan_number",
    "transaction_id",
    "funds_available_date",
    "investor_disbursement_date",
    "transaction_effective_date",
    "account_effective_date",
    "payment_transaction_code",
    "payment_status",
    "match_back_id",
    "prior_match_back_id",
    "loan_payment_cashflow_type",
    "payment_amount",
    "principal_amount",
    "interest_amount",
    "origination_interest_amount",
    "late_fee_amount",
    "service_fee_amount",
    "collection_fee_amount",
    "gl_reward_amount",
    "nsf_fee_amount",
    "pre_days_past_due",
    "post_days_past_due",
    "resulting_principal_balance",
];

/// Owned-record endpoints the puller knows about.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Whole loans owned by the investor.
    Loans,
    /// Note fractions owned by the investor.
    Notes,
    /// Listings, filtered by [`ListingFilter`].
    Listings,
    /// Payment transactions on owned loans.
    Payments,
}

impl Resource {
    /// Endpoint path relative to the API root.
    pub fn path(self) -> &'static str {
        match self {
            Resource::Loans => "v1/loans/",
            Resource::Notes => "v1/notes/",
            Resource::Listings => "listingsvc/v2/listings/",
            Resource::Payments => "v1/loans/payments/",
        }
    }

    /// Page size used when none is configured. Loans cap at 25 per page.
    pub fn default_page_size(self) -> u64 {
        match self {
            Resource::Loans => 25,
            Resource::Notes => 50,
            Resource::Listings | Resource::Payments => 100,
        }
    }

    /// Sort key sent with each page request, if any.
    pub fn sort_by(self) -> Option<&'static str> {
        match self {
            Resource::Loans | Resource::Notes => Some("origination_date"),
            Resource::Listings => Some("listing_start_date"),
            Resource::Payments => None,
        }
    }

    /// Dataset location relative to the data directory.
    pub fn dataset_file(self) -> &'static str {
        match self {
            Resource::Loans => "myloans/myloans.csv.gz",
            Resource::Notes => "mynotes/mynotes.csv.gz",
            Resource::Listings => "mylistings/mylistings.csv.gz",
            Resource::Payments => "myloans/myloan_payments.csv.gz",
        }
    }

    /// Built-in column schema; listings are written with their natural columns.
    pub fn schema(self) -> Option<ColumnSchema> {
        let columns = match self {
            Resource::Loans => LOAN_COLUMNS,
            Resource::Notes => NOTE_COLUMNS,
            Resource::Payments => PAYMENT_COLUMNS,
            Resource::Listings => return None,
        };
        Some(ColumnSchema::new(columns.iter().copied()))
    }
}

/// Which listings to pull.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ListingFilter {
    /// Listings the investor holds notes in.
    #[default]
    Owned,
    /// Every listing currently open for bids.
    Active,
    /// Open listings the investor has not bid on.
    UnbidActive,
    /// Open listings the investor has bid on.
    BidOnActive,
}

impl ListingFilter {
    /// `(biddable, invested)` flags; `invested` is omitted for [`ListingFilter::Active`].
    pub fn flags(self) -> (&'static str, Option<&'static str>) {
        match self {
            ListingFilter::Owned => ("false", Some("true")),
            ListingFilter::Active => ("true", None),
            ListingFilter::UnbidActive => ("true", Some("false")),
            ListingFilter::BidOnActive => ("true", Some("true")),
        }
    }
}

/// Endpoint plus resource-specific filters; `offset`/`limit` are added per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    resource: Resource,
    params: Vec<(&'static str, String)>,
}

impl ResourceQuery {
    /// Plain query for `resource` with its default sort order.
    pub fn new(resource: Resource) -> Self {
        let mut query = Self {
            resource,
            params: Vec::new(),
        };
        if resource == Resource::Listings {
            query = query.with_param("include_credit_bureau_values", "experian,transunion");
        }
        query
    }

    /// Listings query.
    pub fn listings(filter: ListingFilter) -> Self {
        let (biddable, invested) = filter.flags();
        let mut query = Self::new(Resource::Listings).with_param("biddable", biddable);
        if let Some(invested) = invested {
            query = query.with_param("invested", invested);
        }
        query
    }

    /// Payments for a batch of loans starting at `effective_date`.
    pub fn payments<K: AsRef<str>>(loan_numbers: &[K], effective_date: Option<NaiveDate>) -> Self {
        let mut query = Self::new(Resource::Payments);
        if let Some(date) = effective_date {
            let day = date.format("%Y-%m-%d").to_string();
            query = query.with_param("transaction_effective_date", day);
        }
        if !loan_numbers.is_empty() {
            let joined = loan_numbers
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(",");
            query = query.with_param("loan_number", joined);
        }
        query
    }

    /// Adds a query parameter.
    pub fn with_param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    /// Resource this query targets.
    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// Full URL for the page at `offset`.
    pub fn url(&self, base: &Url, offset: u64, limit: u64) -> Result<Url> {
        let mut url = base.join(self.resource.path())?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &limit.to_string());
            for (key, value) in &self.params {
                pairs.append_pair(key, value);
            }
            if let Some(sort_by) = self.resource.sort_by() {
                pairs.append_pair("sort_by", sort_by);
            }
        }
        Ok(url)
    }
}

/// Page fetcher that issues authenticated requests for one [`ResourceQuery`].
pub struct ApiPageFetcher<'a, T, P> {
    client: &'a AuthedClient<T, P>,
    token: &'a mut AuthToken,
    base: &'a Url,
    query: ResourceQuery,
}

impl<'a, T: Transport, P: TokenProvider> ApiPageFetcher<'a, T, P> {
    /// Fetcher for `query`, refreshing `token` in place when it expires.
    pub fn new(
        client: &'a AuthedClient<T, P>,
        token: &'a mut AuthToken,
        base: &'a Url,
        query: ResourceQuery,
    ) -> Self {
        Self {
            client,
            token,
            base,
            query,
        }
    }
}

impl<T: Transport, P: TokenProvider> PageFetcher for ApiPageFetcher<'_, T, P> {
    fn fetch_page(&mut self, offset: u64, limit: u64) -> Result<PageResult> {
        let url = self.query.url(self.base, offset, limit)?;
        debug!(url = %url, "requesting page");
        let resp = self.client.fetch(url.as_str(), self.token)?;
        Ok(serde_json::from_str(&resp.body)?)
    }
}
