mod helpers;

use std::fs;
use std::time::Duration;

use helpers::{notes_page, offset, token, FakeApi, FakeTokens, EXPIRED_BODY};
use lendsync::{
    AuthedClient, PullContext, PullError, RawResponse, RequestPolicy, Resource, ResourceQuery,
    RunOptions, SchemaPolicy,
};
use pretty_assertions::assert_eq;
use url::Url;

fn policy() -> RequestPolicy {
    RequestPolicy {
        max_retries: 3,
        backoff: Duration::ZERO,
        max_token_refreshes: 1,
    }
}

fn context(api: FakeApi, data_dir: &std::path::Path) -> PullContext<FakeApi, FakeTokens> {
    let client = AuthedClient::new(api, FakeTokens::default(), policy());
    let options = RunOptions {
        data_dir: data_dir.to_path_buf(),
        ..RunOptions::default()
    };
    PullContext::new(
        client,
        token("initial"),
        Url::parse("https://api.test/").expect("base"),
        options,
    )
}

#[test]
fn notes_pull_follows_growing_total_and_backs_up_previous_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|url, _, _| match offset(url) {
        0 => notes_page(0, 50, 120),
        50 => notes_page(50, 50, 125),
        100 => notes_page(100, 25, 125),
        other => panic!("unexpected offset {other}"),
    });
    let mut ctx = context(api, dir.path());
    let previous = ctx.dataset(Resource::Notes);
    fs::create_dir_all(previous.path().parent().expect("parent")).expect("mkdir");
    fs::write(previous.path(), b"stale").expect("seed old file");

    let summary = ctx.pull(ResourceQuery::new(Resource::Notes)).expect("pull");

    assert_eq!(summary.records_written, 125);
    assert_eq!(summary.pages, 3);
    assert_eq!(fs::read(previous.backup_path()).expect("bak"), b"stale");

    let (header, rows) = previous.read_all().expect("read dataset");
    let schema = Resource::Notes.schema().expect("schema");
    assert_eq!(header, schema.columns().to_vec());
    assert_eq!(rows.len(), 125);
    let loan_idx = header.iter().position(|c| c == "loan_number").expect("col");
    assert_eq!(rows[124][loan_idx], "124");
}

#[test]
fn expired_token_mid_walk_is_refreshed_transparently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|url, bearer, _| match (offset(url), bearer) {
        (0, _) => notes_page(0, 50, 100),
        (50, "initial") => RawResponse::new(403, EXPIRED_BODY),
        (50, _) => notes_page(50, 50, 100),
        (other, _) => panic!("unexpected offset {other}"),
    });
    let mut ctx = context(api, dir.path());

    let summary = ctx.pull(ResourceQuery::new(Resource::Notes)).expect("pull");

    assert_eq!(summary.records_written, 100);
    assert_eq!(ctx.token().access_token, "fresh-1");
    let (_, rows) = ctx.dataset(Resource::Notes).read_all().expect("read");
    assert_eq!(rows.len(), 100);
}

#[test]
fn empty_result_produces_no_dataset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|_, _, _| notes_page(0, 0, 0));
    let mut ctx = context(api, dir.path());

    let summary = ctx.pull(ResourceQuery::new(Resource::Loans)).expect("pull");

    assert_eq!(summary.records_written, 0);
    assert!(!ctx.dataset(Resource::Loans).exists());
}

#[test]
fn bad_credentials_stop_the_run_with_their_own_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|url, _, _| match offset(url) {
        0 => notes_page(0, 50, 100),
        _ => RawResponse::new(401, "bad credentials"),
    });
    let mut ctx = context(api, dir.path());

    let err = ctx.pull(ResourceQuery::new(Resource::Notes)).expect_err("fatal");

    assert!(matches!(err, PullError::InvalidCredentials { .. }));
    assert_eq!(err.exit_code(), 2);
    let (_, rows) = ctx.dataset(Resource::Notes).read_all().expect("first page kept");
    assert_eq!(rows.len(), 50);
}

#[test]
fn flaky_server_is_retried_then_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|_, _, n| match n {
        0 | 1 => RawResponse::new(503, "try later"),
        _ => notes_page(0, 10, 10),
    });
    let mut ctx = context(api, dir.path());

    let summary = ctx.pull(ResourceQuery::new(Resource::Notes)).expect("pull");

    assert_eq!(summary.records_written, 10);
}

#[test]
fn fail_fast_schema_policy_aborts_on_drift() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|_, _, _| notes_page(0, 5, 5));
    let client = AuthedClient::new(api, FakeTokens::default(), policy());
    let options = RunOptions {
        data_dir: dir.path().to_path_buf(),
        schema_policy: SchemaPolicy::Fail,
        ..RunOptions::default()
    };
    let mut ctx = PullContext::new(
        client,
        token("initial"),
        Url::parse("https://api.test/").expect("base"),
        options,
    );

    // note records are missing most loan columns
    let err = ctx
        .pull(ResourceQuery::new(Resource::Loans))
        .expect_err("schema drift");

    match err {
        PullError::Persist { source, .. } => {
            assert!(matches!(*source, PullError::SchemaMismatch { .. }))
        }
        other => panic!("expected persist failure, got {other:?}"),
    }
}

#[test]
fn listings_are_written_with_natural_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|url, _, _| {
        let query = helpers::query(url);
        assert_eq!(query.get("biddable").map(String::as_str), Some("false"));
        assert_eq!(query.get("invested").map(String::as_str), Some("true"));
        helpers::page_body(
            vec![serde_json::json!({"listing_number": 7, "listing_title": "Debt consolidation"})],
            1,
        )
    });
    let mut ctx = context(api, dir.path());

    ctx.pull(ResourceQuery::listings(lendsync::ListingFilter::Owned))
        .expect("pull");

    let (header, rows) = ctx.dataset(Resource::Listings).read_all().expect("read");
    assert_eq!(header, vec!["listing_number", "listing_title"]);
    assert_eq!(rows, vec![vec!["7", "Debt consolidation"]]);
}

#[test]
fn non_converging_total_is_reported_when_guarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|url, _, _| match offset(url) {
        0 => notes_page(0, 5, 50),
        _ => notes_page(0, 0, 50),
    });
    let client = AuthedClient::new(api, FakeTokens::default(), policy());
    let options = RunOptions {
        data_dir: dir.path().to_path_buf(),
        max_pages: Some(4),
        ..RunOptions::default()
    };
    let mut ctx = PullContext::new(
        client,
        token("initial"),
        Url::parse("https://api.test/").expect("base"),
        options,
    );

    let err = ctx
        .pull(ResourceQuery::new(Resource::Notes))
        .expect_err("guarded");
    assert!(matches!(err, PullError::DidNotConverge { pages: 4, .. }));
}

#[test]
fn listings_keep_first_page_columns_when_keys_reorder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let api = FakeApi::new(|url, _, _| match offset(url) {
        0 => helpers::page_body(
            vec![serde_json::json!({"listing_number": 1, "listing_title": "first"})],
            2,
        ),
        1 => helpers::page_body(
            vec![serde_json::json!({"listing_title": "second", "listing_number": 2})],
            2,
        ),
        other => panic!("unexpected offset {other}"),
    });
    let mut ctx = context(api, dir.path());

    ctx.pull(ResourceQuery::listings(lendsync::ListingFilter::Owned))
        .expect("pull");

    let (header, rows) = ctx.dataset(Resource::Listings).read_all().expect("read");
    assert_eq!(header, vec!["listing_number", "listing_title"]);
    assert_eq!(rows, vec![vec!["1", "first"], vec!["2", "second"]]);
}
