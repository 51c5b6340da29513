#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use lendsync::{AuthToken, PullError, RawResponse, Result, TokenProvider, Transport};
use serde_json::{json, Value};
use url::Url;

pub const EXPIRED_BODY: &str = r#"{"code":"SEC0002","message":"Invalid token"}"#;

type Handler = Box<dyn Fn(&Url, &str, usize) -> RawResponse>;

/// Transport that answers from a closure and remembers every request.
pub struct FakeApi {
    handler: Handler,
    pub requests: RefCell<Vec<(Url, String)>>,
}

impl FakeApi {
    /// `handler` receives the URL, the bearer token and the zero-based request number.
    pub fn new(handler: impl Fn(&Url, &str, usize) -> RawResponse + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Transport for FakeApi {
    fn get(&self, url: &str, bearer: &str) -> Result<RawResponse> {
        let parsed = Url::parse(url)?;
        let n = self.requests.borrow().len();
        self.requests
            .borrow_mut()
            .push((parsed.clone(), bearer.to_string()));
        Ok((self.handler)(&parsed, bearer, n))
    }
}

/// Token provider that numbers each refreshed token.
#[derive(Default)]
pub struct FakeTokens {
    pub refreshes: Cell<usize>,
}

impl TokenProvider for FakeTokens {
    fn acquire(&self) -> Result<AuthToken> {
        Ok(token("initial"))
    }

    fn refresh(&self, previous: &AuthToken) -> Result<AuthToken> {
        if previous.refresh_token.is_empty() {
            return Err(PullError::TokenRefresh("no refresh token".into()));
        }
        self.refreshes.set(self.refreshes.get() + 1);
        Ok(token(&format!("fresh-{}", self.refreshes.get())))
    }
}

pub fn token(access: &str) -> AuthToken {
    AuthToken {
        access_token: access.to_string(),
        token_type: "bearer".into(),
        refresh_token: "refresh-me".into(),
        expires_in: 3599,
    }
}

pub fn query(url: &Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

pub fn offset(url: &Url) -> u64 {
    query(url)
        .get("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// JSON page body with `count` note records numbered from `first`.
pub fn notes_page(first: u64, count: u64, total: u64) -> RawResponse {
    let result: Vec<Value> = (first..first + count)
        .map(|n| {
            json!({
                "loan_note_id": format!("{n}-1"),
                "loan_number": n,
                "note_status": 1,
                "note_status_description": "CURRENT",
                "origination_date": "2018-05-01",
                "term": 36,
            })
        })
        .collect();
    page_body(result, total)
}

pub fn page_body(result: Vec<Value>, total: u64) -> RawResponse {
    let body = json!({
        "result_count": result.len(),
        "total_count": total,
        "result": result,
    });
    RawResponse::new(200, body.to_string())
}
