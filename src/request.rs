//! Authenticated GET requests with bounded retries and transparent token refresh.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthToken, TokenProvider};
use crate::error::{PullError, Result};

/// Error code the API returns (with HTTP 403) once an access token expires.
pub const INVALID_TOKEN_CODE: &str = "SEC0002";
/// Timezone header sent when none is configured.
pub const DEFAULT_TIMEZONE: &str = "America/Denver";

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Builds a response from parts.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Issues a single GET with a bearer token. Implementations do not retry.
pub trait Transport {
    /// Performs the request and returns whatever the server answered.
    fn get(&self, url: &str, bearer: &str) -> Result<RawResponse>;
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds a blocking client that sends the `timezone` header on every request.
    pub fn new(timezone: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let tz = HeaderValue::from_str(timezone)
            .map_err(|_| PullError::InvalidTimezone(timezone.to_string()))?;
        headers.insert("timezone", tz);
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, bearer: &str) -> Result<RawResponse> {
        let auth = HeaderValue::from_str(&format!("bearer {bearer}"))
            .map_err(|err| PullError::TokenRefresh(format!("unusable access token: {err}")))?;
        let resp = self.client.get(url).header(AUTHORIZATION, auth).send()?;
        let status = resp.status().as_u16();
        let body = resp.text()?;
        Ok(RawResponse { status, body })
    }
}

/// Retry knobs for the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Attempts allowed for generic failures before the request is fatal.
    pub max_retries: usize,
    /// Fixed sleep between generic attempts.
    pub backoff: Duration,
    /// Token refreshes allowed per request; never less than one.
    pub max_token_refreshes: usize,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(2),
            max_token_refreshes: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// True when a 403 body carries the API's expired-token error.
pub fn is_invalid_token(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|err| err.code == INVALID_TOKEN_CODE || err.message == "Invalid token")
        .unwrap_or(false)
}

/// Request layer: a transport plus the token provider used to recover expired tokens.
pub struct AuthedClient<T, P> {
    transport: T,
    tokens: P,
    policy: RequestPolicy,
}

impl<T: Transport, P: TokenProvider> AuthedClient<T, P> {
    /// Wraps `transport`, refreshing through `tokens` when needed.
    pub fn new(transport: T, tokens: P, policy: RequestPolicy) -> Self {
        Self {
            transport,
            tokens,
            policy,
        }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Refreshes `token`, falling back to a full grant once the refresh token is rejected.
    fn renew(&self, token: &AuthToken) -> Result<AuthToken> {
        match self.tokens.refresh(token) {
            Err(PullError::InvalidCredentials { body }) => {
                warn!(body = %body, "refresh token rejected; requesting a new token");
                self.tokens.acquire()
            }
            other => other,
        }
    }

    /// Fetches `url`, replacing `token` in place whenever the server reports it expired.
    ///
    /// Returns only on HTTP 200. A 401 fails immediately; other statuses and
    /// transport errors are retried up to `max_retries` with a fixed backoff.
    /// Refreshes do not count against `max_retries`.
    pub fn fetch(&self, url: &str, token: &mut AuthToken) -> Result<RawResponse> {
        let tries = self.policy.max_retries.max(1);
        let max_refreshes = self.policy.max_token_refreshes.max(1);
        let mut attempt = 0usize;
        let mut refreshes = 0usize;
        loop {
            debug!(url, attempt = attempt + 1, "GET");
            let resp = match self.transport.get(url, &token.access_token) {
                Ok(resp) => resp,
                Err(err) => {
                    attempt += 1;
                    if attempt >= tries {
                        error!(attempt, error = %err, "request failed after too many tries");
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "trouble getting data");
                    thread::sleep(self.policy.backoff);
                    continue;
                }
            };

            match resp.status {
                200 => return Ok(resp),
                403 if is_invalid_token(&resp.body) => {
                    if refreshes >= max_refreshes {
                        return Err(PullError::TokenRefresh(format!(
                            "token still rejected after {refreshes} refresh(es)"
                        )));
                    }
                    refreshes += 1;
                    info!("token expired; attempting refresh ...");
                    *token = self.renew(token)?;
                    info!("token refreshed");
                }
                401 => {
                    error!(status = resp.status, body = %resp.body, "bad API credentials");
                    return Err(PullError::InvalidCredentials { body: resp.body });
                }
                status => {
                    attempt += 1;
                    warn!(attempt, status, body = %resp.body, "trouble getting data");
                    if attempt >= tries {
                        error!(attempt, status, "request failed after too many tries");
                        return Err(PullError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            status,
                            body: resp.body,
                        });
                    }
                    thread::sleep(self.policy.backoff);
                }
            }
        }
    }
}
