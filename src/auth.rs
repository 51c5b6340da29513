//! OAuth2 password-grant token acquisition and refresh.

use std::fmt;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{PullError, Result};
use crate::request::RequestPolicy;

/// Default token endpoint of the marketplace API.
pub const DEFAULT_TOKEN_URL: &str = "https://api.prosper.com/v1/security/oauth/token";

/// The four secrets needed to obtain a token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Investor account username.
    pub username: String,
    /// Investor account password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bearer token issued by the token endpoint.
///
/// The refresh token stays valid for roughly ten hours; the access token for
/// `expires_in` seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Token sent in the `Authorization` header.
    pub access_token: String,
    /// Token type, normally `bearer`.
    pub token_type: String,
    /// Token exchanged for a fresh access token.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Source of bearer tokens for the request layer.
pub trait TokenProvider {
    /// Obtains a brand-new token.
    fn acquire(&self) -> Result<AuthToken>;

    /// Exchanges `token`'s refresh token for a new token.
    fn refresh(&self, token: &AuthToken) -> Result<AuthToken>;
}

/// Blocking OAuth2 client for the password and refresh-token grants.
#[derive(Clone)]
pub struct OAuthClient {
    client: Client,
    token_url: String,
    credentials: Credentials,
}

impl OAuthClient {
    /// Builds a token client for `token_url`.
    pub fn new(token_url: String, credentials: Credentials, timeout: Duration) -> Result<Self> {
        if credentials.client_id.trim().is_empty() || credentials.username.trim().is_empty() {
            return Err(PullError::InvalidCredentials {
                body: "missing client id or username".to_string(),
            });
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            token_url: token_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Acquires the run's first token, retrying transient failures with a fixed backoff.
    pub fn initiate(&self, policy: &RequestPolicy) -> Result<AuthToken> {
        let tries = policy.max_retries.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.acquire() {
                Ok(token) => {
                    info!("established connection to API");
                    return Ok(token);
                }
                Err(err @ PullError::InvalidCredentials { .. }) => return Err(err),
                Err(err) if attempt < tries => {
                    warn!(attempt, error = %err, "trouble obtaining access token");
                    thread::sleep(policy.backoff);
                }
                Err(err) => {
                    error!(attempt, error = %err, "giving up on access token");
                    return Err(err);
                }
            }
        }
    }

    fn grant(&self, form: &[(&str, &str)]) -> Result<AuthToken> {
        let resp = self.client.post(&self.token_url).form(form).send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json()?);
        }
        let body = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if status == StatusCode::UNAUTHORIZED {
            return Err(PullError::InvalidCredentials { body });
        }
        Err(PullError::RetriesExhausted {
            url: self.token_url.clone(),
            attempts: 1,
            status: status.as_u16(),
            body,
        })
    }
}

impl TokenProvider for OAuthClient {
    fn acquire(&self) -> Result<AuthToken> {
        let creds = &self.credentials;
        self.grant(&[
            ("grant_type", "password"),
            ("client_id", &creds.client_id),
            ("client_secret", &creds.client_secret),
            ("username", &creds.username),
            ("password", &creds.password),
        ])
    }

    fn refresh(&self, token: &AuthToken) -> Result<AuthToken> {
        let creds = &self.credentials;
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("client_id", &creds.client_id),
            ("client_secret", &creds.client_secret),
            ("refresh_token", &token.refresh_token),
        ])
        .map_err(|err| match err {
            PullError::InvalidCredentials { .. } => err,
            other => PullError::TokenRefresh(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_parses_from_grant_response() {
        let body = r#"{
            "access_token": "22a5aaaf-bb7b-4278",
            "token_type": "bearer",
            "refresh_token": "7fcb8a8a-e7dd-4fa9",
            "expires_in": 3599
        }"#;
        let token: AuthToken = serde_json::from_str(body).expect("token json");
        assert_eq!(token.access_token, "22a5aaaf-bb7b-4278");
        assert_eq!(token.expires_in, 3599);
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials {
            client_id: "id".into(),
            client_secret: "s3cret".into(),
            username: "investor".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("investor"));
    }

    #[test]
    fn empty_username_is_rejected_before_any_request() {
        let creds = Credentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            username: " ".into(),
            password: "pw".into(),
        };
        let err = OAuthClient::new(DEFAULT_TOKEN_URL.into(), creds, Duration::from_secs(5))
            .err()
            .expect("rejected");
        assert!(matches!(err, PullError::InvalidCredentials { .. }));
    }
}
