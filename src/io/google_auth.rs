//! Service-account access tokens for the Google APIs
//!
//! A signed RS256 assertion is exchanged at the key's token URI for a
//! short-lived bearer token. The token is cached and replaced a minute
//! before it expires.

use crate::domain::error::RelayError;
use crate::infra::secrets::{Secret, ServiceAccountKey};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Assertion claims for the JWT bearer grant
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

struct CachedToken {
    access_token: Secret,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

pub struct TokenProvider {
    client: Client,
    client_email: String,
    token_uri: String,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Fails with `RelayError::Auth` when the private key is not a usable RSA PEM
    pub fn new(key: &ServiceAccountKey, timeout: Duration) -> Result<Self, RelayError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.expose().as_bytes())
            .map_err(|e| RelayError::Auth(format!("invalid service account private key: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build token client: {}", e)))?;

        Ok(Self {
            client,
            client_email: key.client_email.clone(),
            token_uri: key.token_uri.clone(),
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    pub fn claims(&self, now: DateTime<Utc>) -> Claims {
        let iat = now.timestamp();
        Claims {
            iss: self.client_email.clone(),
            scope: SHEETS_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        }
    }

    /// Signed assertion for the token exchange
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, RelayError> {
        encode(&Header::new(Algorithm::RS256), &self.claims(now), &self.encoding_key)
            .map_err(|e| RelayError::Auth(format!("failed to sign assertion: {}", e)))
    }

    /// Current bearer token, exchanging a new assertion when the cached one is stale
    pub async fn access_token(&self) -> Result<Secret, RelayError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let token = self.exchange(now).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<CachedToken, RelayError> {
        let assertion = self.assertion(now)?;
        debug!(token_uri = %self.token_uri, "token_exchange_started");

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| RelayError::LedgerUnavailable(format!("token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<TokenErrorResponse>(&text)
                .map(|e| match e.error_description {
                    Some(desc) => format!("{}: {}", e.error, desc),
                    None => e.error,
                })
                .unwrap_or(text);
            return Err(RelayError::LedgerUnavailable(format!(
                "token exchange HTTP {}: {}",
                status.as_u16(),
                detail
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::LedgerUnavailable(format!("malformed token response: {}", e)))?;

        info!(expires_in = %token.expires_in, "access_token_refreshed");
        Ok(CachedToken {
            access_token: Secret::new(token.access_token),
            expires_at: now + ChronoDuration::seconds(token.expires_in),
        })
    }
}
