//! Google Sheets ledger sink
//!
//! Rows are appended through the `values:append` endpoint so concurrent
//! writers never overwrite each other. The header row is written once at
//! startup when the sheet is empty. Cells are written RAW, so message text
//! that looks like a formula (`+200 freelance`, `=SUM(..)`) stays text.
//!
//! An append that times out may still have been applied by Sheets. That case
//! surfaces as `LedgerOutcomeUnknown` so it can be told apart from a refusal.

use crate::domain::currency::Currency;
use crate::domain::error::RelayError;
use crate::domain::expense::LedgerRow;
use crate::infra::config::Config;
use crate::infra::secrets::CredentialBundle;
use crate::io::google_auth::TokenProvider;
use crate::services::coordinator::LedgerSink;
use async_trait::async_trait;
use reqwest::{Client, Method, Response, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const HEADER_RANGE: &str = "A1:H1";
const DATA_RANGE: &str = "A:H";

#[derive(Debug, Serialize)]
struct ValueRange<'a, T> {
    values: Vec<&'a [T]>,
}

#[derive(Debug, Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}

pub struct SheetsLedger {
    client: Client,
    tokens: TokenProvider,
    api_base: String,
    spreadsheet_id: String,
    sheet_name: String,
    base_currency: Currency,
}

impl SheetsLedger {
    pub fn new(config: &Config, credentials: &CredentialBundle) -> Result<Self, RelayError> {
        let timeout = Duration::from_millis(config.ledger_timeout_ms());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build sheets client: {}", e)))?;

        Ok(Self {
            client,
            tokens: TokenProvider::new(&credentials.service_account, timeout)?,
            api_base: config.sheets_api_base().to_string(),
            spreadsheet_id: credentials.spreadsheet_id.clone(),
            sheet_name: config.sheet_name().to_string(),
            base_currency: config.base_currency().clone(),
        })
    }

    /// Browser link to the spreadsheet
    pub fn spreadsheet_url(&self) -> String {
        format!("https://docs.google.com/spreadsheets/d/{}", self.spreadsheet_id)
    }

    /// `{base}/v4/spreadsheets/{id}/values/{sheet}!{range}{suffix}` with each segment encoded
    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| RelayError::Config(format!("invalid sheets api base {}: {}", self.api_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| RelayError::Config(format!("sheets api base cannot be a base: {}", self.api_base)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values"])
            .push(&format!("{}!{}{}", self.sheet_name, range, suffix));
        Ok(url)
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, &str)],
        body: Option<&T>,
    ) -> Result<Response, RelayError> {
        let token = self.tokens.access_token().await?;
        let mut request =
            self.client.request(method, url).query(query).bearer_auth(token.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::LedgerOutcomeUnknown("request timed out".to_string())
            } else {
                RelayError::LedgerUnavailable(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<GoogleErrorResponse>(&text).map(|e| e.error.message).unwrap_or(text);
        Err(RelayError::LedgerUnavailable(format!("HTTP {}: {}", status.as_u16(), detail)))
    }

    /// Write the header row if the first row is empty. Returns whether it wrote.
    pub async fn ensure_headers(&self) -> Result<bool, RelayError> {
        let response = self
            .send::<()>(Method::GET, self.values_url(HEADER_RANGE, "")?, &[], None)
            .await?;
        let existing: ValueRangeResponse = response
            .json()
            .await
            .map_err(|e| RelayError::LedgerUnavailable(format!("malformed values response: {}", e)))?;

        if existing.values.iter().any(|row| !row.is_empty()) {
            return Ok(false);
        }

        let headers = LedgerRow::headers(&self.base_currency);
        let body = ValueRange { values: vec![headers.as_slice()] };
        self.send(
            Method::PUT,
            self.values_url(HEADER_RANGE, "")?,
            &[("valueInputOption", "RAW")],
            Some(&body),
        )
        .await?;

        info!(sheet = %self.sheet_name, "ledger_headers_written");
        Ok(true)
    }
}

#[async_trait]
impl LedgerSink for SheetsLedger {
    async fn append(&self, row: &LedgerRow) -> Result<(), RelayError> {
        let cells = row.cells();
        let body = ValueRange { values: vec![cells.as_slice()] };
        self.send(
            Method::POST,
            self.values_url(DATA_RANGE, ":append")?,
            &[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")],
            Some(&body),
        )
        .await?;
        Ok(())
    }
}
