//! Weather sources.
//!
//! The polling loop only sees the `WeatherSource` trait; `WeatherApiClient`
//! is the production implementation backed by the weatherapi.com REST API.

use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::snapshot::WeatherSnapshot;

// ── Constants ───────────────────────────────────────────────────────

/// Realtime weather endpoint, relative to the API base URL.
const REALTIME_PATH: &str = "/current.json";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ── Errors ──────────────────────────────────────────────────────────

/// Why a fetch produced no snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure: DNS, connect, TLS, timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status (bad key, unknown location, rate limit).
    #[error("API error (status {status}{}): {message}", .code.map(|c| format!(", code {}", c)).unwrap_or_default())]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// The response body was not a JSON object.
    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, FetchError>;

// ── Capability ──────────────────────────────────────────────────────

/// Something that can produce a weather snapshot for a location query.
///
/// Implementations do not retry; the caller decides what a failure means.
pub trait WeatherSource: Send + Sync {
    fn fetch(&self, query: &str, lang: &str)
        -> impl Future<Output = Result<WeatherSnapshot>> + Send;
}

// ── weatherapi.com ──────────────────────────────────────────────────

/// Error envelope returned by weatherapi.com on failure.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: Option<i64>,
    message: String,
}

/// Map a non-success response to `FetchError::Api`, using the API's error
/// envelope when present and the raw body otherwise.
fn api_error(status: u16, body: &str) -> FetchError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => FetchError::Api {
            status,
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => FetchError::Api {
            status,
            code: None,
            message: if body.trim().is_empty() {
                "empty response body".to_string()
            } else {
                body.trim().to_string()
            },
        },
    }
}

/// Turn a successful response body into a snapshot.
fn parse_snapshot(body: Value) -> Result<WeatherSnapshot> {
    WeatherSnapshot::from_value(body)
        .ok_or_else(|| FetchError::Decode("expected a JSON object".to_string()))
}

/// Realtime weather client for weatherapi.com.
pub struct WeatherApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for WeatherApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherApiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl WeatherApiClient {
    /// Create a client for `base_url` (e.g. `https://api.weatherapi.com/v1`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn realtime_url(&self) -> String {
        format!("{}{}", self.base_url, REALTIME_PATH)
    }
}

impl WeatherSource for WeatherApiClient {
    async fn fetch(&self, query: &str, lang: &str) -> Result<WeatherSnapshot> {
        let response = self
            .client
            .get(self.realtime_url())
            .query(&[("key", self.api_key.as_str()), ("q", query), ("lang", lang)])
            .send()
            .await
            // the request URL carries the credential
            .map_err(|e| FetchError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                log::debug!("Failed to read error response body: {}", e.without_url());
                String::new()
            });
            return Err(api_error(status.as_u16(), &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.without_url().to_string()))?;
        parse_snapshot(body)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
