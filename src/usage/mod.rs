//! Usage API integration for fetching account usage metrics.
//!
//! Plain request/response wrapper over the usage endpoint: aggregate
//! seconds of audio processed and request counts for a date range. No
//! caching, no persistence.

mod types;

pub use types::{UsageRange, UsageSummary};

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

use crate::config::ClientConfig;

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Errors from the usage surface.
#[derive(Debug)]
pub enum UsageError {
    /// API key not configured
    MissingApiKey,
    /// Network/HTTP error
    Network(String),
    /// The API returned an error status
    Api { status: u16, message: String },
    /// Failed to parse the API response
    Parse(String),
}

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageError::MissingApiKey => {
                write!(
                    f,
                    "API key not configured. Set the {} environment variable or pass a key explicitly.",
                    crate::config::API_KEY_ENV_VAR
                )
            }
            UsageError::Network(e) => write!(f, "Network error fetching usage: {}", e),
            UsageError::Api { status, message } => {
                write!(f, "Usage API error ({}): {}", status, message)
            }
            UsageError::Parse(e) => write!(f, "Failed to parse usage response: {}", e),
        }
    }
}

impl std::error::Error for UsageError {}

/// Fetches the usage summary for a date range.
///
/// Requires a key with usage read permission.
pub async fn fetch_usage_summary(
    config: &ClientConfig,
    range: &UsageRange,
) -> Result<UsageSummary, UsageError> {
    if !config.has_api_key() {
        return Err(UsageError::MissingApiKey);
    }

    let url = format!(
        "{}?start={}&end={}",
        config.rest_endpoint("usage"),
        range.start.to_rfc3339(),
        range.end.to_rfc3339()
    );

    let mut request = http_client()
        .get(&url)
        .header("Authorization", config.auth_header());
    for (name, value) in config.extra_headers() {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| UsageError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UsageError::Api {
            status: status.as_u16(),
            message: match status.as_u16() {
                401 => "Invalid API key".to_string(),
                403 => "API key lacks usage read permission".to_string(),
                429 => "Rate limited - try again later".to_string(),
                _ => body,
            },
        });
    }

    response
        .json::<UsageSummary>()
        .await
        .map_err(|e| UsageError::Parse(e.to_string()))
}
