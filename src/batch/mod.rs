//! Pre-recorded transcription over plain HTTP.
//!
//! Verb-per-call REST glue with no connection state: submit an audio
//! source (hosted URL or raw bytes), get the full transcription response
//! back. Streaming sessions live in [`crate::live`].

mod types;

pub use types::{
    BatchAlternative, BatchChannel, BatchMetadata, BatchOptions, BatchResponse, BatchResults,
    BatchWord,
};

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::config::ClientConfig;
use crate::live::options::query_string;

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Errors from the batch transcription surface.
#[derive(Debug)]
pub enum BatchError {
    /// API key not configured
    MissingApiKey,
    /// Network/HTTP error
    Network(String),
    /// The API returned an error status
    Api { status: u16, message: String },
    /// Failed to parse the API response
    Parse(String),
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::MissingApiKey => {
                write!(
                    f,
                    "API key not configured. Set the {} environment variable or pass a key explicitly.",
                    crate::config::API_KEY_ENV_VAR
                )
            }
            BatchError::Network(e) => write!(f, "Network error: {}", e),
            BatchError::Api { status, message } => {
                write!(f, "API error ({}): {}", status, message)
            }
            BatchError::Parse(e) => write!(f, "Failed to parse API response: {}", e),
        }
    }
}

impl std::error::Error for BatchError {}

/// Transcribes audio hosted at a URL.
pub async fn transcribe_url(
    config: &ClientConfig,
    options: &BatchOptions,
    source_url: &str,
) -> Result<BatchResponse, BatchError> {
    if !config.has_api_key() {
        return Err(BatchError::MissingApiKey);
    }

    log::info!("submitting hosted-audio transcription request");
    let request = http_client()
        .post(listen_url(config, options))
        .header("Authorization", config.auth_header())
        .json(&json!({ "url": source_url }));

    execute(config, request).await
}

/// Transcribes raw audio bytes with the given content type.
pub async fn transcribe_buffer(
    config: &ClientConfig,
    options: &BatchOptions,
    audio: Vec<u8>,
    content_type: &str,
) -> Result<BatchResponse, BatchError> {
    if !config.has_api_key() {
        return Err(BatchError::MissingApiKey);
    }

    log::info!("submitting {}-byte buffer transcription request", audio.len());
    let request = http_client()
        .post(listen_url(config, options))
        .header("Authorization", config.auth_header())
        .header("Content-Type", content_type)
        .body(audio);

    execute(config, request).await
}

fn listen_url(config: &ClientConfig, options: &BatchOptions) -> String {
    format!(
        "{}{}",
        config.rest_endpoint("listen"),
        query_string(&options.query_pairs())
    )
}

async fn execute(
    config: &ClientConfig,
    request: reqwest::RequestBuilder,
) -> Result<BatchResponse, BatchError> {
    let mut request = request;
    for (name, value) in config.extra_headers() {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| BatchError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BatchError::Api {
            status: status.as_u16(),
            message: match status.as_u16() {
                401 => "Invalid API key".to_string(),
                403 => "API key lacks transcription permission".to_string(),
                429 => "Rate limited - try again later".to_string(),
                _ => body,
            },
        });
    }

    response
        .json::<BatchResponse>()
        .await
        .map_err(|e| BatchError::Parse(e.to_string()))
}
