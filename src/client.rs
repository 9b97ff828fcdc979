//! Top-level client facade.

use crate::batch::{self, BatchError, BatchOptions, BatchResponse};
use crate::config::ClientConfig;
use crate::live::{LiveClient, LiveOptions, StreamSettings};
use crate::usage::{self, UsageError, UsageRange, UsageSummary};

/// Entry point composing every API surface behind one configuration.
///
/// The public contract is version-stable: the API version lives in
/// [`ClientConfig`] and shapes the request URLs, not the client types.
#[derive(Clone)]
pub struct VoxlineClient {
    config: ClientConfig,
}

impl VoxlineClient {
    /// Creates a client from an explicit configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Creates a client from the `VOXLINE_API_KEY` environment variable.
    pub fn from_env() -> Self {
        Self::new(ClientConfig::from_env())
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Creates a live streaming client with default transport settings.
    pub fn live(&self, options: LiveOptions) -> LiveClient {
        LiveClient::new(self.config.clone(), options)
    }

    /// Creates a live streaming client with explicit transport settings.
    pub fn live_with_settings(&self, options: LiveOptions, settings: StreamSettings) -> LiveClient {
        LiveClient::with_settings(self.config.clone(), options, settings)
    }

    /// Transcribes audio hosted at a URL.
    pub async fn transcribe_url(
        &self,
        options: &BatchOptions,
        source_url: &str,
    ) -> Result<BatchResponse, BatchError> {
        batch::transcribe_url(&self.config, options, source_url).await
    }

    /// Transcribes raw audio bytes with the given content type.
    pub async fn transcribe_buffer(
        &self,
        options: &BatchOptions,
        audio: Vec<u8>,
        content_type: &str,
    ) -> Result<BatchResponse, BatchError> {
        batch::transcribe_buffer(&self.config, options, audio, content_type).await
    }

    /// Fetches the usage summary for a date range.
    pub async fn usage(&self, range: &UsageRange) -> Result<UsageSummary, UsageError> {
        usage::fetch_usage_summary(&self.config, range).await
    }
}
