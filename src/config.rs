//! Client configuration: credential resolution and endpoint selection.

/// Environment variable consulted by [`ClientConfig::from_env`].
pub const API_KEY_ENV_VAR: &str = "VOXLINE_API_KEY";

/// Production REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.voxline.dev";
/// Production websocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://api.voxline.dev";

/// Shared configuration for all API surfaces.
///
/// One `ClientConfig` carries the credential, the endpoint roots, and any
/// extra headers; the live, batch, and usage clients all borrow from it.
///
/// Deliberately not `Debug`: the credential must not leak into logs.
#[derive(Clone)]
pub struct ClientConfig {
    api_key: String,
    api_url: String,
    ws_url: String,
    api_version: String,
    extra_headers: Vec<(String, String)>,
}

impl ClientConfig {
    /// Creates a configuration with the given API key and default endpoints.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            api_version: "v1".to_string(),
            extra_headers: Vec::new(),
        }
    }

    /// Creates a configuration from the `VOXLINE_API_KEY` environment variable.
    ///
    /// A missing variable produces a config with an empty key; the error is
    /// surfaced when the first call that needs the credential is made.
    pub fn from_env() -> Self {
        let api_key = std::env::var(API_KEY_ENV_VAR).unwrap_or_default();
        if api_key.is_empty() {
            log::warn!("{} is not set, API key is missing", API_KEY_ENV_VAR);
        }
        Self::new(api_key)
    }

    /// Overrides the REST endpoint root (self-hosted deployments).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Overrides the websocket endpoint root.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Adds a header sent on every request (handshake and REST alike).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Whether a non-empty credential is configured.
    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// The `Authorization` header value for this credential.
    pub fn auth_header(&self) -> String {
        format!("Token {}", self.api_key)
    }

    /// Extra headers to attach to every request.
    pub fn extra_headers(&self) -> &[(String, String)] {
        &self.extra_headers
    }

    /// Builds a versioned REST URL, e.g. `rest_endpoint("listen")`.
    pub fn rest_endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.api_url, self.api_version, path)
    }

    /// Builds a versioned websocket URL, e.g. `ws_endpoint("listen")`.
    pub fn ws_endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.ws_url, self.api_version, path)
    }
}
