//! Request options and response types for pre-recorded transcription.

use serde::Deserialize;

use crate::live::options::push_opt;

/// Transcription parameters for a batch request, sent as query values.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Transcription model selection
    pub model: Option<String>,
    /// BCP-47 language tag
    pub language: Option<String>,
    /// Add punctuation and capitalization
    pub punctuate: Option<bool>,
    /// Apply server-side formatting to dates, numbers, etc.
    pub smart_format: Option<bool>,
    /// Additional feature flags, appended verbatim
    pub extra: Vec<(String, String)>,
}

impl BatchOptions {
    /// Renders the set options as query pairs, in declaration order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "model", &self.model);
        push_opt(&mut pairs, "language", &self.language);
        push_opt(&mut pairs, "punctuate", &self.punctuate);
        push_opt(&mut pairs, "smart_format", &self.smart_format);
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

/// Full response for one batch transcription request.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    pub metadata: BatchMetadata,
    pub results: BatchResults,
}

impl BatchResponse {
    /// The highest-confidence transcript of the first channel, if any.
    pub fn transcript(&self) -> Option<&str> {
        self.results
            .channels
            .first()
            .and_then(|channel| channel.alternatives.first())
            .map(|alt| alt.transcript.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchMetadata {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Duration of the submitted audio, in seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub channels: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchResults {
    #[serde(default)]
    pub channels: Vec<BatchChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchChannel {
    #[serde(default)]
    pub alternatives: Vec<BatchAlternative>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchAlternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<BatchWord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchWord {
    #[serde(default)]
    pub word: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
}
