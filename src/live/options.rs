//! Connect-time options and transport tuning for live streaming.

use std::time::Duration;

/// Transcription parameters sent as query-string values at connect time.
///
/// These are passed through to the server opaquely; the SDK does not
/// interpret them. Unset fields are omitted from the URL.
#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    /// Transcription model selection
    pub model: Option<String>,
    /// BCP-47 language tag
    pub language: Option<String>,
    /// Raw audio encoding, e.g. "linear16"
    pub encoding: Option<String>,
    /// Sample rate in Hz of the audio that will be sent
    pub sample_rate: Option<u32>,
    /// Channel count of the audio that will be sent
    pub channels: Option<u32>,
    /// Add punctuation and capitalization
    pub punctuate: Option<bool>,
    /// Deliver interim (non-final) transcript hypotheses
    pub interim_results: Option<bool>,
    /// Apply server-side formatting to dates, numbers, etc.
    pub smart_format: Option<bool>,
    /// Utterance-boundary silence threshold in milliseconds
    pub endpointing: Option<u32>,
    /// Additional feature flags, appended verbatim
    pub extra: Vec<(String, String)>,
}

impl LiveOptions {
    /// Renders the set options as query pairs, in declaration order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "model", &self.model);
        push_opt(&mut pairs, "language", &self.language);
        push_opt(&mut pairs, "encoding", &self.encoding);
        push_opt(&mut pairs, "sample_rate", &self.sample_rate);
        push_opt(&mut pairs, "channels", &self.channels);
        push_opt(&mut pairs, "punctuate", &self.punctuate);
        push_opt(&mut pairs, "interim_results", &self.interim_results);
        push_opt(&mut pairs, "smart_format", &self.smart_format);
        push_opt(&mut pairs, "endpointing", &self.endpointing);
        pairs.extend(self.extra.iter().cloned());
        pairs
    }
}

pub(crate) fn push_opt<T: ToString>(
    pairs: &mut Vec<(String, String)>,
    key: &str,
    value: &Option<T>,
) {
    if let Some(value) = value {
        pairs.push((key.to_string(), value.to_string()));
    }
}

/// Renders query pairs as a `?k=v&k=v` suffix, empty when there are none.
pub(crate) fn query_string(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("?{}", joined.join("&"))
}

/// Reconnection policy for mid-session transport loss.
///
/// Initial handshake failures are never retried; this policy only governs
/// connections that were established and then lost.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    /// Ceiling for the exponential backoff
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before the given attempt (1-based).
    ///
    /// Doubles per consecutive failure, clamped to `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent));
        std::cmp::min(delay, self.max_backoff)
    }
}

/// Transport tuning for one live connection; never sent on the wire.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Idle interval after which a KeepAlive frame is injected.
    /// Zero disables keepalive.
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectPolicy,
    /// Outbound queue depth, in frames
    pub queue_capacity: usize,
    /// Bounded wait applied to `send` when the queue is full
    pub backpressure_wait: Duration,
    /// How long `finish` waits for the peer's close handshake
    pub drain_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(8),
            reconnect: ReconnectPolicy::default(),
            queue_capacity: 64,
            backpressure_wait: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pairs_omit_unset_fields() {
        let options = LiveOptions::default();
        assert!(options.query_pairs().is_empty());
        assert_eq!(query_string(&options.query_pairs()), "");
    }

    #[test]
    fn test_query_pairs_render_in_declaration_order() {
        let options = LiveOptions {
            model: Some("general".to_string()),
            encoding: Some("linear16".to_string()),
            sample_rate: Some(16000),
            interim_results: Some(true),
            extra: vec![("diarize".to_string(), "true".to_string())],
            ..Default::default()
        };

        let rendered = query_string(&options.query_pairs());
        assert_eq!(
            rendered,
            "?model=general&encoding=linear16&sample_rate=16000&interim_results=true&diarize=true"
        );
    }

    #[test]
    fn test_backoff_is_non_decreasing_and_capped() {
        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            ..Default::default()
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            let delay = policy.backoff_for(attempt);
            assert!(delay >= previous, "backoff shrank at attempt {}", attempt);
            assert!(delay <= policy.max_backoff);
            previous = delay;
        }
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(12), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_survives_huge_attempt_counts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff_for(u32::MAX), policy.max_backoff);
    }

    #[test]
    fn test_default_settings_are_sane() {
        let settings = StreamSettings::default();
        assert!(settings.queue_capacity > 0);
        assert!(settings.keepalive_interval > Duration::ZERO);
        assert!(settings.drain_timeout > Duration::ZERO);
    }
}
