//! Realtime streaming transcription over a persistent websocket.
//!
//! This module is the streaming connection manager: it owns the socket
//! lifecycle, streams caller-supplied audio frames out, and delivers typed
//! transcription events back through registered listeners.
//!
//! # Architecture
//!
//! ```text
//! caller ──send(bytes)──▶ bounded queue ──▶ writer task ──▶ socket
//!                                            (keepalive)
//!
//! socket ──▶ reader task ──decode──▶ listener dispatch ──▶ caller callbacks
//!
//! supervisor task: connect / reconnect / state transitions / teardown
//! ```
//!
//! # Connection flow
//!
//! 1. `start()` - open the socket with auth headers and encoding params
//! 2. `send()` - stream audio chunks (enqueue, non-blocking while space)
//! 3. `on()` - register listeners for inbound event categories
//! 4. `finish()` - graceful half-close, drains queued audio first
//! 5. `close()` - forced teardown
//!
//! A failed initial handshake is fatal and never retried (credential and
//! endpoint errors are not transient). Mid-session transport loss triggers
//! bounded-exponential reconnection when the policy allows it.

mod client;
mod connection;
mod dispatcher;
pub(crate) mod options;
mod protocol;

pub use client::LiveClient;
pub use connection::ConnectionState;
pub use dispatcher::ListenerId;
pub use options::{LiveOptions, ReconnectPolicy, StreamSettings};
pub use protocol::{
    AudioChunk, ControlMessage, ErrorPayload, EventCategory, LiveEvent, MetadataPayload,
    OutboundFrame, SpeechStartedPayload, TranscriptAlternative, TranscriptChannel,
    TranscriptResult, TranscriptWord, UtteranceEndPayload, WarningPayload,
};

/// Errors surfaced by the streaming client.
#[derive(Debug, Clone)]
pub enum LiveError {
    /// API key not configured
    MissingApiKey,
    /// Initial websocket handshake failed (bad endpoint, rejected auth)
    Handshake(String),
    /// `start` called while a connection is already up
    AlreadyStarted,
    /// Operation requires a Connected state
    NotConnected,
    /// Outbound queue stayed full past the bounded wait
    Backpressure,
    /// Connection was torn down while the frame was in flight
    SendQueueClosed,
}

impl std::fmt::Display for LiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveError::MissingApiKey => {
                write!(
                    f,
                    "API key not configured. Set the {} environment variable or pass a key explicitly.",
                    crate::config::API_KEY_ENV_VAR
                )
            }
            LiveError::Handshake(e) => write!(f, "Failed to establish connection: {}", e),
            LiveError::AlreadyStarted => write!(f, "Connection already started"),
            LiveError::NotConnected => write!(f, "Connection is not open"),
            LiveError::Backpressure => {
                write!(f, "Outbound queue is full, audio is being produced faster than it can be sent")
            }
            LiveError::SendQueueClosed => write!(f, "Connection closed while sending"),
        }
    }
}

impl std::error::Error for LiveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_error_display() {
        let err = LiveError::MissingApiKey;
        assert!(err.to_string().contains("VOXLINE_API_KEY"));

        let err = LiveError::Handshake("401 Unauthorized".to_string());
        assert!(err.to_string().contains("401 Unauthorized"));

        let err = LiveError::Backpressure;
        assert!(err.to_string().contains("queue is full"));
    }

    #[test]
    fn test_live_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LiveError>();
    }
}
