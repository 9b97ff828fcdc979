//! Wire protocol types for the streaming endpoint.
//!
//! The session multiplexes two frame kinds over one websocket:
//! audio travels as opaque binary frames, control messages and server
//! events travel as JSON text frames carrying a `type` discriminator.
//!
//! Decoding is deliberately forgiving: an unknown `type` becomes an
//! [`LiveEvent::Unhandled`] passthrough (new server message types must not
//! crash older clients), and a malformed frame becomes a local
//! [`LiveEvent::Error`] without touching the connection.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// Control messages sent from client to server as text frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// No-op liveness signal; prevents the server from timing out an idle session
    KeepAlive,
    /// Flush and finalize all buffered audio, then close from the server side
    Finalize,
    /// Immediate stream termination request
    CloseStream,
}

impl ControlMessage {
    /// Serializes the control message to its wire JSON.
    pub fn to_json(&self) -> String {
        // Unit variants with an internal tag cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// One chunk of caller-supplied audio with its per-connection sequence
/// number.
///
/// The bytes are opaque; the SDK does not inspect or transcode them. The
/// sequence number exists for ordering diagnostics only and is not sent
/// on the wire.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    pub sequence: u64,
}

/// One outbound unit of work for the writer task.
///
/// Frames are immutable once enqueued and drain in strict FIFO order;
/// audio and control never reorder relative to each other.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Audio(AudioChunk),
    /// Typed control message
    Control(ControlMessage),
}

impl OutboundFrame {
    /// Converts the frame into its websocket message representation.
    pub(crate) fn into_message(self) -> Message {
        match self {
            OutboundFrame::Audio(chunk) => Message::Binary(chunk.bytes),
            OutboundFrame::Control(control) => Message::Text(control.to_json()),
        }
    }
}

/// One transcript hypothesis for a channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptAlternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<TranscriptWord>,
}

/// Word-level timing within an alternative.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptWord {
    #[serde(default)]
    pub word: String,
    /// Offset from stream start, in seconds
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptChannel {
    #[serde(default)]
    pub alternatives: Vec<TranscriptAlternative>,
}

/// Payload of a `Results` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptResult {
    #[serde(default)]
    pub channel: TranscriptChannel,
    /// Whether this hypothesis will still be revised by later results
    #[serde(default)]
    pub is_final: bool,
    /// Whether the server considers the current utterance complete
    #[serde(default)]
    pub speech_final: bool,
    /// Segment start offset in seconds
    #[serde(default)]
    pub start: f64,
    /// Segment duration in seconds
    #[serde(default)]
    pub duration: f64,
}

/// Payload of a `Metadata` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataPayload {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub channels: u32,
}

/// Payload of a `SpeechStarted` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeechStartedPayload {
    /// Offset of detected speech onset, in seconds
    #[serde(default)]
    pub timestamp: f64,
}

/// Payload of an `UtteranceEnd` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UtteranceEndPayload {
    /// End time of the last spoken word, in seconds
    #[serde(default)]
    pub last_word_end: f64,
}

/// Payload of a `Warning` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarningPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

/// Payload of an `Error` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub description: String,
}

impl ErrorPayload {
    pub(crate) fn decode_failure(detail: impl std::fmt::Display) -> Self {
        Self {
            code: "DECODE_ERROR".to_string(),
            description: format!("failed to decode inbound frame: {}", detail),
        }
    }
}

/// Typed inbound events delivered to registered listeners.
///
/// `Open` and `Close` are synthesized by the connection manager at the
/// session boundaries; everything else is decoded off the wire.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Connection established and ready for audio
    Open,
    /// Transcript hypothesis (interim or final)
    Result(TranscriptResult),
    /// Session metadata from the server
    Metadata(MetadataPayload),
    /// Server-side voice activity: speech onset detected
    SpeechStarted(SpeechStartedPayload),
    /// Server-side voice activity: utterance boundary detected
    UtteranceEnd(UtteranceEndPayload),
    /// Non-fatal condition reported by the server
    Warning(WarningPayload),
    /// Error reported by the server, or a local decode failure
    Error(ErrorPayload),
    /// Connection is gone; no further events will be delivered
    Close,
    /// Message type this SDK version does not know; raw payload preserved
    Unhandled { event_type: String, raw: String },
}

/// Listener registration categories, one per event kind plus `All`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Open,
    Result,
    Metadata,
    SpeechStarted,
    UtteranceEnd,
    Warning,
    Error,
    Close,
    Unhandled,
    /// Receives every event regardless of kind
    All,
}

impl LiveEvent {
    /// The category this event dispatches under (never `All`).
    pub fn category(&self) -> EventCategory {
        match self {
            LiveEvent::Open => EventCategory::Open,
            LiveEvent::Result(_) => EventCategory::Result,
            LiveEvent::Metadata(_) => EventCategory::Metadata,
            LiveEvent::SpeechStarted(_) => EventCategory::SpeechStarted,
            LiveEvent::UtteranceEnd(_) => EventCategory::UtteranceEnd,
            LiveEvent::Warning(_) => EventCategory::Warning,
            LiveEvent::Error(_) => EventCategory::Error,
            LiveEvent::Close => EventCategory::Close,
            LiveEvent::Unhandled { .. } => EventCategory::Unhandled,
        }
    }
}

/// Decodes one inbound text frame into an event.
///
/// Never fails: malformed frames become `Error` events and unknown
/// discriminators become `Unhandled` passthroughs, so a single bad frame
/// cannot take the connection down.
pub fn decode_event(text: &str) -> LiveEvent {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return LiveEvent::Error(ErrorPayload::decode_failure(e)),
    };

    let event_type = match value.get("type").and_then(|t| t.as_str()) {
        Some(event_type) => event_type.to_string(),
        None => {
            return LiveEvent::Error(ErrorPayload::decode_failure(
                "missing `type` discriminator",
            ))
        }
    };

    match event_type.as_str() {
        "Results" => match serde_json::from_value::<TranscriptResult>(value) {
            Ok(payload) => LiveEvent::Result(payload),
            Err(e) => LiveEvent::Error(ErrorPayload::decode_failure(e)),
        },
        "Metadata" => match serde_json::from_value::<MetadataPayload>(value) {
            Ok(payload) => LiveEvent::Metadata(payload),
            Err(e) => LiveEvent::Error(ErrorPayload::decode_failure(e)),
        },
        "SpeechStarted" => match serde_json::from_value::<SpeechStartedPayload>(value) {
            Ok(payload) => LiveEvent::SpeechStarted(payload),
            Err(e) => LiveEvent::Error(ErrorPayload::decode_failure(e)),
        },
        "UtteranceEnd" => match serde_json::from_value::<UtteranceEndPayload>(value) {
            Ok(payload) => LiveEvent::UtteranceEnd(payload),
            Err(e) => LiveEvent::Error(ErrorPayload::decode_failure(e)),
        },
        "Warning" => match serde_json::from_value::<WarningPayload>(value) {
            Ok(payload) => LiveEvent::Warning(payload),
            Err(e) => LiveEvent::Error(ErrorPayload::decode_failure(e)),
        },
        "Error" => match serde_json::from_value::<ErrorPayload>(value) {
            Ok(payload) => LiveEvent::Error(payload),
            Err(e) => LiveEvent::Error(ErrorPayload::decode_failure(e)),
        },
        _ => LiveEvent::Unhandled {
            event_type,
            raw: text.to_string(),
        },
    }
}
