//! Event variants flowing through the bridge.
//!
//! `RealtimeEvent` is the closed, tagged view of everything the realtime
//! AI service sends us after translation; `ClientCommand` is everything we
//! send back into it. Both are deliberately independent of the upstream
//! provider's own types so the bridge and observer mirroring stay
//! exhaustive under `match`.

use serde::Serialize;
use serde_json::Value;

/// A translated inbound message from the realtime AI service.
///
/// Immutable once constructed; flows through the bridge and is mirrored
/// verbatim to the observer channel. Event types the bridge does not act
/// on arrive as [`RealtimeEvent::Other`] carrying the wire type tag, so
/// nothing is silently discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A chunk of synthesized speech (base64 audio in the session's output
    /// format), attributed to the assistant item producing it.
    AudioDelta {
        item_id: Option<String>,
        payload: String,
    },
    /// A finalized transcription of the caller's speech.
    TranscriptCompleted { transcript: String },
    /// The model wants a tool executed. `arguments` is the raw JSON string
    /// exactly as produced by the model.
    FunctionCallRequest {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The bridge's reply to a [`RealtimeEvent::FunctionCallRequest`];
    /// synthesized locally, mirrored to observers for visibility.
    FunctionCallResult { call_id: String, output: String },
    /// The service acknowledged a session configuration update.
    SessionUpdated,
    /// The caller started speaking (barge-in signal).
    SpeechStarted,
    /// The service reported an error; fatal to the session.
    Error { message: String },
    /// Any event type the bridge has no handling for.
    Other { kind: String },
}

/// An outbound command into the realtime session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Append a chunk of caller audio (base64, session input format).
    AppendAudio(String),
    /// Deliver the result for a function call so the model can continue.
    FunctionResult { call_id: String, output: String },
    /// Truncate the assistant item currently playing back, in response to
    /// caller barge-in.
    Truncate { item_id: String, audio_end_ms: u32 },
    /// Relay a raw `session.update` payload (observer-initiated).
    UpdateSession(Value),
    /// Flush and close the session. Idempotent.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = RealtimeEvent::TranscriptCompleted {
            transcript: "hello".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "transcript_completed", "transcript": "hello" })
        );
    }

    #[test]
    fn function_call_request_keeps_raw_arguments() {
        let event = RealtimeEvent::FunctionCallRequest {
            call_id: "c1".into(),
            name: "lookupWeather".into(),
            arguments: r#"{"city":"Paris"}"#.into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "function_call_request");
        assert_eq!(value["arguments"], r#"{"city":"Paris"}"#);
    }
}
