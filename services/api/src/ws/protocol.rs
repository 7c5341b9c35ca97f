//! Wire formats for the two local WebSocket surfaces: the telephony
//! media-stream frames (Twilio Media Streams shapes) and the messages
//! exchanged with the observer connection.

use callbridge_core::events::RealtimeEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One discrete telephony media-stream message.
///
/// Inbound frames are produced by the telephony peer; `media`, `mark` and
/// `clear` are also serialized outbound for audio playback and flow
/// signaling. Unknown event types deserialize to [`MediaFrame::Other`] so
/// a protocol addition on the telephony side never kills a call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaFrame {
    /// Connectivity preamble sent once per stream, before `start`.
    Connected,
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },
    Media {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(
            rename = "sequenceNumber",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sequence_number: Option<String>,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        mark: MarkMeta,
    },
    Stop {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
    },
    /// Outbound only: discard any buffered playback audio (barge-in).
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    pub account_sid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    /// Milliseconds since stream start, as a decimal string on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Base64 audio in the stream's codec (g711_ulaw).
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkMeta {
    pub name: String,
}

impl MediaFrame {
    /// Outbound playback frame carrying one chunk of assistant audio.
    pub fn outgoing_media(stream_sid: &str, payload: String) -> Self {
        MediaFrame::Media {
            stream_sid: Some(stream_sid.to_string()),
            sequence_number: None,
            media: MediaPayload {
                track: None,
                chunk: None,
                timestamp: None,
                payload,
            },
        }
    }

    /// Outbound mark paired with a playback frame, echoed back by the
    /// telephony peer once the audio has been played.
    pub fn outgoing_mark(stream_sid: &str, name: String) -> Self {
        MediaFrame::Mark {
            stream_sid: Some(stream_sid.to_string()),
            mark: MarkMeta { name },
        }
    }

    pub fn outgoing_clear(stream_sid: &str) -> Self {
        MediaFrame::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

/// One message pushed to the observer connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObserverUpdate {
    /// A full copy of a translated realtime event.
    Realtime {
        session_id: Uuid,
        event: RealtimeEvent,
    },
    /// Metadata summary of a telephony frame; audio payloads are not
    /// mirrored.
    Media {
        session_id: Uuid,
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<String>,
    },
}

impl ObserverUpdate {
    /// Summarizes a telephony frame for mirroring.
    pub fn for_frame(session_id: Uuid, frame: &MediaFrame) -> Self {
        let (event, stream_sid, sequence) = match frame {
            MediaFrame::Connected => ("connected", None, None),
            MediaFrame::Start { start, .. } => ("start", Some(start.stream_sid.clone()), None),
            MediaFrame::Media {
                stream_sid,
                sequence_number,
                ..
            } => ("media", stream_sid.clone(), sequence_number.clone()),
            MediaFrame::Mark { stream_sid, .. } => ("mark", stream_sid.clone(), None),
            MediaFrame::Stop { stream_sid } => ("stop", stream_sid.clone(), None),
            MediaFrame::Clear { stream_sid } => ("clear", Some(stream_sid.clone()), None),
            MediaFrame::Other => ("other", None, None),
        };
        ObserverUpdate::Media {
            session_id,
            event: event.to_string(),
            stream_sid,
            sequence,
        }
    }
}

/// The one control message the observer connection may send: a raw
/// session configuration to relay into the active realtime session.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ObserverCommand {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },
}
