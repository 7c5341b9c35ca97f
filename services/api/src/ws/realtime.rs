//! Upstream connection to the OpenAI Realtime API.
//!
//! [`connect`] opens the provider WebSocket, configures the session, and
//! spawns a task that owns the socket. The rest of the service talks to
//! that task through typed channels: [`callbridge_core::events::ClientCommand`]
//! going up, [`callbridge_core::events::RealtimeEvent`] coming back down.

use anyhow::{Context, Result};
use async_openai::types::realtime::{
    self as oai_realtime, AudioFormat, ClientEvent as OAIClientEvent,
    ConversationItemCreateEvent, ConversationItemTruncateEvent, InputAudioBufferAppendEvent,
    Item, ItemType, RealtimeVoice, ResponseCreateEvent, ServerEvent as OAIServerEvent,
    SessionUpdateEvent,
};
use callbridge_core::events::{ClientCommand, RealtimeEvent};
use callbridge_core::tools::ToolSchema;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

use crate::config::Config;

const COMMAND_QUEUE_DEPTH: usize = 128;
const EVENT_QUEUE_DEPTH: usize = 128;

type UpstreamSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Handle to a live provider session.
pub struct RealtimeHandle {
    tx: mpsc::Sender<ClientCommand>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    pub fn sender(&self) -> mpsc::Sender<ClientCommand> {
        self.tx.clone()
    }

    pub async fn send(&self, cmd: ClientCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .context("Realtime session task is no longer running")
    }

    /// Asks the session task to close the upstream socket and waits for
    /// it to finish. Safe to call even if the task already exited.
    pub async fn close(self) {
        let _ = self.tx.send(ClientCommand::Close).await;
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("Realtime session task panicked: {}", e);
            }
        }
    }
}

/// Connects to the OpenAI Realtime API and configures the session.
///
/// The session.update carrying audio formats, turn detection, and tool
/// schemas is sent before this function returns, so callers may forward
/// audio immediately.
pub async fn connect(
    config: &Config,
    tools: Vec<ToolSchema>,
) -> Result<(RealtimeHandle, mpsc::Receiver<RealtimeEvent>)> {
    let url = format!(
        "wss://api.openai.com/v1/realtime?model={}",
        config.realtime_model
    );
    connect_to(&url, config, tools).await
}

pub(crate) async fn connect_to(
    url: &str,
    config: &Config,
    tools: Vec<ToolSchema>,
) -> Result<(RealtimeHandle, mpsc::Receiver<RealtimeEvent>)> {
    let mut request = url.into_client_request()?;
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", config.openai_api_key).parse()?);
    request
        .headers_mut()
        .insert("OpenAI-Beta", "realtime=v1".parse()?);

    let (ws_stream, _) = connect_async(request)
        .await
        .context("Failed to connect to OpenAI Realtime WebSocket")?;
    let (mut upstream_tx, mut upstream_rx) = ws_stream.split();
    info!(model = %config.realtime_model, "Connected to OpenAI Realtime API");

    let session_config = session_update(config, &tools)?;
    upstream_tx
        .send(WsMessage::text(session_config.to_string()))
        .await
        .context("Failed to send session configuration")?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<ClientCommand>(COMMAND_QUEUE_DEPTH);
    let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(EVENT_QUEUE_DEPTH);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    let closing = matches!(cmd, ClientCommand::Close);
                    if let Err(e) = forward_command(&mut upstream_tx, cmd).await {
                        warn!("Failed to forward command upstream: {:#}", e);
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                msg = upstream_rx.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            if let Some(event) = translate_server_event(&text) {
                                if event_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Upstream realtime socket closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Upstream realtime socket error: {}", e);
                            break;
                        }
                    }
                }
            }
        }
        let _ = upstream_tx.send(WsMessage::Close(None)).await;
    });

    Ok((RealtimeHandle { tx: cmd_tx, task }, event_rx))
}

/// Builds the session.update payload: telephony audio codec on both
/// directions, server-side voice activity detection, input transcription,
/// and the registered tool schemas.
fn session_update(config: &Config, tools: &[ToolSchema]) -> Result<Value> {
    let voice: Option<RealtimeVoice> =
        match serde_json::from_value(Value::String(config.voice.clone())) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(voice = %config.voice, "Unknown realtime voice, using the provider default");
                None
            }
        };

    let session = oai_realtime::SessionResource {
        model: Some(config.realtime_model.clone()),
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        voice,
        input_audio_format: Some(AudioFormat::G711ULAW),
        output_audio_format: Some(AudioFormat::G711ULAW),
        input_audio_transcription: Some(oai_realtime::AudioTranscription {
            model: Some("whisper-1".to_string()),
            ..Default::default()
        }),
        turn_detection: Some(oai_realtime::TurnDetection::ServerVAD {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            interrupt_response: Some(true),
            create_response: Some(true),
        }),
        ..Default::default()
    };

    let event = OAIClientEvent::SessionUpdate(SessionUpdateEvent {
        session,
        event_id: None,
    });
    let mut value = serde_json::to_value(&event)?;
    if !tools.is_empty() {
        value["session"]["tools"] = serde_json::to_value(tools)?;
    }
    Ok(value)
}

async fn forward_command(sink: &mut UpstreamSink, cmd: ClientCommand) -> Result<()> {
    let payload = match cmd {
        ClientCommand::AppendAudio(audio) => {
            let event = OAIClientEvent::InputAudioBufferAppend(InputAudioBufferAppendEvent {
                audio,
                event_id: None,
            });
            serde_json::to_string(&event)?
        }
        ClientCommand::FunctionResult { call_id, output } => {
            let item = Item {
                r#type: Some(ItemType::FunctionCallOutput),
                call_id: Some(call_id),
                output: Some(output),
                id: None,
                status: None,
                role: None,
                content: None,
                name: None,
                arguments: None,
            };
            let create = OAIClientEvent::ConversationItemCreate(ConversationItemCreateEvent {
                item,
                event_id: None,
                previous_item_id: None,
            });
            sink.send(WsMessage::text(serde_json::to_string(&create)?))
                .await?;
            let respond = OAIClientEvent::ResponseCreate(ResponseCreateEvent {
                response: None,
                event_id: None,
            });
            serde_json::to_string(&respond)?
        }
        ClientCommand::Truncate {
            item_id,
            audio_end_ms,
        } => {
            let event = OAIClientEvent::ConversationItemTruncate(ConversationItemTruncateEvent {
                item_id,
                content_index: 0,
                audio_end_ms,
                event_id: None,
            });
            serde_json::to_string(&event)?
        }
        ClientCommand::UpdateSession(session) => {
            json!({ "type": "session.update", "session": session }).to_string()
        }
        ClientCommand::Close => return Ok(()),
    };
    sink.send(WsMessage::text(payload)).await?;
    Ok(())
}

/// Translates one raw provider message into the service's event type.
/// Events the service does not act on come back as [`RealtimeEvent::Other`]
/// so observers still see them; unparseable input returns `None`.
pub(crate) fn translate_server_event(raw: &str) -> Option<RealtimeEvent> {
    match serde_json::from_str::<OAIServerEvent>(raw) {
        Ok(OAIServerEvent::ResponseAudioDelta(e)) => Some(RealtimeEvent::AudioDelta {
            item_id: Some(e.item_id),
            payload: e.delta,
        }),
        Ok(OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e)) => {
            Some(RealtimeEvent::TranscriptCompleted {
                transcript: e.transcript,
            })
        }
        Ok(OAIServerEvent::ResponseOutputItemDone(e)) => Some(function_call_request(e.item)),
        Ok(OAIServerEvent::InputAudioBufferSpeechStarted(_)) => Some(RealtimeEvent::SpeechStarted),
        Ok(OAIServerEvent::SessionUpdated(_)) => Some(RealtimeEvent::SessionUpdated),
        Ok(OAIServerEvent::Error(e)) => Some(RealtimeEvent::Error {
            message: e.error.message,
        }),
        Ok(_) => Some(RealtimeEvent::Other {
            kind: event_kind(raw),
        }),
        Err(e) => {
            // The typed enum does not cover every event the provider can
            // send; keep unknown-but-valid JSON visible to observers.
            match serde_json::from_str::<Value>(raw) {
                Ok(_) => Some(RealtimeEvent::Other {
                    kind: event_kind(raw),
                }),
                Err(_) => {
                    warn!("Dropping unparseable realtime message: {}", e);
                    None
                }
            }
        }
    }
}

/// A completed response output item is only interesting when it is a
/// finished function call.
fn function_call_request(item: Item) -> RealtimeEvent {
    if !matches!(item.r#type, Some(ItemType::FunctionCall)) {
        return RealtimeEvent::Other {
            kind: "response.output_item.done".to_string(),
        };
    }
    match (item.call_id, item.name, item.arguments) {
        (Some(call_id), Some(name), Some(arguments)) => {
            debug!(%name, %call_id, "Provider requested a function call");
            RealtimeEvent::FunctionCallRequest {
                call_id,
                name,
                arguments,
            }
        }
        _ => {
            warn!("Function call item is missing call_id, name, or arguments");
            RealtimeEvent::Other {
                kind: "response.output_item.done".to_string(),
            }
        }
    }
}

fn event_kind(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_audio_deltas() {
        let raw = r#"{
            "type": "response.audio.delta",
            "event_id": "ev_1",
            "response_id": "resp_1",
            "item_id": "item_1",
            "output_index": 0,
            "content_index": 0,
            "delta": "QUJD"
        }"#;
        match translate_server_event(raw) {
            Some(RealtimeEvent::AudioDelta { item_id, payload }) => {
                assert_eq!(item_id.as_deref(), Some("item_1"));
                assert_eq!(payload, "QUJD");
            }
            other => panic!("expected an audio delta, got {other:?}"),
        }
    }

    #[test]
    fn translates_completed_transcripts() {
        let raw = r#"{
            "type": "conversation.item.input_audio_transcription.completed",
            "event_id": "ev_2",
            "item_id": "item_2",
            "content_index": 0,
            "transcript": "what is the weather"
        }"#;
        match translate_server_event(raw) {
            Some(RealtimeEvent::TranscriptCompleted { transcript }) => {
                assert_eq!(transcript, "what is the weather");
            }
            other => panic!("expected a transcript, got {other:?}"),
        }
    }

    #[test]
    fn translates_finished_function_calls() {
        let raw = r#"{
            "type": "response.output_item.done",
            "event_id": "ev_3",
            "response_id": "resp_1",
            "output_index": 0,
            "item": {
                "id": "item_3",
                "type": "function_call",
                "status": "completed",
                "call_id": "c1",
                "name": "get_weather_from_coords",
                "arguments": "{\"latitude\":40.7,\"longitude\":-74.0}"
            }
        }"#;
        match translate_server_event(raw) {
            Some(RealtimeEvent::FunctionCallRequest {
                call_id,
                name,
                arguments,
            }) => {
                assert_eq!(call_id, "c1");
                assert_eq!(name, "get_weather_from_coords");
                assert!(arguments.contains("latitude"));
            }
            other => panic!("expected a function call request, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_types_are_preserved_for_observers() {
        let raw = r#"{"type":"rate_limits.updated","event_id":"ev_4","rate_limits":[]}"#;
        match translate_server_event(raw) {
            Some(RealtimeEvent::Other { kind }) => assert_eq!(kind, "rate_limits.updated"),
            other => panic!("expected a passthrough event, got {other:?}"),
        }
    }

    #[test]
    fn garbage_input_is_dropped() {
        assert!(translate_server_event("not json at all").is_none());
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:3000".parse().unwrap(),
            public_url: None,
            openai_api_key: "test-key".to_string(),
            realtime_model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: "ash".to_string(),
            twilio: None,
            log_level: tracing::Level::INFO,
        }
    }

    #[tokio::test]
    async fn configuration_precedes_any_audio_append() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (msg_tx, mut msg_rx) = mpsc::channel::<Value>(8);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut server = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = server.next().await {
                if let WsMessage::Text(text) = msg {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if msg_tx.send(value).await.is_err() {
                        break;
                    }
                }
            }
        });

        let config = test_config();
        let (handle, _events) = connect_to(&format!("ws://{addr}"), &config, Vec::new())
            .await
            .unwrap();
        handle
            .send(ClientCommand::AppendAudio("QUJD".to_string()))
            .await
            .unwrap();

        let first = msg_rx.recv().await.unwrap();
        assert_eq!(first["type"], "session.update");
        assert_eq!(first["session"]["input_audio_format"], "g711_ulaw");

        let second = msg_rx.recv().await.unwrap();
        assert_eq!(second["type"], "input_audio_buffer.append");
        assert_eq!(second["audio"], "QUJD");

        handle.close().await;
    }

    #[test]
    fn session_update_carries_codec_and_tools() {
        let config = test_config();
        let tools = vec![ToolSchema::function(
            "get_weather_from_coords",
            "Current temperature for a coordinate pair.",
            serde_json::json!({ "type": "object", "properties": {} }),
        )];
        let value = session_update(&config, &tools).unwrap();
        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["input_audio_format"], "g711_ulaw");
        assert_eq!(value["session"]["output_audio_format"], "g711_ulaw");
        assert_eq!(
            value["session"]["tools"][0]["name"],
            "get_weather_from_coords"
        );
    }
}
