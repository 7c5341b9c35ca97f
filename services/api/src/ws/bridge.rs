//! Per-call bridging between the telephony media stream and the realtime
//! session: audio passthrough, barge-in truncation, tool dispatch, and
//! observer mirroring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use callbridge_core::call::CallSession;
use callbridge_core::events::{ClientCommand, RealtimeEvent};
use callbridge_core::tools::ToolRegistry;
use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::state::AppState;
use super::observer::ObserverHub;
use super::protocol::{MediaFrame, ObserverUpdate};
use super::realtime;

/// How long a single tool invocation may run before the model gets an
/// error result instead.
pub(crate) const TOOL_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Where upstream-bound commands go. The production impl is the channel
/// into the realtime session task; tests substitute a recorder.
#[async_trait]
pub(crate) trait RealtimeSink: Send {
    async fn send(&mut self, cmd: ClientCommand) -> Result<()>;
}

#[async_trait]
impl RealtimeSink for mpsc::Sender<ClientCommand> {
    async fn send(&mut self, cmd: ClientCommand) -> Result<()> {
        mpsc::Sender::send(self, cmd)
            .await
            .context("Realtime session task is no longer running")
    }
}

/// State machine for one call. Frames from the telephony peer go through
/// [`MediaBridge::on_frame`]; events from the realtime session go through
/// [`MediaBridge::on_event`], which appends any outgoing telephony frames
/// to the caller's buffer.
pub(crate) struct MediaBridge<S> {
    session: CallSession,
    realtime: S,
    tools: Arc<ToolRegistry>,
    observers: ObserverHub,
    /// Milliseconds into the stream of the newest caller audio frame.
    latest_media_ms: u64,
    last_sequence: Option<u64>,
    /// Stream position when the current assistant response began playing.
    response_start_ms: Option<u64>,
    last_assistant_item: Option<String>,
    marks_sent: u64,
}

impl<S: RealtimeSink> MediaBridge<S> {
    pub(crate) fn new(
        session: CallSession,
        realtime: S,
        tools: Arc<ToolRegistry>,
        observers: ObserverHub,
    ) -> Self {
        Self {
            session,
            realtime,
            tools,
            observers,
            latest_media_ms: 0,
            last_sequence: None,
            response_start_ms: None,
            last_assistant_item: None,
            marks_sent: 0,
        }
    }

    async fn on_frame(&mut self, frame: MediaFrame) -> Result<Flow> {
        self.observers
            .publish(ObserverUpdate::for_frame(self.session.id, &frame));
        match frame {
            MediaFrame::Media {
                sequence_number,
                media,
                ..
            } => {
                if BASE64.decode(&media.payload).is_err() {
                    warn!("Dropping media frame with invalid base64 payload");
                    return Ok(Flow::Continue);
                }
                if let Some(ts) = media.timestamp.as_deref().and_then(|t| t.parse().ok()) {
                    self.latest_media_ms = ts;
                }
                self.track_sequence(sequence_number.as_deref());
                self.realtime
                    .send(ClientCommand::AppendAudio(media.payload))
                    .await?;
                Ok(Flow::Continue)
            }
            MediaFrame::Mark { mark, .. } => {
                debug!(name = %mark.name, "Playback mark acknowledged");
                Ok(Flow::Continue)
            }
            MediaFrame::Stop { .. } => {
                info!("Telephony stream stopped");
                Ok(Flow::Shutdown)
            }
            MediaFrame::Start { stream_sid, .. } => {
                warn!(%stream_sid, "Duplicate start frame on an active stream");
                Ok(Flow::Continue)
            }
            MediaFrame::Connected | MediaFrame::Clear { .. } | MediaFrame::Other => {
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_event(
        &mut self,
        event: RealtimeEvent,
        out: &mut Vec<MediaFrame>,
    ) -> Result<Flow> {
        self.observers.publish(ObserverUpdate::Realtime {
            session_id: self.session.id,
            event: event.clone(),
        });
        match event {
            RealtimeEvent::AudioDelta { item_id, payload } => {
                if self.response_start_ms.is_none() {
                    self.response_start_ms = Some(self.latest_media_ms);
                }
                if let Some(item_id) = item_id {
                    self.last_assistant_item = Some(item_id);
                }
                let stream_sid = self.session.stream_sid.clone();
                out.push(MediaFrame::outgoing_media(&stream_sid, payload));
                self.marks_sent += 1;
                out.push(MediaFrame::outgoing_mark(
                    &stream_sid,
                    format!("chunk-{}", self.marks_sent),
                ));
                Ok(Flow::Continue)
            }
            RealtimeEvent::SpeechStarted => {
                self.handle_barge_in(out).await?;
                Ok(Flow::Continue)
            }
            RealtimeEvent::FunctionCallRequest {
                call_id,
                name,
                arguments,
            } => {
                self.dispatch_tool(call_id, name, arguments).await?;
                Ok(Flow::Continue)
            }
            RealtimeEvent::TranscriptCompleted { transcript } => {
                info!(%transcript, "Caller transcript");
                Ok(Flow::Continue)
            }
            RealtimeEvent::Error { message } => {
                error!(%message, "Realtime session reported an error, ending the call");
                Ok(Flow::Shutdown)
            }
            RealtimeEvent::FunctionCallResult { .. }
            | RealtimeEvent::SessionUpdated
            | RealtimeEvent::Other { .. } => Ok(Flow::Continue),
        }
    }

    /// The caller started speaking over assistant playback. Truncate the
    /// assistant item at the point the caller has actually heard and tell
    /// the telephony peer to flush its playback buffer.
    async fn handle_barge_in(&mut self, out: &mut Vec<MediaFrame>) -> Result<()> {
        let (Some(item_id), Some(start_ms)) =
            (self.last_assistant_item.take(), self.response_start_ms.take())
        else {
            return Ok(());
        };
        let audio_end_ms = self.latest_media_ms.saturating_sub(start_ms);
        debug!(%item_id, audio_end_ms, "Truncating interrupted assistant response");
        self.realtime
            .send(ClientCommand::Truncate {
                item_id,
                audio_end_ms: audio_end_ms.min(u64::from(u32::MAX)) as u32,
            })
            .await?;
        out.push(MediaFrame::outgoing_clear(&self.session.stream_sid));
        Ok(())
    }

    /// Runs one tool call and always reports exactly one result back to
    /// the realtime session, whether the tool succeeded, failed, or
    /// timed out.
    async fn dispatch_tool(
        &mut self,
        call_id: String,
        name: String,
        arguments: String,
    ) -> Result<()> {
        let output = match serde_json::from_str(&arguments) {
            Err(e) => {
                warn!(%name, "Tool arguments are not valid JSON: {}", e);
                error_output("tool arguments were not valid JSON")
            }
            Ok(args) => {
                match tokio::time::timeout(TOOL_DISPATCH_TIMEOUT, self.tools.dispatch(&name, args))
                    .await
                {
                    Ok(Ok(value)) => value.to_string(),
                    Ok(Err(e)) => {
                        warn!(%name, "{}", e);
                        error_output(&e.to_string())
                    }
                    Err(_) => {
                        warn!(%name, "Tool execution timed out");
                        error_output("tool execution timed out")
                    }
                }
            }
        };
        self.observers.publish(ObserverUpdate::Realtime {
            session_id: self.session.id,
            event: RealtimeEvent::FunctionCallResult {
                call_id: call_id.clone(),
                output: output.clone(),
            },
        });
        self.realtime
            .send(ClientCommand::FunctionResult { call_id, output })
            .await
    }

    fn track_sequence(&mut self, sequence_number: Option<&str>) {
        let Some(seq) = sequence_number.and_then(|s| s.parse::<u64>().ok()) else {
            return;
        };
        if let Some(last) = self.last_sequence {
            if seq > last + 1 {
                warn!(
                    expected = last + 1,
                    got = seq,
                    "Gap in media frame sequence numbers"
                );
            }
        }
        self.last_sequence = Some(seq);
    }
}

fn error_output(message: &str) -> String {
    json!({ "error": message }).to_string()
}

/// Runs one call end to end and releases the call slot afterwards.
pub async fn run_call(socket: WebSocket, state: Arc<AppState>, conn_id: Uuid) {
    let span = info_span!("call_bridge", %conn_id, session_id = tracing::field::Empty);
    async {
        let mut installed = None;
        if let Err(e) = drive_call(socket, &state, &span, &mut installed).await {
            error!("Call ended with an error: {:#}", e);
        }
        if let Some(sender) = installed {
            clear_control(&state, &sender);
        }
        state.calls.release(conn_id).await;
    }
    .instrument(span.clone())
    .await
}

async fn drive_call(
    socket: WebSocket,
    state: &Arc<AppState>,
    span: &tracing::Span,
    installed: &mut Option<mpsc::Sender<ClientCommand>>,
) -> Result<()> {
    let (mut socket_tx, mut socket_rx) = socket.split();

    let Some(stream_sid) = await_start(&mut socket_rx).await else {
        info!("Telephony peer disconnected before streaming started");
        return Ok(());
    };
    let session = CallSession::new(stream_sid.clone());
    span.record("session_id", tracing::field::display(session.id));
    info!(%stream_sid, "Telephony stream started");

    let (handle, mut events) = realtime::connect(&state.config, state.tools.schemas()).await?;
    set_control(state, handle.sender());
    *installed = Some(handle.sender());

    let mut bridge = MediaBridge::new(session, handle.sender(), state.tools.clone(), state.observers.clone());
    bridge.session.activate()?;

    let mut out: Vec<MediaFrame> = Vec::new();
    let result = loop {
        out.clear();
        let flow = tokio::select! {
            msg = socket_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<MediaFrame>(&text) {
                    Ok(frame) => bridge.on_frame(frame).await?,
                    Err(e) => {
                        warn!("Dropping unparseable telephony frame: {}", e);
                        Flow::Continue
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Telephony socket closed");
                    Flow::Shutdown
                }
                Some(Ok(_)) => Flow::Continue,
                Some(Err(e)) => {
                    warn!("Telephony socket error: {}", e);
                    Flow::Shutdown
                }
            },
            event = events.recv() => match event {
                Some(event) => bridge.on_event(event, &mut out).await?,
                None => {
                    info!("Realtime session closed");
                    Flow::Shutdown
                }
            },
        };
        for frame in out.drain(..) {
            let text = serde_json::to_string(&frame)?;
            socket_tx.send(Message::Text(text.into())).await?;
        }
        if flow == Flow::Shutdown {
            break Ok(());
        }
    };

    bridge.session.begin_close()?;
    handle.close().await;
    bridge.session.finish_close()?;
    let _ = socket_tx.send(Message::Close(None)).await;
    info!("Call closed");
    result
}

/// Consumes frames until the stream's `start`, returning its stream SID.
/// `None` means the peer went away first.
async fn await_start(socket_rx: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(msg)) = socket_rx.next().await {
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<MediaFrame>(&text) {
            Ok(MediaFrame::Start { stream_sid, .. }) => return Some(stream_sid),
            Ok(MediaFrame::Stop { .. }) => return None,
            Ok(_) => {}
            Err(e) => warn!("Dropping unparseable telephony frame: {}", e),
        }
    }
    None
}

fn set_control(state: &AppState, sender: mpsc::Sender<ClientCommand>) {
    let mut slot = state
        .realtime_control
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    *slot = Some(sender);
}

/// Clears the observer control sender, unless a newer call has already
/// installed its own.
fn clear_control(state: &AppState, sender: &mpsc::Sender<ClientCommand>) {
    let mut slot = state
        .realtime_control
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if slot.as_ref().is_some_and(|s| s.same_channel(sender)) {
        *slot = None;
    }
}
