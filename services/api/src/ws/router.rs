//! WebSocket upgrade handlers and the single-active-call slot.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use callbridge_core::events::ClientCommand;

use super::bridge;
use super::protocol::ObserverCommand;
use crate::state::AppState;

struct ActiveCall {
    id: Uuid,
    task: JoinHandle<()>,
}

/// Holds the one call the service handles at a time. Binding a new call
/// aborts whatever was there before.
#[derive(Clone, Default)]
pub struct CallSlot {
    inner: Arc<Mutex<Option<ActiveCall>>>,
}

impl CallSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new call, aborting any call that currently owns the slot.
    /// The aborted task is awaited to completion, so the old bridge is
    /// fully gone before the replacement is spawned.
    pub async fn bind<F>(&self, id: Uuid, spawn: F)
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut slot = self.inner.lock().await;
        if let Some(previous) = slot.take() {
            info!(superseded = %previous.id, "New call connection supersedes the active call");
            previous.task.abort();
            let _ = previous.task.await;
        }
        *slot = Some(ActiveCall { id, task: spawn() });
    }

    /// Clears the slot, but only if it still belongs to the given call.
    pub async fn release(&self, id: Uuid) {
        let mut slot = self.inner.lock().await;
        if slot.as_ref().is_some_and(|call| call.id == id) {
            *slot = None;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

/// Upgrade handler for the telephony media-stream connection.
pub async fn call_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let conn_id = Uuid::new_v4();
        let calls = state.calls.clone();
        calls
            .bind(conn_id, || {
                // An aborted bridge never runs its own cleanup, so any
                // control sender it installed is dropped here.
                drop_stale_control(&state);
                tokio::spawn(bridge::run_call(socket, state.clone(), conn_id))
            })
            .await;
    })
}

/// Upgrade handler for the observer connection.
pub async fn logs_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(socket, state))
}

/// Drops whatever control sender the superseded call installed. The new
/// call installs its own once its realtime session is connected.
fn drop_stale_control(state: &AppState) {
    state
        .realtime_control
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take();
}

async fn handle_observer(socket: WebSocket, state: Arc<AppState>) {
    info!("Observer connected");
    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut updates = state.observers.attach();

    let writer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            let text = match serde_json::to_string(&update) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize observer update: {}", e);
                    continue;
                }
            };
            if socket_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = socket_tx.send(Message::Close(None)).await;
    });

    while let Some(Ok(msg)) = socket_rx.next().await {
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<ObserverCommand>(&text) {
            Ok(ObserverCommand::SessionUpdate { session }) => {
                let sender = state
                    .realtime_control
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                match sender {
                    Some(tx) => {
                        if tx.send(ClientCommand::UpdateSession(session)).await.is_err() {
                            warn!("Active call ended before the session update was relayed");
                        }
                    }
                    None => debug!("Observer session update ignored, no active call"),
                }
            }
            Err(_) => debug!("Ignoring unsupported observer message"),
        }
    }

    writer.abort();
    info!("Observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ws::observer::ObserverHub;
    use callbridge_core::tools::ToolRegistry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// Flips a flag when dropped, which also happens on task abort.
    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn binding_a_new_call_aborts_the_previous_one() {
        let slot = CallSlot::new();
        let first_dropped = Arc::new(AtomicBool::new(false));

        let guard = SetOnDrop(first_dropped.clone());
        slot.bind(Uuid::new_v4(), || {
            tokio::spawn(async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            })
        })
        .await;
        assert!(slot.is_active().await);

        // bind waits for the aborted task, so the drop is already visible.
        slot.bind(Uuid::new_v4(), || tokio::spawn(async {})).await;
        assert!(first_dropped.load(Ordering::SeqCst));
    }

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: Arc::new(Config {
                bind_address: "127.0.0.1:3000".parse().unwrap(),
                public_url: None,
                openai_api_key: "test-key".to_string(),
                realtime_model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
                voice: "ash".to_string(),
                twilio: None,
                log_level: tracing::Level::INFO,
            }),
            tools: Arc::new(ToolRegistry::new()),
            observers: ObserverHub::new(),
            calls: CallSlot::new(),
            realtime_control: Arc::new(std::sync::Mutex::new(None)),
            dialer: None,
        })
    }

    #[tokio::test]
    async fn superseding_a_call_drops_the_stale_control_sender() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(1);
        *state.realtime_control.lock().unwrap() = Some(tx);

        // Same sequence the upgrade handler runs when a call connection
        // replaces an active one.
        state
            .calls
            .bind(Uuid::new_v4(), || {
                drop_stale_control(&state);
                tokio::spawn(async {})
            })
            .await;

        assert!(state.realtime_control.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn release_only_clears_the_matching_call() {
        let slot = CallSlot::new();
        let current = Uuid::new_v4();
        slot.bind(current, || tokio::spawn(std::future::pending()))
            .await;

        // A stale release from a superseded call leaves the slot alone.
        slot.release(Uuid::new_v4()).await;
        assert!(slot.is_active().await);

        slot.release(current).await;
        assert!(!slot.is_active().await);
    }
}
