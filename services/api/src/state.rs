//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: configuration, the tool registry, the observer
//! hub, and the single-active-call slot.

use crate::{config::Config, twilio::CallInitiator, ws::observer::ObserverHub, ws::router::CallSlot};
use callbridge_core::{events::ClientCommand, tools::ToolRegistry};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tools: Arc<ToolRegistry>,
    pub observers: ObserverHub,
    pub calls: CallSlot,
    /// Command sender into the live realtime session, if a call is active.
    /// Set by the bridge once its realtime client is connected; used by the
    /// observer connection to relay `session.update` control messages.
    pub realtime_control: Arc<Mutex<Option<mpsc::Sender<ClientCommand>>>>,
    /// Outbound call initiation, absent when Twilio credentials are not
    /// configured.
    pub dialer: Option<Arc<dyn CallInitiator>>,
}
