//! WebSocket Handling
//!
//! The two local WebSocket surfaces and the upstream realtime connection:
//! - `protocol`: wire formats for telephony frames and observer messages.
//! - `router`: upgrade handlers and the single-active-call slot.
//! - `observer`: fan-out to the attached observer connection.
//! - `bridge`: per-call state machine tying the pieces together.
//! - `realtime`: the upstream OpenAI Realtime API connection.

pub mod bridge;
pub mod observer;
pub mod protocol;
pub mod realtime;
pub mod router;

pub use router::{call_ws_handler, logs_ws_handler};
