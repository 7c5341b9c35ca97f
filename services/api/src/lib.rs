//! Callbridge API Library Crate
//!
//! This library contains all the core logic for the callbridge web
//! service: configuration, application state, the REST handlers and
//! routing, the Twilio call-initiation client, and the WebSocket bridge
//! between telephony media streams and the realtime AI service. The
//! `callbridge` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod tools;
pub mod twilio;
pub mod ws;
