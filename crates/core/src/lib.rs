//! Domain types for the callbridge relay.
//!
//! This crate holds the runtime-agnostic building blocks of the bridge:
//! the call session lifecycle, the event variants flowing between the
//! telephony side and the realtime AI service, and the tool registry the
//! model dispatches function calls against. Everything network-facing
//! lives in the `callbridge-api` service crate.

pub mod call;
pub mod events;
pub mod tools;
