//! Gemini Live Client
//!
//! A thin client for the Gemini Live bidirectional streaming API: the wire
//! types and a connector that turns a websocket into a pair of channels.

pub mod client;
pub mod types;

pub use client::{ClientConfig, LiveLink, connect, is_auth_error};
pub use types::{ClientMessage, ServerMessage, TransportEvent};
