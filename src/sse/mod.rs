//! Server-Sent Events client: connection manager, wire parser, dispatcher,
//! reconnect controller, and background supervisors.

pub mod client;
pub mod dispatch;
pub mod parser;
pub mod reconnect;
pub mod supervisor;

pub use client::{ConnectionState, SseClient};
