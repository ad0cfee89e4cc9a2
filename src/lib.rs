//! A reconnecting Server-Sent Events (SSE) client
//!
//! Connects to a `text/event-stream` endpoint, parses the wire grammar, and
//! delivers finalized events through a channel while handling reconnection
//! with exponential backoff, an optional buffered flow-control mode, and a
//! health/lifetime supervision pair that forces a reconnect on a stalled or
//! over-long stream.
//!
//! ```no_run
//! use ag_ui_sse::{SseClient, SseClientConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> ag_ui_sse::SseResult<()> {
//! let config = SseClientConfig::new("https://example.com/events");
//! let client = Arc::new(SseClient::new(config)?);
//! client.connect().await?;
//!
//! while let Some(event) = client.recv().await {
//!     println!("{}: {}", event.name, event.data);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod sse;

pub use config::{Callbacks, EventFilter, SseClientConfig, TlsConfig};
pub use error::{SseError, SseResult};
pub use event::Event;
pub use sse::{ConnectionState, SseClient};
