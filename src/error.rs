//! Error types for the SSE client
//!
//! Covers the full taxonomy the client can surface: configuration rejection,
//! state-machine misuse, transport/protocol failures, and the two
//! supervisor-raised fatal conditions (lifetime cap, health watchdog).

use thiserror::Error;

/// Result type for SSE client operations
pub type SseResult<T> = Result<T, SseError>;

/// Errors produced by the SSE client
///
/// Field-level parse errors (a malformed `retry:` line, for example) are
/// non-fatal and are only ever reported through the `on_error` callback —
/// they never appear as an `Err` returned from a public method. Everything
/// in this enum is either a construction-time rejection or a fatal
/// connection-ending condition.
#[derive(Error, Debug, Clone)]
pub enum SseError {
    /// Configuration was rejected at construction time
    #[error("invalid configuration: {message}")]
    Validation {
        /// What was wrong with the configuration
        message: String,
    },

    /// An operation was attempted that the state machine forbids
    ///
    /// E.g. calling `connect()` after `close()`.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is rejected
        message: String,
    },

    /// The underlying HTTP round-trip failed (DNS, TCP, TLS)
    #[error("transport error: {message}")]
    Transport {
        /// Underlying transport failure description
        message: String,
    },

    /// The response was not a well-formed SSE stream
    ///
    /// Bad status code, wrong `Content-Type`, or (for a single field) a
    /// malformed `retry:` value.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation
        message: String,
    },

    /// The stream lifetime monitor forced a disconnect
    #[error("stream lifetime exceeded ({elapsed_secs}s, cap {cap_secs}s)")]
    Lifetime {
        /// How long the connection had been open
        elapsed_secs: u64,
        /// The configured `max_stream_lifetime`
        cap_secs: u64,
    },

    /// The health watchdog observed no activity for too long
    #[error("no activity for {idle_secs}s (cap {cap_secs}s)")]
    Health {
        /// Seconds since the last observed activity
        idle_secs: u64,
        /// The threshold that was exceeded (2x the health-check interval)
        cap_secs: u64,
    },

    /// `close()` was called more than once
    #[error("client is already closed")]
    AlreadyClosed,
}

impl SseError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}
