//! Client configuration
//!
//! Plain struct with `Default` plus hand-written `with_*` builder methods and
//! a `validate()` step — no generic config-templating crate, since the SSE
//! client's configuration surface is small and fixed.

use crate::error::{SseError, SseResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Predicate over an event name; `false` drops the event silently
pub type EventFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A consumer-supplied no-argument callback, dispatched off the data path
pub type VoidCallback = Arc<dyn Fn() + Send + Sync>;

/// A consumer-supplied callback taking a displayable error
pub type ErrorCallback = Arc<dyn Fn(&SseError) + Send + Sync>;

/// A consumer-supplied callback taking the reconnect attempt number
pub type ReconnectCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Extra certificate/identity material for the underlying HTTP client
///
/// Layered onto `reqwest::ClientBuilder` alongside (not instead of)
/// `skip_tls_verify`: a root certificate can be added while verification
/// stays on, for endpoints behind a private or self-signed CA.
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// PEM-encoded root certificates to trust in addition to the platform's
    /// default store
    pub root_certificates_pem: Vec<Vec<u8>>,
    /// PEM-encoded client certificate + private key, for mutual TLS
    pub client_identity_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("root_certificates_pem", &self.root_certificates_pem.len())
            .field("client_identity_pem", &self.client_identity_pem.is_some())
            .finish()
    }
}

/// Consumer-supplied callbacks, invoked only off the data path
///
/// Modeled as a capability record rather than a trait object per callback
/// family, so construction stays ergonomic (`Callbacks::default()` plus
/// individual `.on_connect(...)` setters).
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_connect: Option<VoidCallback>,
    pub on_disconnect: Option<ErrorCallback>,
    pub on_reconnect: Option<ReconnectCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Configuration accepted by [`crate::SseClient::new`]
#[derive(Clone)]
pub struct SseClientConfig {
    /// SSE endpoint; must be `http` or `https`
    pub url: String,

    /// Extra request headers, merged after the fixed SSE headers
    pub headers: HashMap<String, String>,

    /// Starting reconnect delay
    pub initial_backoff: Duration,

    /// Upper cap for reconnect delay
    pub max_backoff: Duration,

    /// Exponential factor applied per attempt
    pub backoff_multiplier: f64,

    /// Stop reconnecting after N attempts (0 = unlimited)
    pub max_reconnect_attempts: u32,

    /// High-watermark for the internal buffer; also consumer-channel capacity
    pub event_buffer_size: usize,

    /// Per-read timeout (advisory, passed to the HTTP client)
    pub read_timeout: Duration,

    /// Reserved for request emission
    pub write_timeout: Duration,

    /// Watchdog tick interval; inactivity > 2x this triggers disconnect
    pub health_check_interval: Duration,

    /// Hard per-connection lifetime cap
    pub max_stream_lifetime: Duration,

    /// Resume marker sent as `Last-Event-ID` on the first request
    pub last_event_id: String,

    /// Overridden by server `retry:` hints once one is seen
    pub retry_interval: Duration,

    /// Disables certificate verification (insecure; for local testing only)
    pub skip_tls_verify: bool,

    /// Extra TLS trust/identity material layered onto the default verifier
    pub tls_config: Option<TlsConfig>,

    /// Sent as the `User-Agent` header
    pub user_agent: String,

    /// Sends `Accept-Encoding: gzip` when true
    pub enable_compression: bool,

    /// Predicate over event name; `false` drops silently
    pub event_filter: Option<EventFilter>,

    /// Engages buffered mode: an internal bounded buffer with backpressure
    /// signaling and oldest-drop eviction, instead of a plain non-blocking
    /// send against the consumer channel
    pub flow_control_enabled: bool,

    /// Fraction of `event_buffer_size` that raises backpressure
    pub flow_control_threshold: f64,

    /// Consumer-supplied callbacks
    pub callbacks: Callbacks,
}

impl Default for SseClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: HashMap::new(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_reconnect_attempts: 0,
            event_buffer_size: 1000,
            read_timeout: Duration::from_secs(0),
            write_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            max_stream_lifetime: Duration::from_secs(30 * 60),
            last_event_id: String::new(),
            retry_interval: Duration::from_secs(0),
            skip_tls_verify: false,
            tls_config: None,
            user_agent: "ag-ui-go-sdk-sse/1.0.0".to_string(),
            enable_compression: false,
            event_filter: None,
            flow_control_enabled: false,
            flow_control_threshold: 0.8,
            callbacks: Callbacks::default(),
        }
    }
}

impl SseClientConfig {
    /// Start from defaults with a required URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_initial_backoff(mut self, d: Duration) -> Self {
        self.initial_backoff = d;
        self
    }

    pub fn with_max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    pub fn with_backoff_multiplier(mut self, m: f64) -> Self {
        self.backoff_multiplier = m;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    pub fn with_event_buffer_size(mut self, n: usize) -> Self {
        self.event_buffer_size = n;
        self
    }

    pub fn with_health_check_interval(mut self, d: Duration) -> Self {
        self.health_check_interval = d;
        self
    }

    pub fn with_max_stream_lifetime(mut self, d: Duration) -> Self {
        self.max_stream_lifetime = d;
        self
    }

    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = id.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    pub fn with_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control_enabled = enabled;
        self
    }

    pub fn with_flow_control_threshold(mut self, threshold: f64) -> Self {
        self.flow_control_threshold = threshold;
        self
    }

    pub fn with_event_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.event_filter = Some(Arc::new(f));
        self
    }

    pub fn with_tls_config(mut self, tls_config: TlsConfig) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    pub fn with_callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Validate configuration, filling in no further defaults
    ///
    /// Plain range/shape checks, returning the first violation found as a
    /// typed [`SseError::Validation`].
    pub fn validate(&self) -> SseResult<()> {
        if self.url.is_empty() {
            return Err(SseError::validation("url must not be empty"));
        }

        let parsed = Url::parse(&self.url)
            .map_err(|e| SseError::validation(format!("invalid url: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SseError::validation(format!(
                    "unsupported url scheme: {other} (must be http or https)"
                )))
            }
        }

        if self.event_buffer_size == 0 {
            return Err(SseError::validation("event_buffer_size must be > 0"));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(SseError::validation("backoff_multiplier must be >= 1.0"));
        }

        if !(0.0..=1.0).contains(&self.flow_control_threshold) {
            return Err(SseError::validation(
                "flow_control_threshold must be in [0.0, 1.0]",
            ));
        }

        if self.health_check_interval.is_zero() {
            return Err(SseError::validation(
                "health_check_interval must be > 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface_table() {
        let cfg = SseClientConfig::new("https://example.com/events");
        assert_eq!(cfg.initial_backoff, Duration::from_secs(1));
        assert_eq!(cfg.max_backoff, Duration::from_secs(30));
        assert_eq!(cfg.backoff_multiplier, 2.0);
        assert_eq!(cfg.max_reconnect_attempts, 0);
        assert_eq!(cfg.event_buffer_size, 1000);
        assert_eq!(cfg.health_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.max_stream_lifetime, Duration::from_secs(1800));
        assert_eq!(cfg.user_agent, "ag-ui-go-sdk-sse/1.0.0");
        assert_eq!(cfg.flow_control_threshold, 0.8);
        assert!(!cfg.flow_control_enabled);
    }

    #[test]
    fn rejects_empty_url() {
        let cfg = SseClientConfig::new("");
        assert!(matches!(cfg.validate(), Err(SseError::Validation { .. })));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let cfg = SseClientConfig::new("ftp://example.com");
        assert!(matches!(cfg.validate(), Err(SseError::Validation { .. })));
    }

    #[test]
    fn rejects_zero_buffer_size() {
        let cfg = SseClientConfig::new("http://example.com").with_event_buffer_size(0);
        assert!(matches!(cfg.validate(), Err(SseError::Validation { .. })));
    }

    #[test]
    fn accepts_a_well_formed_config() {
        let cfg = SseClientConfig::new("http://example.com/stream")
            .with_initial_backoff(Duration::from_millis(100))
            .with_max_reconnect_attempts(5);
        assert!(cfg.validate().is_ok());
    }
}
