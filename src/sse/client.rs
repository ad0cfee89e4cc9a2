//! Connection manager (component A)
//!
//! Owns the HTTP round-trip and the state machine; delegates wire parsing to
//! [`super::parser`], event routing to [`super::dispatch`], backoff timing to
//! [`super::reconnect`], and the background watchdogs to [`super::supervisor`].

use crate::config::SseClientConfig;
use crate::error::{SseError, SseResult};
use crate::event::Event;
use crate::sse::dispatch::Dispatcher;
use crate::sse::reconnect::ReconnectController;
use crate::sse::supervisor::{self, ReadLoopContext, SupervisorFault};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle state of an [`SseClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

struct ActiveConnection {
    read_handle: JoinHandle<()>,
    watchdog_handle: JoinHandle<()>,
    lifetime_handle: JoinHandle<()>,
    attempt_shutdown: Arc<AtomicBool>,
    faults_rx: mpsc::Receiver<SupervisorFault>,
}

impl Drop for ActiveConnection {
    /// Aborting a `JoinHandle` only detaches it, it does not cancel the
    /// task; without this, aborting the control loop mid-attempt (e.g. from
    /// `close()`) would leak the read/watchdog/lifetime tasks.
    fn drop(&mut self) {
        self.attempt_shutdown.store(true, Ordering::Relaxed);
        self.read_handle.abort();
        self.watchdog_handle.abort();
        self.lifetime_handle.abort();
    }
}

/// A Server-Sent Events client with automatic reconnection and backoff
///
/// Construct with [`SseClient::new`], call [`SseClient::connect`] once to
/// start the background connection loop, then pull events with
/// [`SseClient::recv`] until [`SseClient::close`].
pub struct SseClient {
    config: SseClientConfig,
    http: reqwest::Client,

    state: Arc<RwLock<ConnectionState>>,
    last_activity: Arc<RwLock<Instant>>,
    last_event_id: Arc<RwLock<String>>,
    sequence: Arc<AtomicU64>,
    reconnect_count: Arc<AtomicU32>,
    pending_retry_hint: Arc<Mutex<Option<Duration>>>,

    dispatcher: Arc<Dispatcher>,
    backpressure: Arc<AtomicBool>,

    shutdown: Arc<AtomicBool>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    control_handle: Mutex<Option<JoinHandle<()>>>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SseClient {
    /// Validate `config` and build a client, but do not connect yet
    pub fn new(config: SseClientConfig) -> SseResult<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.write_timeout);

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(tls) = &config.tls_config {
            for pem in &tls.root_certificates_pem {
                let cert = reqwest::Certificate::from_pem(pem).map_err(|e| {
                    SseError::validation(format!("invalid root certificate pem: {e}"))
                })?;
                builder = builder.add_root_certificate(cert);
            }
            if let Some(pem) = &tls.client_identity_pem {
                let identity = reqwest::Identity::from_pem(pem).map_err(|e| {
                    SseError::validation(format!("invalid client identity pem: {e}"))
                })?;
                builder = builder.identity(identity);
            }
        }

        let http = builder
            .build()
            .map_err(|e| SseError::transport(format!("failed to build http client: {e}")))?;

        let (tx, rx) = mpsc::channel(config.event_buffer_size);
        let backpressure = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::new(Dispatcher::new(
            tx,
            config.event_filter.clone(),
            config.flow_control_enabled,
            config.event_buffer_size,
            config.flow_control_threshold,
            Arc::clone(&backpressure),
        ));

        Ok(Self {
            last_event_id: Arc::new(RwLock::new(config.last_event_id.clone())),
            config,
            http,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            last_activity: Arc::new(RwLock::new(Instant::now())),
            sequence: Arc::new(AtomicU64::new(0)),
            reconnect_count: Arc::new(AtomicU32::new(0)),
            pending_retry_hint: Arc::new(Mutex::new(None)),
            dispatcher,
            backpressure,
            shutdown: Arc::new(AtomicBool::new(false)),
            receiver: tokio::sync::Mutex::new(rx),
            control_handle: Mutex::new(None),
            flush_handle: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn last_event_id(&self) -> String {
        self.last_event_id.read().clone()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    pub fn buffer_length(&self) -> usize {
        self.dispatcher.buffer_len()
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.dispatcher.is_backpressure_active()
    }

    /// Receive the next dispatched event, or `None` once the client is
    /// closed and its buffer is drained
    pub async fn recv(&self) -> Option<Event> {
        self.receiver.lock().await.recv().await
    }

    /// Perform the first connection attempt and start the background
    /// reconnect loop
    ///
    /// Blocks until the first attempt succeeds or fails and returns that
    /// outcome synchronously. All subsequent reconnect attempts run in the
    /// background; their errors are only ever delivered through `on_error`/
    /// `on_disconnect`. Calling this twice, or after [`SseClient::close`],
    /// is an [`SseError::InvalidState`].
    pub async fn connect(self: &Arc<Self>) -> SseResult<()> {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return Err(SseError::invalid_state("client is closed"));
            }
            if *state != ConnectionState::Disconnected {
                return Err(SseError::invalid_state("connect() already called"));
            }
            *state = ConnectionState::Connecting;
        }

        let (first_attempt_tx, first_attempt_rx) = tokio::sync::oneshot::channel();

        let client = Arc::clone(self);
        let handle =
            tokio::spawn(async move { client.run_control_loop(Some(first_attempt_tx)).await });
        *self.control_handle.lock() = Some(handle);

        // `sender_clone()` is `None` only if `close()` has already torn the
        // dispatcher down (a concurrent close racing this connect() call);
        // in that case there is nothing left to flush into, so just skip
        // spawning the pump rather than panicking on an unwrap.
        if let Some(sender) = self.dispatcher.sender_clone() {
            let flush = supervisor::spawn_flush_pump(
                Arc::clone(&self.dispatcher.buffer),
                Arc::clone(&self.backpressure),
                sender,
                Arc::clone(&self.shutdown),
            );
            *self.flush_handle.lock() = Some(flush);
        }

        first_attempt_rx.await.unwrap_or_else(|_| {
            Err(SseError::transport(
                "control loop exited before the first connection attempt completed",
            ))
        })
    }

    /// Stop reconnecting, tear down the active connection, and mark the
    /// client closed
    pub fn close(&self) -> SseResult<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Err(SseError::AlreadyClosed);
        }

        *self.state.write() = ConnectionState::Closed;

        if let Some(handle) = self.control_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.flush_handle.lock().take() {
            handle.abort();
        }

        // Drop this struct's own sender clone. Combined with the aborted
        // tasks above dropping theirs, this brings the sender count to zero
        // so `recv()` resolves to `None` shortly after, instead of hanging
        // forever waiting on a channel nothing will ever send on again.
        self.dispatcher.shutdown();

        Ok(())
    }

    async fn run_control_loop(
        self: Arc<Self>,
        mut first_attempt_tx: Option<tokio::sync::oneshot::Sender<SseResult<()>>>,
    ) {
        let mut reconnect = ReconnectController::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            self.config.backoff_multiplier,
            self.config.max_reconnect_attempts,
        );
        if !self.config.retry_interval.is_zero() {
            // A configured override for the very first reconnect; a server
            // `retry:` hint seen before that point still takes precedence,
            // since both land in the same single-use `pending_retry_hint` slot.
            reconnect.note_server_hint(self.config.retry_interval);
        }

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }

            *self.state.write() = ConnectionState::Connecting;

            match self.attempt_connection().await {
                Ok(mut active) => {
                    *self.state.write() = ConnectionState::Connected;
                    reconnect.reset();
                    self.reconnect_count.store(0, Ordering::Relaxed);
                    if let Some(tx) = first_attempt_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                    if let Some(cb) = &self.config.callbacks.on_connect {
                        cb();
                    }
                    info!(url = %self.config.url, "sse connection established");

                    let fault = active.faults_rx.recv().await;

                    active.attempt_shutdown.store(true, Ordering::Relaxed);
                    active.read_handle.abort();
                    active.watchdog_handle.abort();
                    active.lifetime_handle.abort();

                    if self.shutdown.load(Ordering::Relaxed) {
                        return;
                    }

                    let error: SseError = match fault {
                        Some(fault) => fault.into(),
                        None => SseError::transport("connection supervisors ended unexpectedly"),
                    };

                    warn!(error = %error, "sse connection lost");
                    if let Some(cb) = &self.config.callbacks.on_error {
                        cb(&error);
                    }
                    if let Some(cb) = &self.config.callbacks.on_disconnect {
                        cb(&error);
                    }
                }
                Err(error) => {
                    if let Some(tx) = first_attempt_tx.take() {
                        let _ = tx.send(Err(error.clone()));
                    }
                    warn!(error = %error, "sse connection attempt failed");
                    if let Some(cb) = &self.config.callbacks.on_error {
                        cb(&error);
                    }
                }
            }

            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }

            if !reconnect.should_reconnect() {
                info!("reconnect attempts exhausted, giving up");
                *self.state.write() = ConnectionState::Closed;
                self.shutdown.store(true, Ordering::Relaxed);
                return;
            }

            if let Some(hint) = self.pending_retry_hint.lock().take() {
                reconnect.note_server_hint(hint);
            }

            let delay = match reconnect.next_delay() {
                Some(delay) => delay,
                None => {
                    *self.state.write() = ConnectionState::Closed;
                    self.shutdown.store(true, Ordering::Relaxed);
                    return;
                }
            };

            *self.state.write() = ConnectionState::Reconnecting;
            let attempt = self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(cb) = &self.config.callbacks.on_reconnect {
                cb(attempt);
            }
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_connection(&self) -> SseResult<ActiveConnection> {
        let request = self.build_request()?;
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| SseError::transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SseError::protocol(format!(
                "unexpected status code {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.to_ascii_lowercase().contains("text/event-stream") {
            return Err(SseError::protocol(format!(
                "unexpected content-type {content_type:?}, expected text/event-stream"
            )));
        }

        *self.last_activity.write() = Instant::now();
        let connected_at = Instant::now();
        let attempt_shutdown = Arc::new(AtomicBool::new(false));
        let (faults_tx, faults_rx) = mpsc::channel(4);

        let read_timeout = if self.config.read_timeout.is_zero() {
            None
        } else {
            Some(self.config.read_timeout)
        };

        let ctx = ReadLoopContext {
            last_activity: Arc::clone(&self.last_activity),
            last_event_id: Arc::clone(&self.last_event_id),
            sequence: Arc::clone(&self.sequence),
            pending_retry_hint: Arc::clone(&self.pending_retry_hint),
            dispatcher: Arc::clone(&self.dispatcher),
            read_timeout,
            on_error: self.config.callbacks.on_error.clone(),
        };

        let body = response.bytes_stream();
        let read_shutdown = Arc::clone(&attempt_shutdown);
        let read_faults = faults_tx.clone();
        let read_handle = tokio::spawn(async move {
            let fault = supervisor::run_read_loop(body, ctx, read_shutdown).await;
            let _ = read_faults.send(fault).await;
        });

        let watchdog_handle = supervisor::spawn_health_watchdog(
            Arc::clone(&self.last_activity),
            self.config.health_check_interval,
            Arc::clone(&attempt_shutdown),
            faults_tx.clone(),
        );

        let lifetime_handle = supervisor::spawn_lifetime_monitor(
            connected_at,
            self.config.max_stream_lifetime,
            Arc::clone(&attempt_shutdown),
            faults_tx,
        );

        Ok(ActiveConnection {
            read_handle,
            watchdog_handle,
            lifetime_handle,
            attempt_shutdown,
            faults_rx,
        })
    }

    fn build_request(&self) -> SseResult<reqwest::Request> {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if self.config.enable_compression {
            headers.insert(
                reqwest::header::ACCEPT_ENCODING,
                HeaderValue::from_static("gzip"),
            );
        }

        let last_event_id = self.last_event_id.read().clone();
        if !last_event_id.is_empty() {
            let value = HeaderValue::from_str(&last_event_id)
                .map_err(|e| SseError::validation(format!("invalid last_event_id: {e}")))?;
            headers.insert(HeaderName::from_static("last-event-id"), value);
        }

        for (key, value) in &self.config.headers {
            let name = HeaderName::from_str(key)
                .map_err(|e| SseError::validation(format!("invalid header name {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SseError::validation(format!("invalid header value for {key:?}: {e}")))?;
            headers.insert(name, value);
        }

        self.http
            .get(&self.config.url)
            .headers(headers)
            .build()
            .map_err(|e| SseError::transport(e.to_string()))
    }
}
