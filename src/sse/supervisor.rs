//! Background supervisors (component E): read loop, health watchdog, stream
//! lifetime cap, and flush pump.
//!
//! Each supervisor is a plain tokio task polling a `shutdown` flag on an
//! interval tick — no cancellation-token crate, just an `Arc<AtomicBool>`
//! checked every tick.

use crate::error::SseError;
use crate::event::Event;
use crate::sse::dispatch::{Dispatcher, EventBuffer};
use crate::sse::parser::SseStreamParser;
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A fatal condition raised by a background supervisor
///
/// Delivered to the connection manager's control loop, which tears the
/// connection down and (if configured) schedules a reconnect.
#[derive(Debug, Clone)]
pub enum SupervisorFault {
    Health { idle_secs: u64, cap_secs: u64 },
    Lifetime { elapsed_secs: u64, cap_secs: u64 },
    Transport { message: String },
    Protocol { message: String },
    StreamEnded,
}

impl From<SupervisorFault> for SseError {
    fn from(fault: SupervisorFault) -> Self {
        match fault {
            SupervisorFault::Health { idle_secs, cap_secs } => {
                SseError::Health { idle_secs, cap_secs }
            }
            SupervisorFault::Lifetime { elapsed_secs, cap_secs } => {
                SseError::Lifetime { elapsed_secs, cap_secs }
            }
            SupervisorFault::Transport { message } => SseError::transport(message),
            SupervisorFault::Protocol { message } => SseError::protocol(message),
            SupervisorFault::StreamEnded => {
                SseError::transport("stream ended before shutdown was requested")
            }
        }
    }
}

/// State the read loop shares with the rest of the client
///
/// Grouped into one struct passed by `Arc` so the read loop, watchdog, and
/// lifetime monitor all observe the same activity clock without threading a
/// dozen separate parameters through each spawn site.
pub struct ReadLoopContext {
    pub last_activity: Arc<RwLock<Instant>>,
    pub last_event_id: Arc<RwLock<String>>,
    pub sequence: Arc<AtomicU64>,
    pub pending_retry_hint: Arc<Mutex<Option<Duration>>>,
    pub dispatcher: Arc<Dispatcher>,
    /// `None` disables the per-read deadline (the `0` config value)
    pub read_timeout: Option<Duration>,
    /// Notified once per non-fatal field parse fault (e.g. a malformed
    /// `retry:` value); the event it was attached to is still dispatched.
    pub on_error: Option<crate::config::ErrorCallback>,
}

/// Drive the response body to completion, feeding the wire parser and
/// dispatching finalized events
///
/// Returns when the stream ends (naturally or due to a transport error) or
/// `shutdown` is observed; the caller distinguishes those via the returned
/// fault.
pub async fn run_read_loop(
    mut body: impl Stream<Item = reqwest::Result<Bytes>> + Unpin + Send,
    ctx: ReadLoopContext,
    shutdown: Arc<AtomicBool>,
) -> SupervisorFault {
    let mut parser = SseStreamParser::new();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return SupervisorFault::StreamEnded;
        }

        let next = match ctx.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, body.next()).await {
                Ok(chunk) => chunk,
                Err(_) => {
                    return SupervisorFault::Transport {
                        message: format!("no data received within read_timeout ({timeout:?})"),
                    };
                }
            },
            None => body.next().await,
        };

        match next {
            Some(Ok(bytes)) => {
                let outcome = parser.feed(&bytes);
                handle_outcome(outcome, &ctx);
            }
            Some(Err(e)) => {
                return SupervisorFault::Transport {
                    message: e.to_string(),
                };
            }
            None => {
                let outcome = parser.flush();
                handle_outcome(outcome, &ctx);
                if shutdown.load(Ordering::Relaxed) {
                    return SupervisorFault::StreamEnded;
                }
                return SupervisorFault::Transport {
                    message: "server closed the connection".to_string(),
                };
            }
        }
    }
}

fn handle_outcome(outcome: crate::sse::parser::ParseOutcome, ctx: &ReadLoopContext) {
    if outcome.saw_activity {
        *ctx.last_activity.write() = Instant::now();
    }

    for fault in &outcome.faults {
        warn!(%fault, "dropping malformed field");
        if let Some(cb) = &ctx.on_error {
            cb(&SseError::protocol(fault.to_string()));
        }
    }

    for raw in outcome.events {
        let sequence = ctx.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        if !raw.id.is_empty() {
            *ctx.last_event_id.write() = raw.id.clone();
        }
        if let Some(ms) = raw.retry_ms {
            *ctx.pending_retry_hint.lock() = Some(Duration::from_millis(ms));
        }

        let event = Event {
            id: raw.id,
            // Empty, not defaulted to "message" — the data model defines
            // `name` as the literal `event:` field value, and an
            // `event_filter` needs to be able to see the difference between
            // an unnamed event and one explicitly named "message".
            name: raw.name,
            data: raw.data,
            retry_hint: raw.retry_ms.map(Duration::from_millis),
            raw: raw.raw_lines.join("\n"),
            headers: raw.headers,
            timestamp: chrono::Utc::now(),
            sequence,
        };

        trace!(sequence, name = %event.name, "event dispatched");
        ctx.dispatcher.dispatch(event);
    }
}

/// Fires a [`SupervisorFault::Health`] if no activity (including comment
/// lines) has been observed for more than `2 * check_interval`
pub fn spawn_health_watchdog(
    last_activity: Arc<RwLock<Instant>>,
    check_interval: Duration,
    shutdown: Arc<AtomicBool>,
    faults: mpsc::Sender<SupervisorFault>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cap = check_interval.saturating_mul(2);
        let mut ticker = tokio::time::interval(check_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                return;
            }

            let idle = last_activity.read().elapsed();
            if idle > cap {
                debug!(idle_secs = idle.as_secs(), "health watchdog tripped");
                let _ = faults
                    .send(SupervisorFault::Health {
                        idle_secs: idle.as_secs(),
                        cap_secs: cap.as_secs(),
                    })
                    .await;
                return;
            }
        }
    })
}

/// Fires a [`SupervisorFault::Lifetime`] once `max_lifetime` has elapsed
/// since the connection was established
///
/// Sleeps straight to the absolute deadline rather than polling on a coarse
/// tick, so a short `max_stream_lifetime` (as in a test) fires promptly
/// instead of waiting out a fixed poll interval first.
pub fn spawn_lifetime_monitor(
    connected_at: Instant,
    max_lifetime: Duration,
    shutdown: Arc<AtomicBool>,
    faults: mpsc::Sender<SupervisorFault>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = tokio::time::Instant::from_std(connected_at) + max_lifetime;
        tokio::time::sleep_until(deadline).await;

        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let elapsed = connected_at.elapsed();
        debug!(elapsed_secs = elapsed.as_secs(), "stream lifetime cap reached");
        let _ = faults
            .send(SupervisorFault::Lifetime {
                elapsed_secs: elapsed.as_secs(),
                cap_secs: max_lifetime.as_secs(),
            })
            .await;
    })
}

/// Drains the buffered-mode event buffer into the consumer channel every
/// 100ms, lowering the backpressure flag once the buffer falls below the
/// low-water mark
pub fn spawn_flush_pump(
    buffer: Arc<Mutex<EventBuffer>>,
    backpressure: Arc<AtomicBool>,
    sender: mpsc::Sender<Event>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                return;
            }

            loop {
                let Some(event) = buffer.lock().pop_front() else {
                    break;
                };
                match sender.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(event)) => {
                        buffer.lock().push_front(event);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        return;
                    }
                }
            }

            if buffer.lock().below_low_water() {
                backpressure.store(false, Ordering::Relaxed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifetime_monitor_fires_within_cap_plus_one_tick() {
        // Wall time from Connected to forced-disconnect must stay within
        // max_stream_lifetime plus one supervisor tick.
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(1);
        let cap = Duration::from_millis(50);
        let started = Instant::now();

        let handle = spawn_lifetime_monitor(started, cap, shutdown, tx);
        let fault = tokio::time::timeout(Duration::from_millis(700), rx.recv())
            .await
            .expect("lifetime monitor did not fire in time")
            .expect("fault channel closed without a fault");

        assert!(started.elapsed() >= cap);
        assert!(matches!(fault, SupervisorFault::Lifetime { .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn health_watchdog_fires_after_double_the_check_interval_idle() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(1);
        let interval = Duration::from_millis(50);
        let last_activity = Arc::new(RwLock::new(Instant::now()));

        let handle = spawn_health_watchdog(Arc::clone(&last_activity), interval, shutdown, tx);
        let fault = tokio::time::timeout(Duration::from_millis(700), rx.recv())
            .await
            .expect("health watchdog did not fire in time")
            .expect("fault channel closed without a fault");

        assert!(matches!(fault, SupervisorFault::Health { .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn health_watchdog_stays_quiet_while_activity_keeps_refreshing() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::channel(1);
        let interval = Duration::from_millis(30);
        let last_activity = Arc::new(RwLock::new(Instant::now()));

        let refresher = Arc::clone(&last_activity);
        let refresh_shutdown = Arc::new(AtomicBool::new(false));
        let refresh_flag = Arc::clone(&refresh_shutdown);
        let refresh_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            loop {
                ticker.tick().await;
                if refresh_flag.load(Ordering::Relaxed) {
                    return;
                }
                *refresher.write() = Instant::now();
            }
        });

        let watchdog = spawn_health_watchdog(last_activity, interval, shutdown, tx);
        let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(result.is_err(), "watchdog should not fire while activity is fresh");

        refresh_shutdown.store(true, Ordering::Relaxed);
        refresh_handle.abort();
        watchdog.abort();
    }
}
