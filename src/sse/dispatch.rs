//! Dispatcher & flow control (component C)
//!
//! In direct mode every finalized event goes straight at the consumer
//! channel with a non-blocking send; a full channel just drops the event.
//! In buffered mode every finalized event lands in an internal bounded
//! buffer with oldest-drop eviction, and a separate flush pump
//! ([`crate::sse::supervisor`]) moves events from the buffer to the
//! consumer channel as room becomes available.

use crate::config::EventFilter;
use crate::event::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Bounded, ordered buffer used by buffered-mode flow control
///
/// Oldest-drop eviction: once at capacity, the oldest `max(1, capacity/10)`
/// entries are evicted before the new event is appended.
pub struct EventBuffer {
    items: VecDeque<Event>,
    capacity: usize,
    high_water: usize,
    low_water: usize,
}

impl EventBuffer {
    pub fn new(capacity: usize, threshold: f64) -> Self {
        let high_water = ((capacity as f64) * threshold).floor() as usize;
        let high_water = high_water.max(1);
        let low_water = high_water / 2;
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            high_water,
            low_water,
        }
    }

    /// Append an event, evicting the oldest entries first if saturated.
    /// Returns `true` if the buffer is now at or above the high-water mark.
    pub fn push(&mut self, event: Event) -> bool {
        if self.items.len() >= self.capacity {
            let evict = std::cmp::max(1, self.capacity / 10);
            for _ in 0..evict {
                if self.items.pop_front().is_none() {
                    break;
                }
            }
            warn!(evicted = evict, "event buffer saturated, dropped oldest entries");
        }
        self.items.push_back(event);
        self.items.len() >= self.high_water
    }

    pub fn pop_front(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    pub fn push_front(&mut self, event: Event) {
        self.items.push_front(event);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn below_low_water(&self) -> bool {
        self.items.len() < self.low_water
    }
}

/// Routes finalized events to the consumer channel, applying the event
/// filter and (optionally) buffered-mode flow control
pub struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    filter: Option<EventFilter>,
    flow_control_enabled: bool,
    pub(crate) buffer: Arc<Mutex<EventBuffer>>,
    backpressure: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        sender: mpsc::Sender<Event>,
        filter: Option<EventFilter>,
        flow_control_enabled: bool,
        buffer_size: usize,
        threshold: f64,
        backpressure: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            filter,
            flow_control_enabled,
            buffer: Arc::new(Mutex::new(EventBuffer::new(buffer_size, threshold))),
            backpressure,
        }
    }

    /// Route one finalized event. Never blocks and never invokes user code.
    pub fn dispatch(&self, event: Event) {
        if let Some(filter) = &self.filter {
            if !filter(&event.name) {
                trace!(name = %event.name, "event dropped by filter");
                return;
            }
        }

        if self.flow_control_enabled {
            let above_high = self.buffer.lock().push(event);
            if above_high {
                self.backpressure.store(true, Ordering::Relaxed);
            }
        } else {
            let sender = self.sender.lock();
            let Some(sender) = sender.as_ref() else {
                trace!("consumer channel closed, event dropped");
                return;
            };
            match sender.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("consumer channel full, event dropped (direct mode)");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!("consumer channel closed, event dropped");
                }
            }
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.load(Ordering::Relaxed)
    }

    pub(crate) fn sender_clone(&self) -> Option<mpsc::Sender<Event>> {
        self.sender.lock().clone()
    }

    /// Drop this dispatcher's own `Sender` handle. Called once from
    /// `SseClient::close()`; once every other clone (flush pump, read loop)
    /// has also been dropped, the consumer channel closes and `recv()`
    /// resolves to `None`.
    pub(crate) fn shutdown(&self) {
        *self.sender.lock() = None;
    }
}
