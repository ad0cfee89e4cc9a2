//! Reconnect controller (component D)
//!
//! Pure backoff/jitter arithmetic, kept free of any I/O or sleeping so it is
//! trivially unit-testable; the connection manager owns the actual timer and
//! just asks this for "how long do I wait, and should I even try".

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with bounded jitter and an optional server override
///
/// The jitter window is `backoff * 0.25` applied uniformly in both
/// directions, i.e. the delay actually used is drawn from
/// `[backoff * 0.75, backoff * 1.25]`, clamped to `max_backoff`. An earlier
/// formulation of this math carried a constant-valued typo (`0.25 * (2*pi -
/// 1)` instead of a uniform draw over `[-0.25, 0.25]`); this implementation
/// is the corrected one.
pub struct ReconnectController {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    max_attempts: u32,
    attempt: u32,
    server_hint: Option<Duration>,
}

impl ReconnectController {
    pub fn new(
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            multiplier,
            max_attempts,
            attempt: 0,
            server_hint: None,
        }
    }

    /// Record a `retry:` hint carried by a server event. Takes priority over
    /// the computed backoff for exactly the next reconnect attempt.
    pub fn note_server_hint(&mut self, hint: Duration) {
        self.server_hint = Some(hint);
    }

    /// Attempts made since the last successful connect
    pub fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is permitted under `max_reconnect_attempts`
    ///
    /// `0` means unlimited.
    pub fn should_reconnect(&self) -> bool {
        self.max_attempts == 0 || self.attempt < self.max_attempts
    }

    /// Compute the delay before the next attempt and advance the attempt
    /// counter. Returns `None` if the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_reconnect() {
            return None;
        }

        let delay = if let Some(hint) = self.server_hint.take() {
            hint.min(self.max_backoff)
        } else {
            self.jittered_backoff(self.attempt)
        };

        self.attempt += 1;
        Some(delay)
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let base = base.min(self.max_backoff.as_secs_f64());

        let jitter_span = base * 0.25;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        let jittered = (base + jitter).max(0.0).min(self.max_backoff.as_secs_f64());

        Duration::from_secs_f64(jittered)
    }

    /// Reset the attempt counter after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.server_hint = None;
    }
}
