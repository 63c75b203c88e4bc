//! Autosave scheduler: debounced, single-flight full-state flushes.
//!
//! DESIGN
//! ======
//! Every local commit calls `schedule` with the full current payload, which
//! resets a quiescence deadline. When the deadline passes without another
//! commit, the owning loop takes the payload and sends it. At most one flush
//! is in flight; a payload that comes due meanwhile waits for it.
//!
//! The scheduler owns no timer. The owner sleeps until `deadline()` inside
//! its own `select!` loop and calls `take_due`, so dropping the owner drops
//! any pending save without flushing.
//!
//! ERROR HANDLING
//! ==============
//! A failed flush is not requeued. The payload is full state, so the next
//! schedule or manual save resends everything the failed one carried.

#[cfg(test)]
#[path = "autosave_test.rs"]
mod autosave_test;

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct AutosaveScheduler<T> {
    quiescence: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
    in_flight: bool,
}

impl<T> AutosaveScheduler<T> {
    #[must_use]
    pub fn new(quiescence: Duration) -> Self {
        Self { quiescence, pending: None, deadline: None, in_flight: false }
    }

    #[must_use]
    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    /// Replace the pending payload and restart the quiescence window.
    pub fn schedule(&mut self, payload: T) {
        self.pending = Some(payload);
        self.deadline = Some(Instant::now() + self.quiescence);
    }

    /// Make the payload due immediately.
    pub fn save_now(&mut self, payload: T) {
        self.pending = Some(payload);
        self.deadline = Some(Instant::now());
    }

    /// Replace the pending payload without moving the deadline. Returns
    /// `false` if nothing was pending.
    pub fn rebase(&mut self, payload: T) -> bool {
        if self.pending.is_none() {
            return false;
        }
        self.pending = Some(payload);
        true
    }

    /// When the owner should next call `take_due`. `None` while a flush is
    /// in flight or nothing is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        if self.in_flight || self.pending.is_none() {
            return None;
        }
        self.deadline
    }

    /// Take the payload if it is due and no flush is in flight. Marks the
    /// flush in flight.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        let deadline = self.deadline()?;
        if deadline > now {
            return None;
        }
        self.deadline = None;
        self.in_flight = true;
        self.pending.take()
    }

    /// The in-flight flush finished, successfully or not.
    pub fn flush_finished(&mut self) {
        self.in_flight = false;
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Drop the pending payload without flushing. Returns `true` if one was
    /// dropped.
    pub fn discard(&mut self) -> bool {
        self.deadline = None;
        self.pending.take().is_some()
    }
}
