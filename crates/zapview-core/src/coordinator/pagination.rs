use std::time::Duration;

use tokio::time::Instant;

/// Arms backward pagination and debounces "near end of list" signals.
#[derive(Debug)]
pub(crate) struct PaginationGate {
    armed: bool,
    debounce: Duration,
    last_signal: Option<Instant>,
}

impl PaginationGate {
    pub fn new(debounce: Duration) -> Self {
        Self {
            armed: false,
            debounce,
            last_signal: None,
        }
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether a signal at `now` should trigger a load. Signals within the
    /// debounce window of the last accepted one are dropped.
    pub fn accept_signal(&mut self, now: Instant) -> bool {
        if !self.armed {
            return false;
        }
        if self
            .last_signal
            .is_some_and(|last| now.duration_since(last) < self.debounce)
        {
            return false;
        }
        self.last_signal = Some(now);
        true
    }
}
