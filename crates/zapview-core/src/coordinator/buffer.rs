use std::time::Duration;

use tokio::time::Instant;

use crate::models::SharedZap;

/// Accepted events waiting for the next display flush.
///
/// Flushes happen on a fixed interval, but never closer together than
/// `min_spacing`.
pub(crate) struct MicroBatchBuffer {
    pending: Vec<SharedZap>,
    last_flush: Option<Instant>,
    min_spacing: Duration,
}

impl MicroBatchBuffer {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            pending: Vec::new(),
            last_flush: None,
            min_spacing,
        }
    }

    pub fn push(&mut self, zap: SharedZap) {
        self.pending.push(zap);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Something is buffered and the minimum spacing has passed
    pub fn ready(&self, now: Instant) -> bool {
        !self.pending.is_empty()
            && self
                .last_flush
                .map_or(true, |last| now.duration_since(last) >= self.min_spacing)
    }

    pub fn take(&mut self, now: Instant) -> Vec<SharedZap> {
        self.last_flush = Some(now);
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ZapEvent;
    use crate::test_support::paid_zap;

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_between_flushes() {
        let mut buffer = MicroBatchBuffer::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(!buffer.ready(start), "empty buffer never flushes");

        buffer.push(ZapEvent::shared(paid_zap(1, "lnbc1u1p"), true));
        assert!(buffer.ready(start));
        assert_eq!(buffer.take(start).len(), 1);
        assert!(buffer.is_empty());

        buffer.push(ZapEvent::shared(paid_zap(2, "lnbc1u1p"), true));
        assert!(!buffer.ready(start + Duration::from_millis(50)));
        assert!(buffer.ready(start + Duration::from_millis(100)));
    }
}
