use std::time::Duration;

use tokio::sync::watch;

use super::pagination::PaginationGate;
use super::ViewPhase;
use crate::config::ViewConfig;
use crate::decode::IdentifierKind;
use crate::stats::ZapStats;

/// Everything the coordinator tracks for one open view.
///
/// A closed session stays in the registry as a tombstone so late background
/// results can tell the view is gone.
pub(crate) struct ViewSession {
    pub config: ViewConfig,
    pub phase: ViewPhase,
    pub identifier_kind: Option<IdentifierKind>,
    pub stats: ZapStats,
    /// Stats changed since they were last pushed to the display
    pub stats_dirty: bool,
    pub pagination: PaginationGate,
    pub empty_signalled: bool,
    cancel: watch::Sender<bool>,
}

impl ViewSession {
    pub fn new(config: ViewConfig, identifier_kind: Option<IdentifierKind>, debounce: Duration) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            phase: ViewPhase::Init,
            identifier_kind,
            stats: ZapStats::default(),
            stats_dirty: false,
            pagination: PaginationGate::new(debounce),
            empty_signalled: false,
            cancel,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != ViewPhase::Closed
    }

    /// Receiver that flips to `true` when the view closes
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Take the pending stats update, if any
    pub fn take_dirty_stats(&mut self) -> Option<ZapStats> {
        std::mem::take(&mut self.stats_dirty).then_some(self.stats)
    }

    /// Move to `Closed` and cancel background work. Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.phase = ViewPhase::Closed;
        self.pagination.disarm();
        self.cancel.send_replace(true);
        true
    }
}

/// Resolves once `cancel` reads `true` or its sender is gone
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
