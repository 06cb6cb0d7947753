use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::{Event, EventId};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::ttl::CacheAside;
use crate::models::SharedZap;

/// Pagination bookkeeping of one view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadState {
    /// Held while a pagination fetch is in flight
    pub is_loading: bool,
    /// Oldest `created_at` accepted so far; the strict upper bound of the next page
    pub last_event_time: Option<u64>,
    pub is_initial_fetch_complete: bool,
}

#[derive(Default)]
struct ViewEvents {
    /// Sorted by `created_at` descending, ties in arrival order
    events: Vec<SharedZap>,
    ids: HashSet<EventId>,
    load_state: LoadState,
}

/// Per-view deduplicated event collections plus the shared reference cache.
pub struct EventCache {
    views: Mutex<HashMap<String, ViewEvents>>,
    references: CacheAside<EventId, Option<Arc<Event>>>,
}

impl EventCache {
    pub fn new(reference_ttl: Duration) -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
            references: CacheAside::new(reference_ttl),
        }
    }

    /// Start tracking `view_id`. Re-opening an existing view keeps its state.
    pub fn open_view(&self, view_id: &str) {
        self.views.lock().entry(view_id.to_string()).or_default();
    }

    /// Insert `zap` in order. Returns false, without mutating anything, when
    /// the id is already present or the view is unknown.
    ///
    /// A true return is the one-shot signal that this event was accepted.
    pub fn add_event(&self, view_id: &str, zap: SharedZap) -> bool {
        let mut views = self.views.lock();
        let Some(view) = views.get_mut(view_id) else {
            return false;
        };
        if !view.ids.insert(zap.id()) {
            trace!(view_id, event_id = %zap.id(), "duplicate event ignored");
            return false;
        }

        let created_at = zap.created_at();
        let position = view
            .events
            .partition_point(|existing| existing.created_at() >= created_at);
        view.events.insert(position, zap);

        let cursor = &mut view.load_state.last_event_time;
        *cursor = Some(cursor.map_or(created_at, |current| current.min(created_at)));
        true
    }

    /// Snapshot of the view's ordered events
    pub fn get_events(&self, view_id: &str) -> Vec<SharedZap> {
        self.views
            .lock()
            .get(view_id)
            .map(|view| view.events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, view_id: &str) -> usize {
        self.views.lock().get(view_id).map_or(0, |view| view.events.len())
    }

    pub fn get_load_state(&self, view_id: &str) -> Option<LoadState> {
        self.views.lock().get(view_id).map(|view| view.load_state)
    }

    /// Apply `update` to the view's load state. Returns false for an unknown view.
    ///
    /// The cursor never moves forward: a later value is ignored.
    pub fn update_load_state(&self, view_id: &str, update: impl FnOnce(&mut LoadState)) -> bool {
        let mut views = self.views.lock();
        let Some(view) = views.get_mut(view_id) else {
            return false;
        };
        let previous_cursor = view.load_state.last_event_time;
        update(&mut view.load_state);
        if let (Some(previous), Some(next)) = (previous_cursor, view.load_state.last_event_time) {
            view.load_state.last_event_time = Some(previous.min(next));
        }
        true
    }

    /// Take the loading flag and return the cursor to page from.
    ///
    /// `None` when a load is already running or there is no cursor yet.
    pub fn try_begin_loading(&self, view_id: &str) -> Option<u64> {
        let mut views = self.views.lock();
        let state = &mut views.get_mut(view_id)?.load_state;
        if state.is_loading {
            return None;
        }
        let cursor = state.last_event_time?;
        state.is_loading = true;
        Some(cursor)
    }

    pub fn finish_loading(&self, view_id: &str) {
        self.update_load_state(view_id, |state| state.is_loading = false);
    }

    /// Resolve a referenced event through the cache, fetching on miss or expiry.
    ///
    /// A `None` result is cached like any other, so an id missing from every
    /// relay is not looked up again until the entry expires.
    pub async fn get_or_fetch_reference<F>(&self, id: EventId, fetch: F) -> Option<Arc<Event>>
    where
        F: FnOnce() -> BoxFuture<'static, Option<Arc<Event>>>,
    {
        self.references.get_or_fetch(id, fetch).await
    }

    pub fn cached_reference(&self, id: &EventId) -> Option<Option<Arc<Event>>> {
        self.references.peek(id)
    }

    /// Discard everything held for `view_id`
    pub fn remove_view(&self, view_id: &str) -> bool {
        let removed = self.views.lock().remove(view_id).is_some();
        if removed {
            debug!(view_id, "view state discarded");
        }
        removed
    }

    /// Drop expired reference entries
    pub fn purge_expired(&self) -> usize {
        self.references.purge_expired()
    }

    pub fn clear_references(&self) {
        self.references.clear();
    }
}
