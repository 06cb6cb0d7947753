//! View orchestration.
//!
//! A view moves through `Init -> LoadingInitial -> Live <-> LoadingMore -> Closed`.
//! Each view has one producer (the gateway subscription) and one consumer task
//! that accepts events through the cache, buffers them and flushes to the
//! display. Reference and profile resolution for accepted events run as
//! separate tasks that stop when the view closes.

mod buffer;
mod pagination;
mod references;
mod session;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::FutureExt;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use self::buffer::MicroBatchBuffer;
use self::references::{ReferenceFetcher, ReferenceKey};
use self::session::{cancelled, ViewSession};
use crate::batch::{BatchRequestProcessor, BatchSettings};
use crate::config::{CoreConfig, ViewConfig};
use crate::decode::{Bolt11AmountDecoder, IdentifierDecoder, IdentifierKind, InvoiceDecoder, Nip19Decoder};
use crate::display::{BatchUpdateOptions, DisplaySink};
use crate::error::{Result, ZapError};
use crate::models::{SharedZap, ZapEvent};
use crate::profiles::{HttpNip05Verifier, Nip05Verifier, ProfileResolver};
use crate::relay::{GatewayEvent, NostrRelayTransport, RelayGateway, RelayTransport, Subscription};
use crate::stats::{AggregateStatsSource, NostrBandStats, StatsAggregator, StatsView, ZapStats};
use crate::store::{EventCache, LoadState};

/// Caller-chosen name of a view
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewId(String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id, for hosts that do not name their views
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ViewId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewPhase {
    Init,
    LoadingInitial,
    Live,
    LoadingMore,
    Closed,
}

/// Result of [`SubscriptionCoordinator::initialize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialLoad {
    pub view_id: ViewId,
    pub event_count: usize,
    pub pagination_armed: bool,
}

impl InitialLoad {
    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }
}

/// External collaborators the coordinator is built from
pub struct CoordinatorServices {
    /// Pool for zap receipts and referenced events
    pub zap_transport: Arc<dyn RelayTransport>,
    /// Pool for profile metadata
    pub profile_transport: Arc<dyn RelayTransport>,
    pub identifiers: Arc<dyn IdentifierDecoder>,
    pub invoices: Arc<dyn InvoiceDecoder>,
    pub stats_source: Option<Arc<dyn AggregateStatsSource>>,
    pub nip05: Arc<dyn Nip05Verifier>,
}

impl CoordinatorServices {
    /// Live relay pools, NIP-19 identifiers, bolt11 amounts and HTTP lookups
    pub fn nostr(config: &CoreConfig) -> Self {
        Self {
            zap_transport: Arc::new(NostrRelayTransport::new()),
            profile_transport: Arc::new(NostrRelayTransport::new()),
            identifiers: Arc::new(Nip19Decoder),
            invoices: Arc::new(Bolt11AmountDecoder),
            stats_source: config
                .stats_api_url
                .as_ref()
                .map(|url| Arc::new(NostrBandStats::new(url.as_str())) as Arc<dyn AggregateStatsSource>),
            nip05: Arc::new(HttpNip05Verifier::new()),
        }
    }
}

struct Inner {
    config: CoreConfig,
    gateway: Arc<RelayGateway>,
    profile_gateway: Arc<RelayGateway>,
    cache: EventCache,
    references: BatchRequestProcessor<ReferenceKey, Arc<Event>>,
    profiles: ProfileResolver,
    stats: StatsAggregator,
    identifiers: Arc<dyn IdentifierDecoder>,
    display: Arc<dyn DisplaySink>,
    sessions: Mutex<HashMap<ViewId, ViewSession>>,
}

/// Owns every view session and the services they share.
pub struct SubscriptionCoordinator {
    inner: Arc<Inner>,
}

impl SubscriptionCoordinator {
    pub fn new(config: CoreConfig, services: CoordinatorServices, display: Arc<dyn DisplaySink>) -> Self {
        let gateway = Arc::new(RelayGateway::new(services.zap_transport, config.load_timeout()));
        let profile_gateway = Arc::new(RelayGateway::new(services.profile_transport, config.load_timeout()));

        let references = BatchRequestProcessor::new(
            Arc::new(ReferenceFetcher {
                gateway: gateway.clone(),
                kinds: config.reference_kinds.clone(),
                timeout: config.metadata_timeout(),
            }),
            BatchSettings {
                max_batch_size: config.reference_batch_size,
                batch_delay: config.reference_batch_delay(),
                fetch_timeout: config.metadata_timeout(),
            },
        );
        let profiles = ProfileResolver::new(profile_gateway.clone(), &config, services.nip05);
        let stats = StatsAggregator::new(
            services.invoices,
            config.undecoded_amount_policy,
            services.stats_source,
            config.request_timeout(),
        );

        Self {
            inner: Arc::new(Inner {
                cache: EventCache::new(config.reference_cache_ttl()),
                config,
                gateway,
                profile_gateway,
                references,
                profiles,
                stats,
                identifiers: services.identifiers,
                display,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a view and wait for its initial load to finish.
    ///
    /// Fails with [`ZapError::Decode`] when the identifier cannot be decoded
    /// and with [`ZapError::Configuration`] when `view_id` is already open;
    /// both happen before any network traffic. Relay problems never fail this
    /// call: the initial load then ends empty once the load timeout passes.
    pub async fn initialize(&self, config: ViewConfig, view_id: ViewId) -> Result<InitialLoad> {
        let inner = &self.inner;
        let filter = inner
            .identifiers
            .decode(config.identifier(), None, inner.config.initial_load_count)
            .ok_or_else(|| ZapError::Decode {
                identifier: config.identifier().to_string(),
            })?;
        let kind = inner.identifiers.classify(config.identifier());
        let relays = config.relay_endpoints().to_vec();

        let cancel = {
            let mut sessions = inner.sessions.lock();
            if sessions.get(&view_id).is_some_and(ViewSession::is_active) {
                return Err(ZapError::configuration(format!("view {view_id} is already open")));
            }
            let mut session = ViewSession::new(config, kind, inner.config.scroll_debounce());
            session.phase = ViewPhase::LoadingInitial;
            let cancel = session.cancellation();
            sessions.insert(view_id.clone(), session);
            cancel
        };
        inner.cache.open_view(view_id.as_str());
        info!(view_id = %view_id, relays = relays.len(), ?kind, "initializing view");

        let warm = inner.clone();
        let warm_relays = relays.clone();
        tokio::spawn(async move {
            let (zaps, profiles) = tokio::join!(warm.gateway.connect(&warm_relays), warm.profiles.connect());
            debug!(zap_relays = zaps, profile_relays = profiles, "relay pools warmed up");
        });

        let subscription = inner.gateway.subscribe(view_id.as_str(), &relays, filter);
        let (loaded_tx, loaded_rx) = oneshot::channel();
        tokio::spawn(inner.clone().consume(view_id.clone(), subscription, cancel, loaded_tx));

        Ok(match loaded_rx.await {
            Ok(load) => load,
            // Closed before the initial load completed
            Err(_) => InitialLoad {
                event_count: inner.cache.len(view_id.as_str()),
                view_id,
                pagination_armed: false,
            },
        })
    }

    /// Fetch the next page of older events.
    ///
    /// Returns how many new events were accepted. Returns 0 straight away when
    /// the view is not live, a load is already running or there is no cursor.
    /// A 0 from an actual fetch disarms pagination.
    pub async fn load_more(&self, view_id: &ViewId) -> usize {
        self.inner.clone().load_more(view_id).await
    }

    /// "Near end of visible list" signal from the display.
    ///
    /// Ignored (returning `None`) unless pagination is armed, the view is idle
    /// and the debounce window since the last accepted signal has passed.
    pub async fn on_near_end(&self, view_id: &ViewId) -> Option<usize> {
        let accepted = {
            let mut sessions = self.inner.sessions.lock();
            let session = sessions.get_mut(view_id)?;
            session.phase == ViewPhase::Live && session.pagination.accept_signal(Instant::now())
        };
        if !accepted {
            trace!(view_id = %view_id, "near-end signal ignored");
            return None;
        }
        Some(self.load_more(view_id).await)
    }

    /// Close a view. Closing a closed or unknown view does nothing.
    pub fn close(&self, view_id: &ViewId) {
        let closed = self
            .inner
            .sessions
            .lock()
            .get_mut(view_id)
            .is_some_and(ViewSession::close);
        if !closed {
            return;
        }
        self.inner.gateway.close(view_id.as_str());
        self.inner.cache.remove_view(view_id.as_str());
        info!(view_id = %view_id, "view closed");
    }

    /// Close every view and disconnect both relay pools
    pub async fn shutdown(&self) {
        let open: Vec<ViewId> = self
            .inner
            .sessions
            .lock()
            .iter()
            .filter(|(_, session)| session.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        for view_id in &open {
            self.close(view_id);
        }
        self.inner.gateway.shutdown().await;
        self.inner.profile_gateway.shutdown().await;
    }

    pub fn phase(&self, view_id: &ViewId) -> Option<ViewPhase> {
        self.inner.sessions.lock().get(view_id).map(|session| session.phase)
    }

    /// The view's events, newest first
    pub fn events(&self, view_id: &ViewId) -> Vec<SharedZap> {
        self.inner.cache.get_events(view_id.as_str())
    }

    pub fn load_state(&self, view_id: &ViewId) -> Option<LoadState> {
        self.inner.cache.get_load_state(view_id.as_str())
    }

    pub fn is_pagination_armed(&self, view_id: &ViewId) -> bool {
        self.inner
            .sessions
            .lock()
            .get(view_id)
            .is_some_and(|session| session.pagination.is_armed())
    }

    /// Incrementally maintained statistics of an open view
    pub fn stats(&self, view_id: &ViewId) -> Option<ZapStats> {
        self.inner
            .sessions
            .lock()
            .get(view_id)
            .filter(|session| session.is_active())
            .map(|session| session.stats)
    }

    /// Statistics folded from scratch over the view's current events
    pub fn recompute_stats(&self, view_id: &ViewId) -> Option<ZapStats> {
        if !self.inner.is_active(view_id) {
            return None;
        }
        let zaps = self.inner.cache.get_events(view_id.as_str());
        Some(self.inner.stats.recompute(zaps.iter().map(|zap| &**zap)))
    }

    /// Statistics to present, falling back to the external source when the
    /// view has no local data
    pub async fn stats_view(&self, view_id: &ViewId) -> Option<StatsView> {
        let local = self.stats(view_id)?;
        let target = self.inner.stats_target(view_id);
        Some(self.inner.stats.query(local, target.as_ref()).await)
    }

    pub fn profiles(&self) -> &ProfileResolver {
        &self.inner.profiles
    }

    /// Drop expired reference entries
    pub fn purge_expired(&self) -> usize {
        self.inner.cache.purge_expired()
    }

    /// Forget every cached reference and profile
    pub fn clear_caches(&self) {
        self.inner.cache.clear_references();
        self.inner.references.clear_pending();
        self.inner.profiles.clear_cache();
    }
}

impl Inner {
    fn is_active(&self, view_id: &ViewId) -> bool {
        self.sessions
            .lock()
            .get(view_id)
            .is_some_and(ViewSession::is_active)
    }

    fn stats_target(&self, view_id: &ViewId) -> Option<crate::decode::StatsTarget> {
        let identifier = self
            .sessions
            .lock()
            .get(view_id)?
            .config
            .identifier()
            .to_string();
        self.identifiers.stats_target(&identifier)
    }

    /// Drain the view's subscription until it ends or the view closes
    async fn consume(
        self: Arc<Self>,
        view_id: ViewId,
        mut subscription: Subscription,
        mut cancel: watch::Receiver<bool>,
        loaded_tx: oneshot::Sender<InitialLoad>,
    ) {
        let mut loaded_tx = Some(loaded_tx);
        let mut buffer = MicroBatchBuffer::new(self.config.buffer_min_interval());
        let mut ticker = tokio::time::interval(self.config.buffer_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                item = subscription.events.recv() => match item {
                    Some(GatewayEvent::Event { event, realtime }) => {
                        if let Some(zap) = self.accept(&view_id, *event, realtime) {
                            buffer.push(zap);
                        }
                    }
                    Some(GatewayEvent::EndOfStoredEvents) => {
                        self.flush(&view_id, &mut buffer);
                        if let Some(load) = self.on_end_of_stored(&view_id) {
                            if let Some(tx) = loaded_tx.take() {
                                let _ = tx.send(load);
                            }
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if buffer.ready(Instant::now()) {
                        self.flush(&view_id, &mut buffer);
                    }
                }
            }
        }
        trace!(view_id = %view_id, "view consumer stopped");
    }

    /// Gate an incoming event through the cache. Returns the event only on
    /// its first acceptance, after dispatching its background work.
    fn accept(self: &Arc<Self>, view_id: &ViewId, event: Event, realtime: bool) -> Option<SharedZap> {
        if event.kind != Kind::ZapReceipt {
            debug!(view_id = %view_id, event_id = %event.id, kind = event.kind.as_u16(), "ignoring non-receipt event");
            return None;
        }
        let zap = ZapEvent::shared(event, realtime);
        if !self.cache.add_event(view_id.as_str(), zap.clone()) {
            return None;
        }

        let background = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(view_id).filter(|session| session.is_active()) {
                Some(session) => {
                    session.stats = self.stats.accumulate(session.stats, &zap);
                    session.stats_dirty = true;
                    Some((
                        session.config.relay_endpoints().to_vec(),
                        session.identifier_kind,
                        session.cancellation(),
                    ))
                }
                None => None,
            }
        };

        if let Some((relays, kind, cancel)) = background {
            if kind != Some(IdentifierKind::EventPointer) {
                if let Some(id) = zap.referenced_event_id() {
                    spawn_until_cancelled(
                        cancel.clone(),
                        self.clone().resolve_reference(view_id.clone(), zap.clone(), id, relays),
                    );
                }
            }
            spawn_until_cancelled(cancel, self.clone().resolve_sender(view_id.clone(), zap.clone()));
        }
        trace!(view_id = %view_id, event_id = %zap.id(), realtime, "event accepted");
        Some(zap)
    }

    /// Push the buffered batch, as the full ordered list, plus any stats change
    fn flush(&self, view_id: &ViewId, buffer: &mut MicroBatchBuffer) {
        if buffer.is_empty() {
            return;
        }
        let flushed = buffer.take(Instant::now()).len();

        let (options, stats) = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(view_id).filter(|session| session.is_active()) else {
                return;
            };
            let options = BatchUpdateOptions {
                is_initial: session.phase == ViewPhase::LoadingInitial,
                max_visible: session.config.max_visible(),
                color_mode: session.config.color_mode(),
            };
            (options, session.take_dirty_stats())
        };

        let zaps = self.cache.get_events(view_id.as_str());
        trace!(view_id = %view_id, flushed, total = zaps.len(), "flushing to display");
        self.display.batch_update(view_id, zaps, options);
        if let Some(stats) = stats {
            self.display.display_stats(view_id, StatsView::Available(stats));
        }
    }

    fn push_dirty_stats(&self, view_id: &ViewId) {
        let stats = self
            .sessions
            .lock()
            .get_mut(view_id)
            .filter(|session| session.is_active())
            .and_then(ViewSession::take_dirty_stats);
        if let Some(stats) = stats {
            self.display.display_stats(view_id, StatsView::Available(stats));
        }
    }

    fn on_end_of_stored(self: &Arc<Self>, view_id: &ViewId) -> Option<InitialLoad> {
        self.cache
            .update_load_state(view_id.as_str(), |state| state.is_initial_fetch_complete = true);
        let event_count = self.cache.len(view_id.as_str());

        let (pagination_armed, show_empty, cancel) = {
            let mut sessions = self.sessions.lock();
            let session = sessions.get_mut(view_id).filter(|session| session.is_active())?;
            if session.phase == ViewPhase::LoadingInitial {
                session.phase = ViewPhase::Live;
            }
            if event_count >= self.config.initial_load_count {
                session.pagination.arm();
            }
            let show_empty = event_count == 0 && !session.empty_signalled;
            session.empty_signalled |= show_empty;
            (session.pagination.is_armed(), show_empty, session.cancellation())
        };
        info!(view_id = %view_id, event_count, pagination_armed, "initial load complete");

        if show_empty {
            self.display.show_empty(view_id);
            spawn_until_cancelled(cancel, self.clone().fallback_stats(view_id.clone()));
        }

        Some(InitialLoad {
            view_id: view_id.clone(),
            event_count,
            pagination_armed,
        })
    }

    async fn load_more(self: Arc<Self>, view_id: &ViewId) -> usize {
        let target = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(view_id) {
                Some(session) if session.phase == ViewPhase::Live => {
                    let Some(cursor) = self.cache.try_begin_loading(view_id.as_str()) else {
                        return 0;
                    };
                    session.phase = ViewPhase::LoadingMore;
                    Some((
                        session.config.identifier().to_string(),
                        session.config.relay_endpoints().to_vec(),
                        cursor,
                        session.cancellation(),
                    ))
                }
                _ => None,
            }
        };
        let Some((identifier, relays, cursor, cancel)) = target else {
            return 0;
        };

        let accepted = self
            .fetch_older(view_id, &identifier, &relays, cursor, cancel.clone())
            .await;
        // Closed mid-page: the id may already belong to a new session
        if *cancel.borrow() {
            debug!(view_id = %view_id, cursor, "view closed during page load");
            return accepted;
        }
        self.cache.finish_loading(view_id.as_str());

        {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(view_id) {
                if session.phase == ViewPhase::LoadingMore {
                    session.phase = ViewPhase::Live;
                }
                if accepted == 0 {
                    session.pagination.disarm();
                }
            }
        }
        debug!(view_id = %view_id, cursor, accepted, "page loaded");
        accepted
    }

    /// One page of events strictly older than `cursor`, appended to the display
    async fn fetch_older(
        self: &Arc<Self>,
        view_id: &ViewId,
        identifier: &str,
        relays: &[String],
        cursor: u64,
        mut cancel: watch::Receiver<bool>,
    ) -> usize {
        let Some(filter) = self.identifiers.decode(
            identifier,
            Some(cursor.saturating_sub(1)),
            self.config.additional_load_count,
        ) else {
            return 0;
        };

        let mut subscription = self.gateway.subscribe(view_id.as_str(), relays, filter);
        let deadline = tokio::time::sleep(self.config.load_timeout());
        tokio::pin!(deadline);
        let mut accepted: Vec<SharedZap> = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                _ = &mut deadline => {
                    debug!(view_id = %view_id, "page load timed out");
                    break;
                }
                item = subscription.events.recv() => match item {
                    Some(GatewayEvent::Event { event, .. }) => {
                        if event.created_at.as_secs() < cursor {
                            if let Some(zap) = self.accept(view_id, *event, false) {
                                accepted.push(zap);
                            }
                        }
                    }
                    Some(GatewayEvent::EndOfStoredEvents) | None => break,
                }
            }
        }
        self.gateway.close_subscription(view_id.as_str(), subscription.token);

        if *cancel.borrow() {
            return accepted.len();
        }
        // Stable sort: equal timestamps stay in arrival order, as in the cache
        accepted.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        for zap in &accepted {
            self.display.append(view_id, zap.clone());
        }
        self.push_dirty_stats(view_id);
        accepted.len()
    }

    async fn resolve_reference(self: Arc<Self>, view_id: ViewId, zap: SharedZap, id: EventId, relays: Vec<String>) {
        let references = self.references.clone();
        let key = ReferenceKey { id, relays };
        let reference = self
            .cache
            .get_or_fetch_reference(id, move || references.get_or_create(key).boxed())
            .await;

        let Some(reference) = reference else {
            trace!(view_id = %view_id, event_id = %id, "reference not found");
            return;
        };
        if self.is_active(&view_id) && zap.set_reference(reference) {
            self.display.update_reference(&view_id, zap);
        }
    }

    async fn resolve_sender(self: Arc<Self>, view_id: ViewId, zap: SharedZap) {
        // Receipts without a readable zap request are attributed to their author
        let pubkey = zap.sender().map_or_else(|| zap.pubkey(), |sender| sender.pubkey);
        let profile = self.profiles.fetch_one(pubkey).await;
        if !self.is_active(&view_id) {
            return;
        }
        let has_address = profile.nip05.is_some();
        self.display.update_profile(&view_id, pubkey, profile);

        if has_address {
            let status = self.profiles.verify_identity(pubkey).await;
            if self.is_active(&view_id) {
                self.display.update_identity(&view_id, pubkey, status);
            }
        }
    }

    async fn fallback_stats(self: Arc<Self>, view_id: ViewId) {
        let target = self.stats_target(&view_id);
        let view = self.stats.query(ZapStats::default(), target.as_ref()).await;
        if self.is_active(&view_id) {
            self.display.display_stats(&view_id, view);
        }
    }
}

/// Run `work` in the background until it finishes or the view is cancelled
fn spawn_until_cancelled<F>(mut cancel: watch::Receiver<bool>, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = cancelled(&mut cancel) => {}
            _ = work => {}
        }
    });
}
