use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use super::transport::{RelayTransport, TransportItem};

/// Message delivered to a gateway subscriber
#[derive(Debug)]
pub enum GatewayEvent {
    Event {
        event: Box<Event>,
        /// Delivered after end-of-stored-events, i.e. live
        realtime: bool,
    },
    /// Delivered exactly once per subscription: on relay EOSE or when the
    /// EOSE timeout elapses, whichever comes first
    EndOfStoredEvents,
}

/// An open logical subscription
#[derive(Debug)]
pub struct Subscription {
    pub token: u64,
    pub events: mpsc::UnboundedReceiver<GatewayEvent>,
}

type SubscriptionMap = HashMap<String, HashMap<u64, AbortHandle>>;

/// Multiplexed subscribe/fetch over one relay pool.
///
/// Subscriptions are grouped by view id so that a view's teardown can close
/// all of them at once. Network failures never escape: a subscription that
/// cannot be opened reports end-of-stored-events with no events, and fetches
/// resolve to empty results.
pub struct RelayGateway {
    transport: Arc<dyn RelayTransport>,
    eose_timeout: Duration,
    subscriptions: Arc<Mutex<SubscriptionMap>>,
    next_token: AtomicU64,
}

impl RelayGateway {
    pub fn new(transport: Arc<dyn RelayTransport>, eose_timeout: Duration) -> Self {
        Self {
            transport,
            eose_timeout,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Best-effort pre-warming. Unreachable relays are skipped.
    pub async fn connect(&self, relays: &[String]) -> usize {
        self.transport.connect(relays).await
    }

    /// Open one logical subscription across `relays` on behalf of `view_id`.
    ///
    /// Must be called from within a tokio runtime. Events are not deduplicated.
    pub fn subscribe(&self, view_id: &str, relays: &[String], filter: Filter) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let transport = self.transport.clone();
        let relays = relays.to_vec();
        let eose_timeout = self.eose_timeout;
        let registry = self.subscriptions.clone();
        let owner = view_id.to_string();

        // Held across the spawn so the task cannot deregister before it is registered
        let mut subscriptions = self.subscriptions.lock();
        let handle = tokio::spawn(async move {
            forward_subscription(transport, relays, filter, eose_timeout, tx).await;
            // Finished on its own; forget the abort handle
            let mut subscriptions = registry.lock();
            if let Some(tokens) = subscriptions.get_mut(&owner) {
                tokens.remove(&token);
                if tokens.is_empty() {
                    subscriptions.remove(&owner);
                }
            }
        });
        subscriptions
            .entry(view_id.to_string())
            .or_default()
            .insert(token, handle.abort_handle());
        drop(subscriptions);
        trace!(view_id, token, "gateway subscription opened");

        Subscription { token, events: rx }
    }

    /// Close every subscription of `view_id`. Closing an absent view is a no-op.
    pub fn close(&self, view_id: &str) {
        let Some(tokens) = self.subscriptions.lock().remove(view_id) else {
            return;
        };
        for handle in tokens.values() {
            handle.abort();
        }
        debug!(view_id, closed = tokens.len(), "gateway subscriptions closed");
    }

    /// Close a single subscription. Unknown tokens are ignored.
    pub fn close_subscription(&self, view_id: &str, token: u64) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(tokens) = subscriptions.get_mut(view_id) {
            if let Some(handle) = tokens.remove(&token) {
                handle.abort();
            }
            if tokens.is_empty() {
                subscriptions.remove(view_id);
            }
        }
    }

    /// Number of open subscriptions held for `view_id`
    pub fn open_subscriptions(&self, view_id: &str) -> usize {
        self.subscriptions
            .lock()
            .get(view_id)
            .map_or(0, |tokens| tokens.len())
    }

    /// Single-shot lookup of one event, limited to `kinds`.
    pub async fn fetch_one(&self, relays: &[String], id: EventId, kinds: &[u16], timeout: Duration) -> Option<Event> {
        let filter = Filter::new()
            .id(id)
            .kinds(kinds.iter().map(|k| Kind::from(*k)))
            .limit(1);
        self.fetch_many(relays, filter, timeout)
            .await
            .into_iter()
            .find(|event| event.id == id)
    }

    /// Collect stored events matching `filter`. Failure and timeout yield an empty list.
    pub async fn fetch_many(&self, relays: &[String], filter: Filter, timeout: Duration) -> Vec<Event> {
        match tokio::time::timeout(timeout, self.transport.fetch(relays, filter, timeout)).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!(error = %e, "relay fetch failed");
                Vec::new()
            }
            Err(_) => {
                debug!(?timeout, "relay fetch timed out");
                Vec::new()
            }
        }
    }

    /// Close every subscription and disconnect the pool
    pub async fn shutdown(&self) {
        let views: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        for view_id in views {
            self.close(&view_id);
        }
        self.transport.shutdown().await;
    }
}

async fn forward_subscription(
    transport: Arc<dyn RelayTransport>,
    relays: Vec<String>,
    filter: Filter,
    eose_timeout: Duration,
    tx: mpsc::UnboundedSender<GatewayEvent>,
) {
    let mut stream = match transport.subscribe(&relays, filter).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "failed to open relay subscription");
            let _ = tx.send(GatewayEvent::EndOfStoredEvents);
            return;
        }
    };

    let deadline = tokio::time::sleep(eose_timeout);
    tokio::pin!(deadline);
    let mut eose_sent = false;

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            _ = &mut deadline, if !eose_sent => {
                debug!(?eose_timeout, "no EOSE before timeout, treating stored events as complete");
                eose_sent = true;
                if tx.send(GatewayEvent::EndOfStoredEvents).is_err() {
                    break;
                }
            }
            item = stream.recv() => match item {
                Some(TransportItem::Event(event)) => {
                    if tx.send(GatewayEvent::Event { event, realtime: eose_sent }).is_err() {
                        break;
                    }
                }
                Some(TransportItem::EndOfStoredEvents) => {
                    if !eose_sent {
                        eose_sent = true;
                        if tx.send(GatewayEvent::EndOfStoredEvents).is_err() {
                            break;
                        }
                    }
                }
                None => {
                    if !eose_sent {
                        let _ = tx.send(GatewayEvent::EndOfStoredEvents);
                    }
                    break;
                }
            }
        }
    }
}
