use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::{Event, Filter};
use tokio::sync::mpsc;

/// Item delivered on a transport subscription
#[derive(Debug)]
pub enum TransportItem {
    Event(Box<Event>),
    /// Every relay of the subscription has sent EOSE
    EndOfStoredEvents,
}

/// Receiving side of a transport subscription. Dropping it closes the subscription.
pub type TransportStream = mpsc::Receiver<TransportItem>;

/// Publish/subscribe access to a pool of relays.
///
/// Implementations own their connections. Deduplication across relays is not
/// expected here; the same event may be delivered once per relay.
pub trait RelayTransport: Send + Sync + 'static {
    /// Open connections to `relays`, returning how many are connected
    fn connect<'a>(&'a self, relays: &'a [String]) -> BoxFuture<'a, usize>;

    fn subscribe<'a>(
        &'a self,
        relays: &'a [String],
        filter: Filter,
    ) -> BoxFuture<'a, anyhow::Result<TransportStream>>;

    /// Collect stored events matching `filter` until EOSE or `timeout`
    fn fetch<'a>(
        &'a self,
        relays: &'a [String],
        filter: Filter,
        timeout: Duration,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Event>>>;

    /// Disconnect from every relay
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}
