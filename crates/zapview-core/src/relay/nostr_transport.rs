use std::collections::HashSet;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use nostr_sdk::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::transport::{RelayTransport, TransportItem, TransportStream};

/// How long `connect` waits for relays to report as connected
const CONNECT_WAIT: Duration = Duration::from_secs(4);

const STREAM_CAPACITY: usize = 256;

/// [`RelayTransport`] backed by a nostr-sdk [`Client`].
///
/// One instance is one connection pool; relays are added on first use.
#[derive(Debug, Clone)]
pub struct NostrRelayTransport {
    client: Client,
}

impl Default for NostrRelayTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl NostrRelayTransport {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Add any relays the pool does not know yet and start connecting.
    /// Individual failures are logged and skipped.
    async fn ensure_relays(&self, relays: &[String]) {
        for url in relays {
            if let Err(e) = self.client.add_relay(url.as_str()).await {
                warn!(relay = %url, error = %e, "failed to add relay");
            }
        }
        self.client.connect().await;
    }

    async fn connected_count(&self) -> usize {
        self.client
            .relays()
            .await
            .values()
            .filter(|r| r.status() == RelayStatus::Connected)
            .count()
    }
}

impl RelayTransport for NostrRelayTransport {
    fn connect<'a>(&'a self, relays: &'a [String]) -> BoxFuture<'a, usize> {
        async move {
            self.ensure_relays(relays).await;
            self.client.wait_for_connection(CONNECT_WAIT).await;
            let connected = self.connected_count().await;
            debug!(connected, requested = relays.len(), "relay pool warmed up");
            connected
        }
        .boxed()
    }

    fn subscribe<'a>(
        &'a self,
        relays: &'a [String],
        filter: Filter,
    ) -> BoxFuture<'a, anyhow::Result<TransportStream>> {
        async move {
            self.ensure_relays(relays).await;

            // Listen before sending REQ so no early event is missed
            let mut notifications = self.client.notifications();
            let output = self.client.subscribe_to(relays.to_vec(), filter, None).await?;
            let sub_id = output.val;
            let expected_eose = output.success.len();
            for (relay_url, error) in &output.failed {
                warn!(relay = %relay_url, error = %error, "relay rejected subscription");
            }

            let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
            let client = self.client.clone();

            tokio::spawn(async move {
                let mut eose_from: HashSet<RelayUrl> = HashSet::new();
                let mut eose_sent = false;
                if expected_eose == 0 {
                    eose_sent = tx.send(TransportItem::EndOfStoredEvents).await.is_ok();
                }

                loop {
                    tokio::select! {
                        _ = tx.closed() => break,
                        result = notifications.recv() => match result {
                            Ok(RelayPoolNotification::Event { subscription_id, event, .. }) => {
                                if subscription_id == sub_id
                                    && tx.send(TransportItem::Event(event)).await.is_err()
                                {
                                    break;
                                }
                            }
                            Ok(RelayPoolNotification::Message { relay_url, message }) => {
                                let is_ours = matches!(
                                    &message,
                                    RelayMessage::EndOfStoredEvents(id) if id.to_string() == sub_id.to_string()
                                );
                                if is_ours && !eose_sent {
                                    eose_from.insert(relay_url);
                                    if eose_from.len() >= expected_eose {
                                        eose_sent = true;
                                        if tx.send(TransportItem::EndOfStoredEvents).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Ok(RelayPoolNotification::Shutdown) => break,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, subscription = %sub_id, "notification receiver lagged");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }

                let _ = client.unsubscribe(&sub_id).await;
                debug!(subscription = %sub_id, "transport subscription closed");
            });

            Ok(rx)
        }
        .boxed()
    }

    fn fetch<'a>(
        &'a self,
        relays: &'a [String],
        filter: Filter,
        timeout: Duration,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Event>>> {
        async move {
            self.ensure_relays(relays).await;
            let events = self
                .client
                .fetch_events_from(relays.to_vec(), filter, timeout)
                .await?;
            Ok(events.into_iter().collect())
        }
        .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move {
            let _ = self.client.disconnect().await;
        }
        .boxed()
    }
}
