use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use nostr_sdk::prelude::*;
use tracing::trace;

use crate::batch::BatchFetcher;
use crate::relay::RelayGateway;

/// A referenced event and the relays of the view that asked for it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ReferenceKey {
    pub id: EventId,
    pub relays: Vec<String>,
}

/// Grouped lookup of zapped events, restricted to the reference kinds
pub(crate) struct ReferenceFetcher {
    pub gateway: Arc<RelayGateway>,
    pub kinds: Vec<u16>,
    pub timeout: Duration,
}

impl BatchFetcher<ReferenceKey, Arc<Event>> for ReferenceFetcher {
    fn fetch_batch(&self, keys: Vec<ReferenceKey>) -> BoxFuture<'static, anyhow::Result<HashMap<ReferenceKey, Arc<Event>>>> {
        let gateway = self.gateway.clone();
        let kinds = self.kinds.clone();
        let timeout = self.timeout;

        async move {
            let mut by_relays: HashMap<Vec<String>, Vec<EventId>> = HashMap::new();
            for key in keys {
                by_relays.entry(key.relays).or_default().push(key.id);
            }

            let lookups = by_relays.into_iter().map(|(relays, ids)| {
                let gateway = gateway.clone();
                let kinds = kinds.clone();
                async move {
                    let events: Vec<Event> = match ids.as_slice() {
                        [id] => gateway
                            .fetch_one(&relays, *id, &kinds, timeout)
                            .await
                            .into_iter()
                            .collect(),
                        _ => {
                            let filter = Filter::new()
                                .ids(ids.iter().copied())
                                .kinds(kinds.iter().map(|k| Kind::from(*k)));
                            gateway.fetch_many(&relays, filter, timeout).await
                        }
                    };
                    trace!(requested = ids.len(), found = events.len(), "reference group fetched");
                    events
                        .into_iter()
                        .filter(|event| ids.contains(&event.id))
                        .map(|event| {
                            let key = ReferenceKey {
                                id: event.id,
                                relays: relays.clone(),
                            };
                            (key, Arc::new(event))
                        })
                        .collect::<Vec<_>>()
                }
            });

            Ok(join_all(lookups).await.into_iter().flatten().collect())
        }
        .boxed()
    }
}
