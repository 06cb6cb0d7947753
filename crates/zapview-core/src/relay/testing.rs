//! In-memory relay used by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::transport::{RelayTransport, TransportItem, TransportStream};

/// A relay pool whose stored events and failure modes are scripted up front.
///
/// Every relay list is treated as the same single store.
#[derive(Default)]
pub struct ScriptedTransport {
    stored: Mutex<Vec<Event>>,
    live: Mutex<Vec<(Value, mpsc::Sender<TransportItem>)>>,
    fetched_filters: Mutex<Vec<Value>>,
    fetch_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    fetch_delay: Option<Duration>,
    withhold_eose: bool,
    fail_fetch: bool,
    fail_subscribe: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn withholding_eose(mut self) -> Self {
        self.withhold_eose = true;
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn store(&self, event: Event) {
        self.stored.lock().push(event);
    }

    pub fn clear_stored(&self) {
        self.stored.lock().clear();
    }

    /// Deliver `event` to every open subscription whose filter matches it
    pub async fn push_live(&self, event: Event) {
        let targets: Vec<mpsc::Sender<TransportItem>> = {
            let mut live = self.live.lock();
            live.retain(|(_, tx)| !tx.is_closed());
            live.iter()
                .filter(|(filter, _)| matches_filter(filter, &event))
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in targets {
            let _ = tx.send(TransportItem::Event(Box::new(event.clone()))).await;
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Filters of every fetch so far, as relay JSON
    pub fn fetched_filters(&self) -> Vec<Value> {
        self.fetched_filters.lock().clone()
    }

    fn query(&self, filter: &Value) -> Vec<Event> {
        let mut matched: Vec<Event> = self
            .stored
            .lock()
            .iter()
            .filter(|event| matches_filter(filter, event))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.get("limit").and_then(Value::as_u64) {
            matched.truncate(limit as usize);
        }
        matched
    }
}

fn contains_str(filter: &Value, field: &str, value: &str) -> bool {
    match filter.get(field).and_then(Value::as_array) {
        Some(values) => values.iter().any(|v| v.as_str() == Some(value)),
        None => true,
    }
}

/// Relay-side filter semantics over the filter's wire JSON
fn matches_filter(filter: &Value, event: &Event) -> bool {
    if !contains_str(filter, "ids", &event.id.to_hex())
        || !contains_str(filter, "authors", &event.pubkey.to_hex())
    {
        return false;
    }

    if let Some(kinds) = filter.get("kinds").and_then(Value::as_array) {
        let kind = u64::from(event.kind.as_u16());
        if !kinds.iter().any(|k| k.as_u64() == Some(kind)) {
            return false;
        }
    }

    let created_at = event.created_at.as_secs();
    if filter
        .get("since")
        .and_then(Value::as_u64)
        .is_some_and(|since| created_at < since)
    {
        return false;
    }
    if filter
        .get("until")
        .and_then(Value::as_u64)
        .is_some_and(|until| created_at > until)
    {
        return false;
    }

    let Some(fields) = filter.as_object() else {
        return true;
    };
    fields
        .iter()
        .filter_map(|(key, values)| Some((key.strip_prefix('#')?, values.as_array()?)))
        .all(|(tag_name, wanted)| {
            event.tags.iter().any(|tag| {
                let parts = tag.as_slice();
                parts.first().map(String::as_str) == Some(tag_name)
                    && parts
                        .get(1)
                        .is_some_and(|value| wanted.iter().any(|w| w.as_str() == Some(value.as_str())))
            })
        })
}

impl RelayTransport for ScriptedTransport {
    fn connect<'a>(&'a self, relays: &'a [String]) -> BoxFuture<'a, usize> {
        async move { relays.len() }.boxed()
    }

    fn subscribe<'a>(
        &'a self,
        _relays: &'a [String],
        filter: Filter,
    ) -> BoxFuture<'a, anyhow::Result<TransportStream>> {
        async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_subscribe {
                anyhow::bail!("scripted subscribe failure");
            }

            let filter = serde_json::to_value(&filter)?;
            let stored = self.query(&filter);
            let (tx, rx) = mpsc::channel(stored.len() + 64);
            for event in stored {
                tx.try_send(TransportItem::Event(Box::new(event)))?;
            }
            if !self.withhold_eose {
                tx.try_send(TransportItem::EndOfStoredEvents)?;
            }
            self.live.lock().push((filter, tx));
            Ok(rx)
        }
        .boxed()
    }

    fn fetch<'a>(
        &'a self,
        _relays: &'a [String],
        filter: Filter,
        _timeout: Duration,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Event>>> {
        async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let filter = serde_json::to_value(&filter)?;
            self.fetched_filters.lock().push(filter.clone());
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_fetch {
                anyhow::bail!("scripted fetch failure");
            }
            Ok(self.query(&filter))
        }
        .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move {
            self.live.lock().clear();
        }
        .boxed()
    }
}
