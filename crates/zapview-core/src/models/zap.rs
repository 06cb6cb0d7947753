use std::sync::{Arc, OnceLock};

use nostr_sdk::prelude::*;
use serde::Deserialize;
use tracing::debug;

use super::tag_utils::extract_tag_str;

/// Zap events are shared between the cache, the display and background tasks
pub type SharedZap = Arc<ZapEvent>;

/// A zap receipt (kind:9735) accepted from a relay.
///
/// The wrapped event is immutable. The resolved reference and the decoded
/// invoice amount are filled in later by background tasks and can each be set
/// at most once.
#[derive(Debug)]
pub struct ZapEvent {
    event: Event,
    realtime: bool,
    reference: OnceLock<Arc<Event>>,
    amount_msats: OnceLock<u64>,
}

/// The paying identity recovered from the embedded zap request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapSender {
    pub pubkey: PublicKey,
    /// Comment attached to the zap, empty when none
    pub comment: String,
}

/// Loose shape of the kind:9734 zap request carried in the `description` tag
#[derive(Deserialize)]
struct ZapRequest {
    pubkey: String,
    #[serde(default)]
    content: String,
}

impl ZapEvent {
    pub fn new(event: Event, realtime: bool) -> Self {
        Self {
            event,
            realtime,
            reference: OnceLock::new(),
            amount_msats: OnceLock::new(),
        }
    }

    pub fn shared(event: Event, realtime: bool) -> SharedZap {
        Arc::new(Self::new(event, realtime))
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn id(&self) -> EventId {
        self.event.id
    }

    pub fn pubkey(&self) -> PublicKey {
        self.event.pubkey
    }

    pub fn created_at(&self) -> u64 {
        self.event.created_at.as_secs()
    }

    pub fn content(&self) -> &str {
        &self.event.content
    }

    /// True when the event arrived after the initial end-of-stored-events
    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// The bolt11 invoice carried by the receipt
    pub fn bolt11(&self) -> Option<&str> {
        extract_tag_str(&self.event, "bolt11")
    }

    /// Raw JSON of the embedded zap request
    pub fn description(&self) -> Option<&str> {
        extract_tag_str(&self.event, "description")
    }

    /// Id of the event this zap was sent for (first `e` tag)
    pub fn referenced_event_id(&self) -> Option<EventId> {
        extract_tag_str(&self.event, "e").and_then(|id| EventId::from_hex(id).ok())
    }

    /// Recover who paid, and their comment, from the description tag.
    ///
    /// Returns `None` when the description is missing or malformed; the display
    /// then shows the sender as anonymous.
    pub fn sender(&self) -> Option<ZapSender> {
        let description = self.description()?;
        let request: ZapRequest = match serde_json::from_str(description) {
            Ok(request) => request,
            Err(e) => {
                debug!(event_id = %self.event.id, error = %e, "malformed zap description");
                return None;
            }
        };
        let pubkey = PublicKey::from_hex(&request.pubkey).ok()?;
        Some(ZapSender {
            pubkey,
            comment: request.content,
        })
    }

    pub fn reference(&self) -> Option<&Arc<Event>> {
        self.reference.get()
    }

    /// Attach the resolved reference. Returns false if one was already set.
    pub fn set_reference(&self, reference: Arc<Event>) -> bool {
        self.reference.set(reference).is_ok()
    }

    pub fn amount_msats(&self) -> Option<u64> {
        self.amount_msats.get().copied()
    }

    /// Record the decoded amount. Returns false if one was already set.
    pub fn set_amount_msats(&self, msats: u64) -> bool {
        self.amount_msats.set(msats).is_ok()
    }
}

/// Colour tier of a zap amount, for displays that highlight large zaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountTier {
    Sats10k,
    Sats5k,
    Sats2k,
    Sats1k,
    Sats500,
    Sats200,
    Sats100,
    Default,
}

impl AmountTier {
    pub fn from_sats(sats: u64) -> Self {
        match sats {
            s if s >= 10_000 => Self::Sats10k,
            s if s >= 5_000 => Self::Sats5k,
            s if s >= 2_000 => Self::Sats2k,
            s if s >= 1_000 => Self::Sats1k,
            s if s >= 500 => Self::Sats500,
            s if s >= 200 => Self::Sats200,
            s if s >= 100 => Self::Sats100,
            _ => Self::Default,
        }
    }

    /// Tier to render with, honouring the view's colour mode
    pub fn for_display(sats: u64, color_mode: bool) -> Option<Self> {
        color_mode.then(|| Self::from_sats(sats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{zap_receipt, ZapSpec};

    #[test]
    fn test_sender_from_description() {
        let sender = Keys::generate();
        let event = zap_receipt(ZapSpec {
            created_at: 100,
            sender: Some(&sender),
            comment: "great post",
            ..Default::default()
        });
        let zap = ZapEvent::new(event, false);

        let parsed = zap.sender().expect("sender should parse");
        assert_eq!(parsed.pubkey, sender.public_key());
        assert_eq!(parsed.comment, "great post");
        assert_eq!(zap.created_at(), 100);
        assert!(!zap.is_realtime());
    }

    #[test]
    fn test_malformed_description_yields_no_sender() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::ZapReceipt, "")
            .tag(Tag::custom(
                TagKind::Custom(std::borrow::Cow::Borrowed("description")),
                vec!["{not json"],
            ))
            .sign_with_keys(&keys)
            .expect("Failed to sign event");

        assert!(ZapEvent::new(event, false).sender().is_none());
    }

    #[test]
    fn test_reference_and_amount_set_once() {
        let zap = ZapEvent::new(zap_receipt(ZapSpec::default()), true);
        let keys = Keys::generate();
        let first = Arc::new(
            EventBuilder::new(Kind::from(1), "first")
                .sign_with_keys(&keys)
                .unwrap(),
        );
        let second = Arc::new(
            EventBuilder::new(Kind::from(1), "second")
                .sign_with_keys(&keys)
                .unwrap(),
        );

        assert!(zap.set_reference(first.clone()));
        assert!(!zap.set_reference(second));
        assert_eq!(zap.reference().map(|r| r.id), Some(first.id));

        assert!(zap.set_amount_msats(21_000));
        assert!(!zap.set_amount_msats(1));
        assert_eq!(zap.amount_msats(), Some(21_000));
    }

    #[test]
    fn test_referenced_event_id() {
        let keys = Keys::generate();
        let target = EventBuilder::new(Kind::from(1), "target")
            .sign_with_keys(&keys)
            .unwrap();
        let zap = ZapEvent::new(
            zap_receipt(ZapSpec {
                referenced: Some(target.id),
                ..Default::default()
            }),
            false,
        );
        assert_eq!(zap.referenced_event_id(), Some(target.id));
        assert!(ZapEvent::new(zap_receipt(ZapSpec::default()), false)
            .referenced_event_id()
            .is_none());
    }

    #[test]
    fn test_amount_tiers() {
        assert_eq!(AmountTier::from_sats(21_000), AmountTier::Sats10k);
        assert_eq!(AmountTier::from_sats(1_000), AmountTier::Sats1k);
        assert_eq!(AmountTier::from_sats(99), AmountTier::Default);
        assert_eq!(AmountTier::for_display(5_000, false), None);
        assert_eq!(AmountTier::for_display(5_000, true), Some(AmountTier::Sats5k));
    }
}
