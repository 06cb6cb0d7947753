use nostr_sdk::prelude::*;

use super::{IdentifierDecoder, IdentifierKind, StatsTarget};

/// Decodes NIP-19 bech32 identifiers (optionally `nostr:`-prefixed)
#[derive(Debug, Clone, Copy, Default)]
pub struct Nip19Decoder;

enum Target {
    Event(EventId),
    Profile(PublicKey),
    Coordinate(Coordinate),
}

fn parse(identifier: &str) -> Option<Target> {
    let bech32 = identifier.trim();
    let bech32 = bech32.strip_prefix("nostr:").unwrap_or(bech32);
    match Nip19::from_bech32(bech32).ok()? {
        Nip19::EventId(id) => Some(Target::Event(id)),
        Nip19::Event(event) => Some(Target::Event(event.event_id)),
        Nip19::Pubkey(pubkey) => Some(Target::Profile(pubkey)),
        Nip19::Profile(profile) => Some(Target::Profile(profile.public_key)),
        Nip19::Coordinate(coordinate) => Some(Target::Coordinate(coordinate.coordinate)),
        _ => None,
    }
}

impl IdentifierDecoder for Nip19Decoder {
    fn decode(&self, identifier: &str, until: Option<u64>, limit: usize) -> Option<Filter> {
        let filter = Filter::new().kind(Kind::ZapReceipt).limit(limit);
        let filter = match parse(identifier)? {
            Target::Event(id) => filter.event(id),
            Target::Profile(pubkey) => filter.pubkey(pubkey),
            Target::Coordinate(coordinate) => filter.coordinate(&coordinate),
        };
        Some(match until {
            Some(until) => filter.until(Timestamp::from(until)),
            None => filter,
        })
    }

    fn classify(&self, identifier: &str) -> Option<IdentifierKind> {
        Some(match parse(identifier)? {
            Target::Event(_) => IdentifierKind::EventPointer,
            Target::Profile(_) => IdentifierKind::Profile,
            Target::Coordinate(_) => IdentifierKind::Coordinate,
        })
    }

    fn stats_target(&self, identifier: &str) -> Option<StatsTarget> {
        match parse(identifier)? {
            Target::Event(id) => Some(StatsTarget::Event(id.to_hex())),
            Target::Profile(pubkey) => Some(StatsTarget::Profile(pubkey.to_hex())),
            Target::Coordinate(_) => None,
        }
    }
}
