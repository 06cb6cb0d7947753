//! Decoders the pipeline treats as opaque collaborators.
//!
//! `IdentifierDecoder` turns a content identifier into relay filters and
//! `InvoiceDecoder` turns a bolt11 invoice into an amount. Both are traits so a
//! host can substitute its own grammar; NIP-19 and bolt11 implementations are
//! provided.

mod bolt11;
mod identifier;

pub use bolt11::Bolt11AmountDecoder;
pub use identifier::Nip19Decoder;

use nostr_sdk::Filter;

/// What a content identifier points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// A single event (`note`, `nevent`); zaps need no reference resolution
    EventPointer,
    /// An addressable event (`naddr`)
    Coordinate,
    /// A profile (`npub`, `nprofile`)
    Profile,
}

/// Subject of an external aggregate stats query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsTarget {
    Event(String),
    Profile(String),
}

pub trait IdentifierDecoder: Send + Sync {
    /// Build the zap receipt filter for `identifier`.
    ///
    /// `until` bounds `created_at` from above and `limit` caps the page size.
    /// Returns `None` when the identifier cannot be decoded.
    fn decode(&self, identifier: &str, until: Option<u64>, limit: usize) -> Option<Filter>;

    fn classify(&self, identifier: &str) -> Option<IdentifierKind>;

    /// Target for the external stats fallback, if the identifier has one
    fn stats_target(&self, identifier: &str) -> Option<StatsTarget>;
}

pub trait InvoiceDecoder: Send + Sync {
    /// Amount of the invoice in millisatoshis; `None` if absent or undecodable
    fn amount_msats(&self, invoice: &str) -> Option<u64>;
}
