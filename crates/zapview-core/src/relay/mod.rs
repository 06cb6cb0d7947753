//! Relay access: the transport seam, its nostr-sdk implementation and the
//! gateway the rest of the pipeline talks to.

mod gateway;
mod nostr_transport;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use gateway::{GatewayEvent, RelayGateway, Subscription};
pub use nostr_transport::NostrRelayTransport;
pub use transport::{RelayTransport, TransportItem, TransportStream};
