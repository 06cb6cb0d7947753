//! Sender profiles and NIP-05 identity checks.
//!
//! Profiles are fetched from the profile relay pool through a batch processor
//! keyed by pubkey, so concurrent views asking for the same sender share one
//! request.

mod nip05;

pub use nip05::{display_address, split_address, HttpNip05Verifier, Nip05Verifier};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::batch::{BatchFetcher, BatchRequestProcessor, BatchSettings};
use crate::config::CoreConfig;
use crate::models::Profile;
use crate::relay::RelayGateway;
use crate::store::{CacheAside, TtlCache};

/// Outcome of a NIP-05 check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityStatus {
    /// Address confirmed; carries the address as it should be displayed
    Verified(String),
    Mismatch,
    /// No address, or the check failed or timed out
    Unknown,
}

impl IdentityStatus {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Verified(_) => Some(true),
            Self::Mismatch => Some(false),
            Self::Unknown => None,
        }
    }
}

/// Grouped kind:0 lookup over the profile relays
struct MetadataFetcher {
    gateway: Arc<RelayGateway>,
    relays: Vec<String>,
    timeout: Duration,
}

impl BatchFetcher<PublicKey, Profile> for MetadataFetcher {
    fn fetch_batch(&self, keys: Vec<PublicKey>) -> BoxFuture<'static, anyhow::Result<HashMap<PublicKey, Profile>>> {
        let gateway = self.gateway.clone();
        let relays = self.relays.clone();
        let timeout = self.timeout;

        async move {
            let filter = Filter::new().kind(Kind::Metadata).authors(keys);
            let events = gateway.fetch_many(&relays, filter, timeout).await;

            // Relays may return several versions; keep the newest per author
            let mut newest: HashMap<PublicKey, Event> = HashMap::new();
            for event in events {
                match newest.get(&event.pubkey) {
                    Some(current) if current.created_at >= event.created_at => {}
                    _ => {
                        newest.insert(event.pubkey, event);
                    }
                }
            }

            Ok(newest
                .into_iter()
                .filter_map(|(pubkey, event)| {
                    let profile = Profile::from_metadata_event(&event);
                    if profile.is_none() {
                        debug!(%pubkey, event_id = %event.id, "malformed metadata content");
                    }
                    Some((pubkey, profile?))
                })
                .collect())
        }
        .boxed()
    }
}

pub struct ProfileResolver {
    gateway: Arc<RelayGateway>,
    relays: Vec<String>,
    cache: Mutex<TtlCache<PublicKey, Profile>>,
    batch: BatchRequestProcessor<PublicKey, Profile>,
    identities: CacheAside<PublicKey, IdentityStatus>,
    verifier: Arc<dyn Nip05Verifier>,
    nip05_timeout: Duration,
}

impl ProfileResolver {
    /// `gateway` should be connected to the profile relay pool.
    pub fn new(gateway: Arc<RelayGateway>, config: &CoreConfig, verifier: Arc<dyn Nip05Verifier>) -> Self {
        let fetcher = MetadataFetcher {
            gateway: gateway.clone(),
            relays: config.profile_relays.clone(),
            timeout: config.metadata_timeout(),
        };
        let batch = BatchRequestProcessor::new(
            Arc::new(fetcher),
            BatchSettings {
                max_batch_size: config.profile_batch_size,
                batch_delay: config.profile_batch_delay(),
                fetch_timeout: config.metadata_timeout(),
            },
        );

        Self {
            gateway,
            relays: config.profile_relays.clone(),
            cache: Mutex::new(TtlCache::new(config.profile_cache_ttl())),
            batch,
            identities: CacheAside::new(config.profile_cache_ttl()),
            verifier,
            nip05_timeout: config.nip05_timeout(),
        }
    }

    /// Open connections to the profile relays
    pub async fn connect(&self) -> usize {
        self.gateway.connect(&self.relays).await
    }

    /// Resolve profiles for `pubkeys`.
    ///
    /// Fresh cache entries are returned directly; the rest go through the
    /// batch processor. A failed lookup keeps a previously known profile and
    /// otherwise resolves to [`Profile::anonymous`], which is then cached like
    /// any other result.
    pub async fn fetch_many(&self, pubkeys: &[PublicKey]) -> HashMap<PublicKey, Profile> {
        let mut resolved = HashMap::with_capacity(pubkeys.len());
        let mut missing: Vec<PublicKey> = Vec::new();
        {
            let cache = self.cache.lock();
            for pubkey in pubkeys {
                match cache.get(pubkey) {
                    Some(profile) => {
                        resolved.insert(*pubkey, profile.clone());
                    }
                    None if !missing.contains(pubkey) => missing.push(*pubkey),
                    None => {}
                }
            }
        }
        if missing.is_empty() {
            return resolved;
        }
        trace!(cached = resolved.len(), missing = missing.len(), "resolving profiles");

        let waiters: Vec<_> = missing.iter().map(|pubkey| self.batch.get_or_create(*pubkey)).collect();
        let results = join_all(waiters).await;

        let mut cache = self.cache.lock();
        for (pubkey, fetched) in missing.into_iter().zip(results) {
            let known = cache.get_stale(&pubkey).cloned();
            let profile = match (fetched, known) {
                (Some(fetched), Some(known)) if known.event_created_at > fetched.event_created_at => known,
                (Some(fetched), _) => fetched,
                (None, Some(known)) => {
                    debug!(%pubkey, "profile refresh failed, keeping known profile");
                    known
                }
                (None, None) => Profile::anonymous(),
            };
            cache.insert(pubkey, profile.clone());
            resolved.insert(pubkey, profile);
        }
        resolved
    }

    pub async fn fetch_one(&self, pubkey: PublicKey) -> Profile {
        self.fetch_many(&[pubkey])
            .await
            .remove(&pubkey)
            .unwrap_or_else(Profile::anonymous)
    }

    pub fn cached(&self, pubkey: &PublicKey) -> Option<Profile> {
        self.cache.lock().get(pubkey).cloned()
    }

    /// Check the profile's NIP-05 address. One check per pubkey is in flight
    /// at a time and its result is cached; a timeout resolves to `Unknown`.
    pub async fn verify_identity(&self, pubkey: PublicKey) -> IdentityStatus {
        let Some(nip05) = self.fetch_one(pubkey).await.nip05 else {
            return IdentityStatus::Unknown;
        };
        let verifier = self.verifier.clone();
        let timeout = self.nip05_timeout;

        self.identities
            .get_or_fetch(pubkey, move || {
                async move {
                    match tokio::time::timeout(timeout, verifier.verify(&nip05, &pubkey)).await {
                        Ok(Ok(true)) => IdentityStatus::Verified(display_address(&nip05)),
                        Ok(Ok(false)) => IdentityStatus::Mismatch,
                        Ok(Err(e)) => {
                            debug!(%pubkey, nip05 = %nip05, error = %e, "NIP-05 check failed");
                            IdentityStatus::Unknown
                        }
                        Err(_) => {
                            debug!(%pubkey, nip05 = %nip05, "NIP-05 check timed out");
                            IdentityStatus::Unknown
                        }
                    }
                }
                .boxed()
            })
            .await
    }

    /// Drop cached profiles, cached verifications and pending lookups
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        self.identities.clear();
        self.batch.clear_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_PROFILE_NAME;
    use crate::relay::testing::ScriptedTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metadata(keys: &Keys, content: &str, created_at: u64) -> Event {
        EventBuilder::new(Kind::Metadata, content)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .expect("Failed to sign event")
    }

    struct CountingVerifier {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl Nip05Verifier for CountingVerifier {
        fn verify<'a>(&'a self, _nip05: &'a str, _pubkey: &'a PublicKey) -> BoxFuture<'a, anyhow::Result<bool>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(true)
            }
            .boxed()
        }
    }

    fn resolver(transport: Arc<ScriptedTransport>, verifier: Arc<CountingVerifier>) -> ProfileResolver {
        let config = CoreConfig::default();
        let gateway = Arc::new(RelayGateway::new(transport, config.load_timeout()));
        ProfileResolver::new(gateway, &config, verifier)
    }

    fn verifier(delay: Option<Duration>) -> Arc<CountingVerifier> {
        Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_many_batches_and_caches() {
        let transport = Arc::new(ScriptedTransport::new());
        let alice = Keys::generate();
        let bob = Keys::generate();
        let nobody = Keys::generate();
        transport.store(metadata(&alice, r#"{"name": "alice"}"#, 10));
        transport.store(metadata(&alice, r#"{"name": "alice v2"}"#, 20));
        transport.store(metadata(&bob, "garbage", 10));
        let resolver = resolver(transport.clone(), verifier(None));

        let keys = [alice.public_key(), bob.public_key(), nobody.public_key()];
        let profiles = resolver.fetch_many(&keys).await;
        assert_eq!(profiles[&alice.public_key()].name, "alice v2");
        assert_eq!(profiles[&bob.public_key()].name, DEFAULT_PROFILE_NAME);
        assert_eq!(profiles[&nobody.public_key()].name, DEFAULT_PROFILE_NAME);
        assert_eq!(transport.fetch_calls(), 1);

        // Same names again, straight from the cache
        let again = resolver.fetch_many(&keys).await;
        assert_eq!(again, profiles);
        assert_eq!(transport.fetch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_known_profile() {
        let transport = Arc::new(ScriptedTransport::new());
        let alice = Keys::generate();
        transport.store(metadata(&alice, r#"{"display_name": "Alice"}"#, 10));
        let resolver = resolver(transport.clone(), verifier(None));

        assert_eq!(resolver.fetch_one(alice.public_key()).await.name, "Alice");

        transport.clear_stored();
        tokio::time::advance(CoreConfig::default().profile_cache_ttl() + Duration::from_secs(1)).await;
        assert!(resolver.cached(&alice.public_key()).is_none());

        assert_eq!(resolver.fetch_one(alice.public_key()).await.name, "Alice");
        assert_eq!(transport.fetch_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_identity_single_flight() {
        let transport = Arc::new(ScriptedTransport::new());
        let carol = Keys::generate();
        transport.store(metadata(&carol, r#"{"name": "carol", "nip05": "_@example.com"}"#, 10));
        let verifier = verifier(None);
        let resolver = resolver(transport, verifier.clone());

        let (first, second) = tokio::join!(
            resolver.verify_identity(carol.public_key()),
            resolver.verify_identity(carol.public_key())
        );
        assert_eq!(first, IdentityStatus::Verified("example.com".to_string()));
        assert_eq!(second, first);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.as_bool(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_identity_timeout_and_missing_address() {
        let transport = Arc::new(ScriptedTransport::new());
        let dave = Keys::generate();
        let erin = Keys::generate();
        transport.store(metadata(&dave, r#"{"name": "dave", "nip05": "dave@example.com"}"#, 10));
        transport.store(metadata(&erin, r#"{"name": "erin"}"#, 10));
        let resolver = resolver(transport, verifier(Some(Duration::from_secs(60))));

        assert_eq!(resolver.verify_identity(dave.public_key()).await, IdentityStatus::Unknown);
        assert_eq!(resolver.verify_identity(erin.public_key()).await.as_bool(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache() {
        let transport = Arc::new(ScriptedTransport::new());
        let alice = Keys::generate();
        transport.store(metadata(&alice, r#"{"name": "alice"}"#, 10));
        let resolver = resolver(transport.clone(), verifier(None));

        resolver.fetch_one(alice.public_key()).await;
        resolver.clear_cache();
        assert!(resolver.cached(&alice.public_key()).is_none());
        resolver.fetch_one(alice.public_key()).await;
        assert_eq!(transport.fetch_calls(), 2);
    }
}
