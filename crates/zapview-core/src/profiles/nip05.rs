use std::collections::HashMap;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use nostr_sdk::PublicKey;
use serde::Deserialize;

/// Checks that a NIP-05 address maps to a public key
pub trait Nip05Verifier: Send + Sync {
    fn verify<'a>(&'a self, nip05: &'a str, pubkey: &'a PublicKey) -> BoxFuture<'a, anyhow::Result<bool>>;
}

#[derive(Debug, Deserialize)]
struct WellKnown {
    #[serde(default)]
    names: HashMap<String, String>,
}

/// Split `name@domain` into its parts; a bare domain means the `_` name
pub fn split_address(nip05: &str) -> Option<(String, String)> {
    let nip05 = nip05.trim().to_ascii_lowercase();
    let (name, domain) = match nip05.split_once('@') {
        Some((name, domain)) => (name.to_string(), domain.to_string()),
        None => ("_".to_string(), nip05),
    };
    if name.is_empty() || domain.is_empty() || domain.contains('/') {
        return None;
    }
    Some((name, domain))
}

/// How a verified address is shown: `_@domain` collapses to `domain`
pub fn display_address(nip05: &str) -> String {
    let nip05 = nip05.trim();
    nip05.strip_prefix("_@").unwrap_or(nip05).to_string()
}

/// Verifies against `https://<domain>/.well-known/nostr.json`
pub struct HttpNip05Verifier {
    client: reqwest::Client,
}

impl Default for HttpNip05Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpNip05Verifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn lookup(&self, nip05: &str, pubkey: &PublicKey) -> anyhow::Result<bool> {
        let (name, domain) =
            split_address(nip05).with_context(|| format!("Invalid NIP-05 address: {nip05}"))?;
        let url = format!("https://{domain}/.well-known/nostr.json?name={name}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send NIP-05 request")?;
        if !response.status().is_success() {
            anyhow::bail!("NIP-05 lookup failed ({}) for {}", response.status(), nip05);
        }

        let well_known: WellKnown = response
            .json()
            .await
            .context("Failed to parse nostr.json")?;
        Ok(well_known
            .names
            .get(&name)
            .is_some_and(|hex| hex.eq_ignore_ascii_case(&pubkey.to_hex())))
    }
}

impl Nip05Verifier for HttpNip05Verifier {
    fn verify<'a>(&'a self, nip05: &'a str, pubkey: &'a PublicKey) -> BoxFuture<'a, anyhow::Result<bool>> {
        self.lookup(nip05, pubkey).boxed()
    }
}
