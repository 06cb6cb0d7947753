use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::Value;

use super::{AggregateStatsSource, ZapStats};
use crate::decode::StatsTarget;

/// Zap totals as reported by the nostr.band stats API
#[derive(Debug, Deserialize)]
struct ZapTotals {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    msats: u64,
    #[serde(default)]
    max_msats: u64,
}

impl From<ZapTotals> for ZapStats {
    fn from(totals: ZapTotals) -> Self {
        Self {
            count: totals.count,
            msats: totals.msats,
            max_msats: totals.max_msats,
        }
    }
}

/// Client for the nostr.band aggregate stats API
pub struct NostrBandStats {
    base_url: String,
    client: reqwest::Client,
}

impl NostrBandStats {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, target: &StatsTarget) -> (String, &'static str, String) {
        match target {
            StatsTarget::Event(id) => (format!("{}/v0/stats/event/{}", self.base_url, id), "zaps", id.clone()),
            StatsTarget::Profile(pubkey) => (
                format!("{}/v0/stats/profile/{}", self.base_url, pubkey),
                "zaps_received",
                pubkey.clone(),
            ),
        }
    }

    async fn get_stats(&self, target: &StatsTarget) -> anyhow::Result<Option<ZapStats>> {
        let (url, field, key) = self.endpoint(target);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request to stats API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Stats API error ({}): {}", status, error_text);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse stats API response")?;
        parse_totals(&body, &key, field)
    }
}

/// Extract `stats.<key>.<field>` from a stats API response body
fn parse_totals(body: &Value, key: &str, field: &str) -> anyhow::Result<Option<ZapStats>> {
    let Some(totals) = body.get("stats").and_then(|s| s.get(key)).and_then(|s| s.get(field)) else {
        return Ok(None);
    };
    let totals: ZapTotals =
        serde_json::from_value(totals.clone()).context("Unexpected zap totals shape")?;
    Ok(Some(totals.into()))
}

impl AggregateStatsSource for NostrBandStats {
    fn fetch_stats<'a>(&'a self, target: &'a StatsTarget) -> BoxFuture<'a, anyhow::Result<Option<ZapStats>>> {
        self.get_stats(target).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let api = NostrBandStats::new("https://api.nostr.band/");
        let (url, field, _) = api.endpoint(&StatsTarget::Event("abc".into()));
        assert_eq!(url, "https://api.nostr.band/v0/stats/event/abc");
        assert_eq!(field, "zaps");

        let (url, field, _) = api.endpoint(&StatsTarget::Profile("def".into()));
        assert_eq!(url, "https://api.nostr.band/v0/stats/profile/def");
        assert_eq!(field, "zaps_received");
    }

    #[test]
    fn test_parse_totals() {
        let body = serde_json::json!({
            "stats": {
                "abc": {
                    "zaps": {"count": 4, "msats": 84000, "min_msats": 1000, "max_msats": 50000}
                }
            }
        });
        assert_eq!(
            parse_totals(&body, "abc", "zaps").unwrap(),
            Some(ZapStats {
                count: 4,
                msats: 84_000,
                max_msats: 50_000
            })
        );
        assert_eq!(parse_totals(&body, "other", "zaps").unwrap(), None);

        let bad = serde_json::json!({"stats": {"abc": {"zaps": {"count": "four"}}}});
        assert!(parse_totals(&bad, "abc", "zaps").is_err());
    }
}
