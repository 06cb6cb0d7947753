//! Aggregate zap statistics.
//!
//! Incremental accumulation and full recomputation share one fold step, so
//! for any arrival order of the same final event set both produce the same
//! result.

mod nostr_band;

pub use nostr_band::NostrBandStats;

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::UndecodedAmountPolicy;
use crate::decode::{InvoiceDecoder, StatsTarget};
use crate::models::ZapEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapStats {
    pub count: u64,
    pub msats: u64,
    pub max_msats: u64,
}

impl ZapStats {
    /// Next aggregate after one more zap of `amount_msats`
    pub fn increment(self, amount_msats: u64) -> Self {
        Self {
            count: self.count + 1,
            msats: self.msats.saturating_add(amount_msats),
            max_msats: self.max_msats.max(amount_msats),
        }
    }

    /// Fold step used by both accumulation paths
    pub fn apply(self, amount_msats: Option<u64>, policy: UndecodedAmountPolicy) -> Self {
        match (amount_msats, policy) {
            (Some(amount), _) => self.increment(amount),
            (None, UndecodedAmountPolicy::CountOnly) => self.increment(0),
            (None, UndecodedAmountPolicy::Exclude) => self,
        }
    }

    pub fn recompute<I>(amounts: I, policy: UndecodedAmountPolicy) -> Self
    where
        I: IntoIterator<Item = Option<u64>>,
    {
        amounts
            .into_iter()
            .fold(Self::default(), |stats, amount| stats.apply(amount, policy))
    }

    pub fn sats(&self) -> u64 {
        self.msats / 1000
    }

    pub fn max_sats(&self) -> u64 {
        self.max_msats / 1000
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// What the display is told about a view's statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsView {
    Available(ZapStats),
    /// The external query timed out or failed
    Unavailable,
}

/// Source of precomputed aggregates, queried when a view has no local data.
pub trait AggregateStatsSource: Send + Sync {
    /// `Ok(None)` when the source has no figures for `target`
    fn fetch_stats<'a>(&'a self, target: &'a StatsTarget) -> BoxFuture<'a, anyhow::Result<Option<ZapStats>>>;
}

pub struct StatsAggregator {
    decoder: Arc<dyn InvoiceDecoder>,
    policy: UndecodedAmountPolicy,
    external: Option<Arc<dyn AggregateStatsSource>>,
    query_timeout: Duration,
}

impl StatsAggregator {
    pub fn new(
        decoder: Arc<dyn InvoiceDecoder>,
        policy: UndecodedAmountPolicy,
        external: Option<Arc<dyn AggregateStatsSource>>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            decoder,
            policy,
            external,
            query_timeout,
        }
    }

    pub fn policy(&self) -> UndecodedAmountPolicy {
        self.policy
    }

    /// Decode the receipt's invoice amount, recording it on the event once.
    pub fn decode_amount(&self, zap: &ZapEvent) -> Option<u64> {
        if let Some(amount) = zap.amount_msats() {
            return Some(amount);
        }
        let Some(invoice) = zap.bolt11() else {
            debug!(event_id = %zap.id(), "zap receipt has no bolt11 tag");
            return None;
        };
        let Some(amount) = self.decoder.amount_msats(invoice) else {
            debug!(event_id = %zap.id(), "undecodable invoice amount");
            return None;
        };
        zap.set_amount_msats(amount);
        zap.amount_msats()
    }

    pub fn accumulate(&self, current: ZapStats, zap: &ZapEvent) -> ZapStats {
        current.apply(self.decode_amount(zap), self.policy)
    }

    pub fn recompute<'a, I>(&self, zaps: I) -> ZapStats
    where
        I: IntoIterator<Item = &'a ZapEvent>,
    {
        ZapStats::recompute(zaps.into_iter().map(|zap| self.decode_amount(zap)), self.policy)
    }

    /// Statistics to present for a view whose local aggregate is `local`.
    ///
    /// Local data wins. Without it the external source is asked, bounded by the
    /// query timeout; a timeout or failure yields [`StatsView::Unavailable`].
    pub async fn query(&self, local: ZapStats, target: Option<&StatsTarget>) -> StatsView {
        if !local.is_empty() {
            return StatsView::Available(local);
        }
        let (Some(external), Some(target)) = (self.external.as_ref(), target) else {
            return StatsView::Available(local);
        };

        match tokio::time::timeout(self.query_timeout, external.fetch_stats(target)).await {
            Ok(Ok(Some(stats))) => StatsView::Available(stats),
            Ok(Ok(None)) => StatsView::Available(local),
            Ok(Err(e)) => {
                warn!(?target, error = %e, "external stats query failed");
                StatsView::Unavailable
            }
            Err(_) => {
                debug!(?target, timeout = ?self.query_timeout, "external stats query timed out");
                StatsView::Unavailable
            }
        }
    }
}
