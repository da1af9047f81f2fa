//! Metrics.
//!
//! The teacher crate normally derives its metrics structs with the internal
//! `reth-metrics` proc-macro (`#[derive(Metrics)]` over a `reth_metrics::Metrics`
//! struct), which isn't usable outside the full reth workspace. We fall back
//! to driving the `metrics` facade crate directly — still the teacher's
//! dependency, just without the derive sugar — which is the same thing
//! `reth-network`'s `Cargo.toml` lists `metrics.workspace = true` for in the
//! first place. See DESIGN.md for this substitution.

/// Every counter and gauge the spec (§6/§7) requires.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetcherMetrics;

impl FetcherMetrics {
    /// An announcement batch arrived.
    pub fn announce_in(&self, count: u64) {
        metrics::counter!("tx_fetcher.announce.in").increment(count);
    }

    /// Announced hashes already present in the local pool.
    pub fn announce_known(&self, count: u64) {
        metrics::counter!("tx_fetcher.announce.known").increment(count);
    }

    /// Announced hashes rejected via the underpriced negative cache.
    pub fn announce_underpriced(&self, count: u64) {
        metrics::counter!("tx_fetcher.announce.underpriced").increment(count);
    }

    /// Announced hashes dropped for exceeding the per-peer DoS cap.
    pub fn announce_dos(&self, count: u64) {
        metrics::counter!("tx_fetcher.announce.dos").increment(count);
    }

    /// Transactions delivered via broadcast.
    pub fn broadcast_in(&self, count: u64) {
        metrics::counter!("tx_fetcher.broadcast.in").increment(count);
    }

    /// Broadcast deliveries the pool already knew about.
    pub fn broadcast_known(&self, count: u64) {
        metrics::counter!("tx_fetcher.broadcast.known").increment(count);
    }

    /// Broadcast deliveries rejected as underpriced.
    pub fn broadcast_underpriced(&self, count: u64) {
        metrics::counter!("tx_fetcher.broadcast.underpriced").increment(count);
    }

    /// Broadcast deliveries rejected for any other reason.
    pub fn broadcast_other_reject(&self, count: u64) {
        metrics::counter!("tx_fetcher.broadcast.other_reject").increment(count);
    }

    /// Transactions delivered as a direct reply to a request.
    pub fn reply_in(&self, count: u64) {
        metrics::counter!("tx_fetcher.reply.in").increment(count);
    }

    /// Direct-reply deliveries the pool already knew about.
    pub fn reply_known(&self, count: u64) {
        metrics::counter!("tx_fetcher.reply.known").increment(count);
    }

    /// Direct-reply deliveries rejected as underpriced.
    pub fn reply_underpriced(&self, count: u64) {
        metrics::counter!("tx_fetcher.reply.underpriced").increment(count);
    }

    /// Direct-reply deliveries rejected for any other reason.
    pub fn reply_other_reject(&self, count: u64) {
        metrics::counter!("tx_fetcher.reply.other_reject").increment(count);
    }

    /// A `fetchTxs` request was dispatched.
    pub fn request_out(&self, count: u64) {
        metrics::counter!("tx_fetcher.request.out").increment(count);
    }

    /// A dispatched request failed to send.
    pub fn request_fail(&self, count: u64) {
        metrics::counter!("tx_fetcher.request.fail").increment(count);
    }

    /// A dispatched request was cleared by a (possibly partial) delivery.
    pub fn request_done(&self, count: u64) {
        metrics::counter!("tx_fetcher.request.done").increment(count);
    }

    /// A dispatched request timed out.
    pub fn request_timeout(&self, count: u64) {
        metrics::counter!("tx_fetcher.request.timeout").increment(count);
    }

    /// Updates the per-stage cardinality gauges.
    pub fn set_stage_gauges(&self, waiting: usize, queued: usize, fetching: usize, peers: usize) {
        metrics::gauge!("tx_fetcher.hashes.waiting").set(waiting as f64);
        metrics::gauge!("tx_fetcher.hashes.queued").set(queued as f64);
        metrics::gauge!("tx_fetcher.hashes.fetching").set(fetching as f64);
        metrics::gauge!("tx_fetcher.peers.tracked").set(peers as f64);
    }
}
