//! The event loop: the single task that owns a [`TransactionFetcher`] and
//! drives it from the four ingress channels plus the two recomputed timers.
//!
//! The teacher's `NetworkManager` drives its `Swarm` by hand-implementing
//! `Future::poll` over a `Stream`. We reach for `tokio::select!` instead —
//! the idiomatic equivalent once the driving events are channels and timers
//! rather than a custom `Stream`, and it keeps the per-iteration "recompute
//! both timer deadlines, then wait" structure explicit rather than buried in
//! a hand-rolled `poll_next`. See SPEC_FULL.md §10 for the reth precedent
//! (`reth-network` itself switched away from this file's older manual-poll
//! style over time).

use crate::{
    clock::Clock,
    fetcher::TransactionFetcher,
    handle::{FetcherChannels, FetcherHandle},
    handlers::{PeerControl, PeerFetch, TxPool},
    types::{PoolOutcome, TxLike},
};
use std::{fmt, marker::PhantomData, sync::Arc};
use tokio::{sync::mpsc, time::Instant};

/// Drives one [`TransactionFetcher`] to completion.
///
/// Generic over the transaction type `T` and the two remaining
/// external-collaborator traits (§1's injected seams) — the pool itself is
/// only ever touched by the paired [`FetcherHandle`], not by the loop.
pub struct FetcherService<T, Fetch, Control> {
    fetcher: TransactionFetcher,
    channels: FetcherChannels,
    peer_fetch: Arc<Fetch>,
    peer_control: Arc<Control>,
    clock: Arc<dyn Clock>,
    step: Option<mpsc::UnboundedSender<()>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, Fetch, Control> fmt::Debug for FetcherService<T, Fetch, Control>
where
    Fetch: fmt::Debug,
    Control: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherService")
            .field("fetcher", &self.fetcher)
            .field("peer_fetch", &self.peer_fetch)
            .field("peer_control", &self.peer_control)
            .finish_non_exhaustive()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T, Fetch, Control> FetcherService<T, Fetch, Control>
where
    T: TxLike,
    Fetch: PeerFetch,
    Control: PeerControl,
{
    /// Builds a service and its paired handle, the latter backed by `pool`.
    pub fn new(
        fetcher: TransactionFetcher,
        pool: Arc<dyn TxPool<T>>,
        peer_fetch: Arc<Fetch>,
        peer_control: Arc<Control>,
        clock: Arc<dyn Clock>,
    ) -> (Self, FetcherHandle<T>) {
        let (handle, channels) = FetcherHandle::new(pool);
        let service =
            Self { fetcher, channels, peer_fetch, peer_control, clock, step: None, _marker: PhantomData };
        (service, handle)
    }

    /// Installs a step notifier, fired once per loop iteration. Test-only
    /// hook for deterministically synchronizing with the loop (SPEC_FULL.md
    /// §10) instead of sleeping and hoping.
    pub fn with_step_notifier(mut self, step: mpsc::UnboundedSender<()>) -> Self {
        self.step = Some(step);
        self
    }

    fn wait_deadline(&self) -> Option<Instant> {
        self.fetcher
            .earliest_waittime()
            .map(|t| t + self.fetcher.config.arrive_timeout - self.fetcher.config.gather_slack)
    }

    fn timeout_deadline(&self) -> Option<Instant> {
        self.fetcher
            .earliest_request_time()
            .map(|t| t + self.fetcher.config.fetch_timeout - self.fetcher.config.gather_slack)
    }

    fn publish_gauges(&self) {
        let (waiting, queued, fetching) = self.fetcher.stage_counts();
        self.fetcher.metrics.set_stage_gauges(waiting, queued, fetching, self.fetcher.tracked_peer_count());
    }

    fn dispatch(&mut self, now: Instant, whitelist: Option<&crate::fetcher::FnvHashSet<crate::types::PeerId>>) {
        let batches = self.fetcher.schedule_fetches(now, whitelist);
        for batch in batches {
            let peer_fetch = self.peer_fetch.clone();
            let drop_tx = self.channels.drop_peer_tx.clone();
            let metrics = self.fetcher.metrics;
            let peer = batch.peer;
            let hashes = batch.hashes;
            tokio::spawn(async move {
                if let Err(_err) = peer_fetch.fetch_txs(peer.clone(), hashes).await {
                    metrics.request_fail(1);
                    tracing::warn!(target: "net::tx", %peer, "fetch_txs request failed, dropping peer");
                    let _ = drop_tx.send(peer).await;
                }
            });
        }
    }

    fn signal_step(&self) {
        if let Some(step) = &self.step {
            let _ = step.send(());
        }
    }

    /// Runs until a `quit` is received or every sender side of the four
    /// channels has been dropped.
    pub async fn run(mut self) {
        loop {
            let wait_deadline = self.wait_deadline();
            let timeout_deadline = self.timeout_deadline();

            tokio::select! {
                biased;

                _ = self.channels.quit.recv() => {
                    tracing::debug!(target: "net::tx", "transaction fetcher shutting down");
                    break
                }

                Some(ev) = self.channels.announce.recv() => {
                    let now = self.clock.now();
                    let outcome = self.fetcher.on_announce(&ev.peer, ev.items, now);
                    if outcome.schedule_peer {
                        let mut whitelist = crate::fetcher::FnvHashSet::default();
                        whitelist.insert(ev.peer);
                        self.dispatch(now, Some(&whitelist));
                    }
                    self.publish_gauges();
                }

                Some(ev) = self.channels.deliver.recv() => {
                    let now = self.clock.now();

                    for d in &ev.delivered {
                        record_pool_outcome(&self.fetcher.metrics, ev.direct, d.outcome);
                        if d.outcome.is_underpriced() {
                            self.fetcher.underpriced.insert(d.hash, now);
                        }
                    }

                    let outcome = self.fetcher.on_deliver(&ev.peer, &ev.delivered, ev.direct, &ev.requested_order, now);

                    if let Some(reason) = outcome.drop_peer {
                        self.fetcher.on_drop_peer(&ev.peer);
                        self.peer_control.drop_peer(ev.peer.clone(), reason);
                    } else if !outcome.touched.is_empty() {
                        self.dispatch(now, Some(&outcome.touched));
                    }
                    self.publish_gauges();
                }

                Some(peer) = self.channels.drop_peer.recv() => {
                    let now = self.clock.now();
                    let outcome = self.fetcher.on_drop_peer(&peer);
                    if outcome.had_in_flight && !outcome.touched.is_empty() {
                        self.dispatch(now, Some(&outcome.touched));
                    }
                    self.publish_gauges();
                }

                _ = sleep_until_opt(wait_deadline) => {
                    let now = self.clock.now();
                    let actives = self.fetcher.promote_waiting(now);
                    if !actives.is_empty() {
                        self.dispatch(now, Some(&actives));
                    }
                    self.publish_gauges();
                }

                _ = sleep_until_opt(timeout_deadline) => {
                    let now = self.clock.now();
                    let outcome = self.fetcher.sweep_timeouts(now);
                    if !outcome.touched.is_empty() {
                        self.dispatch(now, Some(&outcome.touched));
                    }
                    self.publish_gauges();
                }

                else => break,
            }

            self.signal_step();
        }
    }
}

/// Classifies a pool verdict into the metrics bucket it belongs to (§6/§7),
/// shared between the broadcast and direct-reply accounting paths.
fn record_pool_outcome(metrics: &crate::metrics::FetcherMetrics, direct: bool, outcome: PoolOutcome) {
    match outcome {
        PoolOutcome::AlreadyKnown if direct => metrics.reply_known(1),
        PoolOutcome::AlreadyKnown => metrics.broadcast_known(1),
        PoolOutcome::Underpriced | PoolOutcome::ReplaceUnderpriced if direct => metrics.reply_underpriced(1),
        PoolOutcome::Underpriced | PoolOutcome::ReplaceUnderpriced => metrics.broadcast_underpriced(1),
        PoolOutcome::Accepted => {}
        PoolOutcome::OtherReject if direct => metrics.reply_other_reject(1),
        PoolOutcome::OtherReject => metrics.broadcast_other_reject(1),
    }
}
