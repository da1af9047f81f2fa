//! The cloneable front-end handed out to callers (peer sessions, the block
//! downloader's tx-broadcast path, peer-management code).
//!
//! Modeled on the teacher's `NetworkHandle`/`HeadersDownloader` pattern: a
//! small `Clone` struct wrapping channel senders, with the actual state
//! machine living in a background task reachable only through those
//! channels.

use crate::{
    error::Terminated,
    event::{AnnounceEvent, DeliverEvent},
    handlers::TxPool,
    metrics::FetcherMetrics,
    types::{AnnounceItem, DeliveredTx, PeerId, PoolOutcome, TxLike},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Delivery pre-processing batch size (§4.5): `addTxs` is never called with
/// more than this many transactions at once.
const DELIVERY_BATCH_SIZE: usize = 128;

/// Above this fraction of "other reject" verdicts in a batch, the caller
/// sleeps before presenting the next one — soft backpressure against peers
/// flooding junk (§4.5).
const OTHER_REJECT_BACKPRESSURE_RATIO: f64 = 0.25;

/// How long to sleep when the backpressure ratio is exceeded.
const OTHER_REJECT_BACKPRESSURE_SLEEP: Duration = Duration::from_millis(200);

/// Sole way to reach a running [`crate::service::FetcherService`].
///
/// Cloning is cheap (an `Arc`'d sender bundle); every clone talks to the same
/// loop. Every method returns `Err(Terminated)` once the loop has shut down,
/// mirroring the teacher's handle methods returning an error on a closed
/// channel instead of panicking.
///
/// Generic over the embedding pool's transaction type `T`: [`Self::enqueue`]
/// submits delivered bodies to the pool itself (outside the loop, same as
/// the `hasTx` pre-filter in [`Self::notify`]) and forwards only the
/// resolved `(hash, observed metadata, verdict)` triples onward.
#[derive(Debug, Clone)]
pub struct FetcherHandle<T> {
    inner: Arc<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    announce: mpsc::Sender<AnnounceEvent>,
    deliver: mpsc::Sender<DeliverEvent>,
    drop_peer: mpsc::Sender<PeerId>,
    quit: mpsc::Sender<()>,
    metrics: FetcherMetrics,
    pool: Arc<dyn TxPool<T>>,
}

/// The channel endpoints a [`crate::service::FetcherService`] is constructed
/// from; paired with the [`FetcherHandle`] returned alongside it.
#[derive(Debug)]
pub struct FetcherChannels {
    pub announce: mpsc::Receiver<AnnounceEvent>,
    pub deliver: mpsc::Receiver<DeliverEvent>,
    pub drop_peer: mpsc::Receiver<PeerId>,
    pub quit: mpsc::Receiver<()>,
    /// A clone of the `drop_peer` sender, so the service can self-report a
    /// drop (e.g. a spawned `fetch_txs` call failing, §4.3/§7) without
    /// routing back out through a [`FetcherHandle`].
    pub drop_peer_tx: mpsc::Sender<PeerId>,
}

/// Channel capacity for each of the four ingress queues. Bounded so a slow
/// loop applies backpressure to callers rather than growing unboundedly.
const CHANNEL_CAPACITY: usize = 4096;

impl<T> FetcherHandle<T>
where
    T: TxLike,
{
    /// Builds a fresh handle/channel pair, backed by `pool` for the `hasTx`
    /// pre-filter and transaction import.
    pub fn new(pool: Arc<dyn TxPool<T>>) -> (Self, FetcherChannels) {
        let (announce_tx, announce_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (deliver_tx, deliver_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (drop_tx, drop_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (quit_tx, quit_rx) = mpsc::channel(1);

        let handle = Self {
            inner: Arc::new(Inner {
                announce: announce_tx,
                deliver: deliver_tx,
                drop_peer: drop_tx,
                quit: quit_tx,
                metrics: FetcherMetrics::default(),
                pool,
            }),
        };
        let channels = FetcherChannels {
            announce: announce_rx,
            deliver: deliver_rx,
            drop_peer: drop_rx,
            quit: quit_rx,
            drop_peer_tx: handle.inner.drop_peer.clone(),
        };
        (handle, channels)
    }

    /// Announces `items` from `peer`, after filtering out hashes the pool
    /// already has (the cheap pre-filter described in §4.1's `Notify`,
    /// performed here since the pool is reachable without going through the
    /// loop — see DESIGN.md for why the underpriced-cache pre-filter is not
    /// also done here).
    pub async fn notify(
        &self,
        peer: PeerId,
        items: Vec<AnnounceItem>,
        has_tx: impl Fn(&crate::types::Hash) -> bool,
    ) -> Result<(), Terminated> {
        let total = items.len() as u64;
        let items: Vec<AnnounceItem> = items.into_iter().filter(|item| !has_tx(&item.hash)).collect();
        let known = total - items.len() as u64;
        if known > 0 {
            self.inner.metrics.announce_known(known);
        }
        self.inner.metrics.announce_in(total);
        if items.is_empty() {
            return Ok(())
        }
        self.inner.announce.send(AnnounceEvent { peer, items }).await.map_err(|_| Terminated)
    }

    /// Submits `txs` to the pool and forwards the resolved verdicts onward,
    /// either as an unsolicited broadcast (`direct = false`) or a reply to a
    /// previously dispatched request (`direct = true`, with
    /// `requested_order` echoing that request's hashes for cutoff-index
    /// reconciliation, §4.5).
    ///
    /// Submission happens in batches of [`DELIVERY_BATCH_SIZE`], with a sleep
    /// inserted between batches once a batch's "other reject" rate exceeds
    /// [`OTHER_REJECT_BACKPRESSURE_RATIO`] (§4.5).
    pub async fn enqueue(
        &self,
        peer: PeerId,
        txs: Vec<T>,
        direct: bool,
        requested_order: Vec<crate::types::Hash>,
    ) -> Result<(), Terminated> {
        let mut delivered: Vec<DeliveredTx> = Vec::with_capacity(txs.len());
        let mut batches = txs.into_iter().peekable();

        while batches.peek().is_some() {
            let batch: Vec<T> = (&mut batches).take(DELIVERY_BATCH_SIZE).collect();
            let observed: Vec<(crate::types::Hash, crate::types::Metadata)> =
                batch.iter().map(|tx| (tx.tx_hash(), tx.tx_metadata())).collect();

            let verdicts = self.inner.pool.add_txs(peer.clone(), batch).await;
            let other_rejects = verdicts.iter().filter(|v| matches!(v, PoolOutcome::OtherReject)).count();
            let ratio = other_rejects as f64 / verdicts.len() as f64;

            delivered.extend(
                observed
                    .into_iter()
                    .zip(verdicts)
                    .map(|((hash, observed), outcome)| DeliveredTx { hash, observed, outcome }),
            );

            if ratio > OTHER_REJECT_BACKPRESSURE_RATIO && batches.peek().is_some() {
                tokio::time::sleep(OTHER_REJECT_BACKPRESSURE_SLEEP).await;
            }
        }

        if direct {
            self.inner.metrics.reply_in(delivered.len() as u64);
        } else {
            self.inner.metrics.broadcast_in(delivered.len() as u64);
        }

        self.inner
            .deliver
            .send(DeliverEvent { peer, delivered, direct, requested_order })
            .await
            .map_err(|_| Terminated)
    }

    /// Notifies the loop that `peer` has disconnected.
    pub async fn drop_peer(&self, peer: PeerId) -> Result<(), Terminated> {
        self.inner.drop_peer.send(peer).await.map_err(|_| Terminated)
    }

    /// Requests a graceful shutdown of the loop.
    pub async fn quit(&self) -> Result<(), Terminated> {
        self.inner.quit.send(()).await.map_err(|_| Terminated)
    }
}
