//! External collaborator capabilities, injected at construction.
//!
//! Modeled on the teacher's dynamic-dispatch capability pattern (e.g.
//! `Box<dyn BlockImport>` held by `NetworkManager`): the pool, the wire
//! codec's transport, and peer management are out of this crate's scope
//! (§1), so they are reached only through these trait objects.

use crate::{
    error::FetchError,
    types::{DropReason, Hash, PeerId, PoolOutcome, TxLike},
};
use async_trait::async_trait;
use std::fmt;

/// The local transaction pool, as seen from the fetcher.
#[async_trait]
pub trait TxPool<T>: fmt::Debug + Send + Sync + 'static
where
    T: TxLike,
{
    /// Whether `hash` is already known to the pool.
    fn has_tx(&self, hash: &Hash) -> bool;

    /// Imports a batch of delivered transactions, returning the pool's
    /// per-transaction verdict in the same order as `txs`.
    async fn add_txs(&self, peer: PeerId, txs: Vec<T>) -> Vec<PoolOutcome>;
}

/// Issues wire requests for transactions to a specific peer.
#[async_trait]
pub trait PeerFetch: fmt::Debug + Send + Sync + 'static {
    /// Requests `hashes` from `peer`. An `Err` return triggers an immediate
    /// peer drop (§4.3, §7).
    async fn fetch_txs(&self, peer: PeerId, hashes: Vec<Hash>) -> Result<(), FetchError>;
}

/// Disconnects misbehaving or unresponsive peers.
pub trait PeerControl: fmt::Debug + Send + Sync + 'static {
    /// Disconnects `peer` for `reason`.
    fn drop_peer(&self, peer: PeerId, reason: DropReason);
}
