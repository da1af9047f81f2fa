//! Events that flow into the loop.
//!
//! Mirrors the spec's four-channel ingress table (§2) plus the two internal
//! timer triggers, unified into a single enum per producer channel so
//! `FetcherService::run` can `tokio::select!` over four receivers without
//! losing which channel an event came from (ordering is only guaranteed
//! within a channel, never across channels, per §5).

use crate::types::{AnnounceItem, DeliveredTx, PeerId};

/// Payload of the `announce` channel.
#[derive(Debug, Clone)]
pub struct AnnounceEvent {
    /// The announcing peer.
    pub peer: PeerId,
    /// The announced `(hash, metadata)` pairs.
    pub items: Vec<AnnounceItem>,
}

/// Payload of the `deliver` channel.
#[derive(Debug, Clone)]
pub struct DeliverEvent {
    /// The peer the delivery arrived from (the broadcaster, or the request's
    /// origin for a direct reply).
    pub peer: PeerId,
    /// Every delivered hash, each carrying the pool's verdict.
    pub delivered: Vec<DeliveredTx>,
    /// `true` if this is a direct reply to a request this fetcher issued to
    /// `peer`; `false` for an unsolicited broadcast.
    pub direct: bool,
    /// For direct replies, the hash order of the original request, used to
    /// compute the cutoff index (§4.5). Empty for broadcasts.
    pub requested_order: Vec<crate::types::Hash>,
}
