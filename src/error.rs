//! Error types.
//!
//! Follows the teacher's `reth-interfaces::p2p::error` style of a small
//! `thiserror`-derived enum per concern instead of a single catch-all error.

use crate::types::PeerId;

/// Returned by [`crate::handle::FetcherHandle`] methods once the loop backing
/// them has exited.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("transaction fetcher has shut down")]
pub struct Terminated;

/// Error returned by [`crate::handlers::PeerFetch::fetch_txs`] when a
/// dispatched request could not be delivered to the peer's session.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The peer's session channel was full or closed.
    #[error("peer {peer} session channel unavailable")]
    ChannelUnavailable {
        /// The peer the request was addressed to.
        peer: PeerId,
    },
    /// Any other transport-level failure.
    #[error("failed to dispatch request to peer {peer}: {reason}")]
    Other {
        /// The peer the request was addressed to.
        peer: PeerId,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl FetchError {
    /// The peer this error concerns.
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::ChannelUnavailable { peer } | Self::Other { peer, .. } => peer,
        }
    }
}
