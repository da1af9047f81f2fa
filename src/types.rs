//! Core value types shared across the fetcher.

use alloy_primitives::B256;
use std::{fmt, sync::Arc};

/// Identifies a transaction by hash.
///
/// Thin newtype over [`B256`] so the rest of the crate doesn't leak the
/// `alloy_primitives` dependency through every signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub B256);

impl From<B256> for Hash {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

/// Opaque peer identifier.
///
/// The source models a peer id as an opaque string; we keep that shape
/// rather than reuse the teacher's 512-bit public key representation, since
/// nothing in this crate ever needs to recover key material from it. `Arc<str>`
/// keeps clones (which happen constantly — every index is keyed or valued by
/// peer id) a refcount bump instead of an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    /// Creates a new peer id from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the peer id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T> From<T> for PeerId
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// The consensus "kind" byte a peer attaches to an announcement (e.g. legacy,
/// EIP-1559, blob-carrying). Left as an opaque discriminant: the fetcher only
/// ever compares kinds for equality, it never interprets them.
pub type TxKind = u8;

/// Distinguished kind reserved for blob-carrying transactions.
///
/// Blob transactions are fetch-only: full blobs are never gossiped by
/// broadcast, so the waiting period that exists to let a broadcast arrive
/// would only waste time for them (§4.1).
pub const BLOB_TX_KIND: TxKind = u8::MAX;

/// Per-announcement metadata: consensus kind and claimed byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Consensus kind byte, as claimed by the announcing peer.
    pub kind: TxKind,
    /// Claimed encoded byte length, as claimed by the announcing peer.
    pub size: u32,
}

/// A single `(hash, metadata)` pair as carried by an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceItem {
    /// The announced hash.
    pub hash: Hash,
    /// The metadata the peer attached to the announcement.
    pub meta: Metadata,
}

/// Arrival-order sequence number, stable across map iteration.
pub type Seq = u64;

/// An announcement's metadata together with the sequence number it was
/// first observed at, for the announcing peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnouncedMeta {
    /// The metadata claimed for this hash by this peer.
    pub meta: Metadata,
    /// The arrival-order sequence number assigned when this peer's
    /// announcement of this hash was first observed.
    pub seq: Seq,
}

/// Reason a peer was disconnected, surfaced to [`crate::handlers::PeerControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `fetchTxs` returned an error when dispatching a request.
    FetchFailed,
    /// The peer delivered a transaction whose kind didn't match what it had
    /// announced.
    AnnouncedKindMismatch,
    /// The peer delivered a transaction whose size differed from what it
    /// announced by more than the tolerance.
    AnnouncedSizeMismatch,
}

/// Outcome of attempting to import one delivered transaction into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    /// The pool accepted the transaction.
    Accepted,
    /// The pool already had this transaction.
    AlreadyKnown,
    /// The pool rejected the transaction as underpriced.
    Underpriced,
    /// The pool rejected the transaction as an underpriced replacement of an
    /// existing pooled transaction.
    ReplaceUnderpriced,
    /// Any other rejection (malformed, invalid signature, etc).
    OtherReject,
}

impl PoolOutcome {
    /// Whether this outcome should feed the underpriced negative cache.
    pub fn is_underpriced(self) -> bool {
        matches!(self, Self::Underpriced | Self::ReplaceUnderpriced)
    }
}

/// What the fetcher needs to see of a decoded transaction body, independent
/// of whatever concrete transaction type the embedding pool uses.
pub trait TxLike: fmt::Debug + Send + Sync + 'static {
    /// The transaction's hash.
    fn tx_hash(&self) -> Hash;
    /// The transaction's kind and encoded size, as actually observed.
    fn tx_metadata(&self) -> Metadata;
}

/// One delivered transaction, with the pool's verdict on it and the
/// metadata it was actually observed to carry (used to validate against any
/// remembered announcement, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredTx {
    /// Hash of the delivered transaction.
    pub hash: Hash,
    /// Metadata as observed on the wire (not as announced).
    pub observed: Metadata,
    /// The pool's classification of this delivery.
    pub outcome: PoolOutcome,
}
