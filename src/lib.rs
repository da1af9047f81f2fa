//! Announcement-driven transaction fetcher.
//!
//! Tracks transaction hashes a peer has announced through the three stages
//! described in SPEC_FULL.md (§3-§4): `WAITING` for a possible broadcast,
//! `QUEUED` once the wait has elapsed, `FETCHING` once a bounded request has
//! been dispatched to one peer, with every other announcer kept as a
//! fallback. The pool, the wire codec, peer session management, metrics
//! backend and block downloader are all external collaborators, reached
//! only through the trait objects in [`handlers`].
//!
//! [`handle::FetcherHandle`] is the front door: construct a
//! [`service::FetcherService`] with [`service::FetcherService::new`], spawn
//! its [`service::FetcherService::run`] future, and drive it exclusively
//! through the returned handle.

pub mod cache;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod handle;
pub mod handlers;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod types;

pub use clock::{Clock, TokioClock};
pub use config::FetcherConfig;
pub use error::{FetchError, Terminated};
pub use fetcher::TransactionFetcher;
pub use handle::FetcherHandle;
pub use handlers::{PeerControl, PeerFetch, TxPool};
pub use service::FetcherService;
pub use types::{
    AnnounceItem, AnnouncedMeta, DeliveredTx, DropReason, Hash, Metadata, PeerId, PoolOutcome, Seq, TxKind,
    TxLike, BLOB_TX_KIND,
};
