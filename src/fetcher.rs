//! The three-stage state machine: struct definition, announce ingestion
//! (§4.1) and the wait timer's WAITING→QUEUED promotion (§4.2).
//!
//! Scheduling (§4.3) lives in [`crate::scheduler`]; delivery, timeout and
//! drop reconciliation (§4.4-§4.6) live in [`crate::delivery`]. All three
//! `impl TransactionFetcher` blocks operate on the same struct defined here,
//! mirroring the way the teacher splits `TransactionFetcher`'s behavior
//! across plain `impl` blocks rather than one monolithic file.

use crate::{
    cache::UnderpricedCache,
    config::FetcherConfig,
    metrics::FetcherMetrics,
    types::{AnnounceItem, AnnouncedMeta, Hash, PeerId, Seq, BLOB_TX_KIND},
};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

pub(crate) type FnvHashMap<K, V> = std::collections::HashMap<K, V, fnv::FnvBuildHasher>;
pub(crate) type FnvHashSet<K> = std::collections::HashSet<K, fnv::FnvBuildHasher>;

/// An in-flight request to a specific peer.
#[derive(Debug)]
pub(crate) struct ActiveRequest {
    /// The requested hashes, in dispatch order. `None` once the request has
    /// gone dangling on timeout (§4.4) — the peer stays marked in-flight
    /// (present in [`TransactionFetcher::requests`]) without a reschedulable
    /// deadline.
    pub(crate) hashes: Option<Vec<Hash>>,
    /// Hashes from this request that resolved via some other path (broadcast
    /// or a different peer) before this request itself completed, and so
    /// must not be re-queued when it finally completes or times out.
    pub(crate) stolen: FnvHashSet<Hash>,
    /// When the request was dispatched.
    pub(crate) time: Instant,
}

/// The core per-hash, per-peer index set described in the spec's data model
/// (§3), plus the scheduler/timer-adjacent bookkeeping needed to drive them.
#[derive(Debug)]
pub struct TransactionFetcher {
    pub(crate) config: FetcherConfig,
    pub(crate) metrics: FetcherMetrics,
    next_seq: Seq,

    // --- WAITING ---
    pub(crate) waitlist: FnvHashMap<Hash, HashSet<PeerId>>,
    pub(crate) waittime: FnvHashMap<Hash, Instant>,
    pub(crate) waitslots: HashMap<PeerId, FnvHashMap<Hash, AnnouncedMeta>>,

    // --- QUEUED ---
    pub(crate) announced: FnvHashMap<Hash, HashSet<PeerId>>,
    pub(crate) announces: HashMap<PeerId, FnvHashMap<Hash, AnnouncedMeta>>,

    // --- FETCHING ---
    pub(crate) fetching: FnvHashMap<Hash, PeerId>,
    pub(crate) requests: HashMap<PeerId, ActiveRequest>,
    pub(crate) alternates: FnvHashMap<Hash, HashSet<PeerId>>,

    // --- negative cache ---
    pub(crate) underpriced: UnderpricedCache,

    /// Seeded order for deterministic peer iteration in tests (§6): the RNG
    /// plus a rotation offset applied after shuffling. `None` in production,
    /// where scheduling relies on `HashMap`'s per-process-randomized
    /// iteration order instead.
    pub(crate) seeded_order: Option<(rand::rngs::StdRng, usize)>,
}

/// Outcome of processing one `announce` batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnounceOutcome {
    /// Hashes dropped for exceeding the per-peer DoS cap.
    pub dos_dropped: usize,
    /// Whether the wait timer needs to be (re)armed.
    pub arm_wait_timer: bool,
    /// Whether the scheduler should be invoked for this peer (it had no
    /// tracked announces before this batch and does now).
    pub schedule_peer: bool,
}

impl TransactionFetcher {
    /// Creates a fetcher with the given configuration.
    pub fn new(config: FetcherConfig) -> Self {
        let underpriced = UnderpricedCache::new(config.underpriced_set as u32, config.underpriced_timeout);
        Self {
            config,
            metrics: FetcherMetrics::default(),
            next_seq: 0,
            waitlist: Default::default(),
            waittime: Default::default(),
            waitslots: Default::default(),
            announced: Default::default(),
            announces: Default::default(),
            fetching: Default::default(),
            requests: Default::default(),
            alternates: Default::default(),
            underpriced,
            seeded_order: None,
        }
    }

    /// Installs a seeded RNG and rotation offset, for deterministic peer
    /// iteration order in tests (§6).
    pub fn with_seeded_order(mut self, rng: rand::rngs::StdRng, rotation: usize) -> Self {
        self.seeded_order = Some((rng, rotation));
        self
    }

    fn next_seq(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Live announcement count tracked for `peer`, across WAITING and
    /// QUEUED/FETCHING bookkeeping (invariant 5, §3).
    pub(crate) fn used_slots(&self, peer: &PeerId) -> usize {
        self.waitslots.get(peer).map_or(0, FnvHashMap::len)
            + self.announces.get(peer).map_or(0, FnvHashMap::len)
    }

    /// Total number of hashes tracked in each stage, for metrics gauges.
    pub fn stage_counts(&self) -> (usize, usize, usize) {
        (self.waitlist.len(), self.announced.len(), self.fetching.len())
    }

    /// Number of distinct peers with any live tracked state.
    pub fn tracked_peer_count(&self) -> usize {
        let mut peers: FnvHashSet<&PeerId> = FnvHashSet::default();
        peers.extend(self.waitslots.keys());
        peers.extend(self.announces.keys());
        peers.len()
    }

    /// Processes one peer's announce batch (§4.1). `items` is assumed
    /// pre-filtered for `hasTx` (done in the handle, off the loop, since the
    /// pool is reachable there without a round trip); the per-peer DoS cap
    /// and the underpriced negative cache are both enforced here, since the
    /// loop is the sole owner of both — see DESIGN.md.
    pub(crate) fn on_announce(&mut self, peer: &PeerId, items: Vec<AnnounceItem>, now: Instant) -> AnnounceOutcome {
        let had_waitlist_entries = !self.waitlist.is_empty();
        let peer_previously_tracked = self.used_slots(peer) > 0;
        let mut gained_first_waitlist_entry = false;
        let mut gained_blob = false;

        let used = self.used_slots(peer);
        let room = self.config.max_announces.saturating_sub(used);
        let dos_dropped = items.len().saturating_sub(room);
        let items = if dos_dropped > 0 {
            self.metrics.announce_dos(dos_dropped as u64);
            let mut items = items;
            items.truncate(room);
            items
        } else {
            items
        };

        for AnnounceItem { hash, meta } in items {
            if self.underpriced.contains(&hash, now) {
                // First match wins (§4.1): a hash the pool has already
                // rejected as underpriced never reaches the WAITING/QUEUED/
                // FETCHING dispatch below, so it can't be endlessly
                // re-announced and re-fetched.
                self.metrics.announce_underpriced(1);
                continue
            }

            if let Some(fetch_peer) = self.fetching.get(&hash).cloned() {
                // 1. FETCHING: register as alternate/fallback.
                if fetch_peer != *peer {
                    self.alternates.entry(hash).or_default().insert(peer.clone());
                }
                let seq = self.next_seq();
                self.announces.entry(peer.clone()).or_default().insert(hash, AnnouncedMeta { meta, seq });
                continue
            }

            if self.announced.contains_key(&hash) {
                // 2. QUEUED: register as fallback.
                self.announced.get_mut(&hash).expect("checked above").insert(peer.clone());
                let seq = self.next_seq();
                self.announces.entry(peer.clone()).or_default().insert(hash, AnnouncedMeta { meta, seq });
                continue
            }

            if let Some(peers) = self.waitlist.get_mut(&hash) {
                // 3. WAITING: idempotent per peer.
                if !peers.contains(peer) {
                    peers.insert(peer.clone());
                    let seq = self.next_seq();
                    self.waitslots.entry(peer.clone()).or_default().insert(hash, AnnouncedMeta { meta, seq });
                }
                continue
            }

            // 4. Unknown: create fresh WAITING entry.
            let mut peers = HashSet::new();
            peers.insert(peer.clone());
            self.waitlist.insert(hash, peers);
            let seq = self.next_seq();
            self.waitslots.entry(peer.clone()).or_default().insert(hash, AnnouncedMeta { meta, seq });

            let arrival = if meta.kind == BLOB_TX_KIND {
                now.checked_sub(self.config.arrive_timeout).unwrap_or(now)
            } else {
                now
            };
            self.waittime.insert(hash, arrival);

            if !had_waitlist_entries {
                gained_first_waitlist_entry = true;
            }
            if meta.kind == BLOB_TX_KIND {
                gained_blob = true;
            }
        }

        AnnounceOutcome {
            dos_dropped,
            arm_wait_timer: gained_first_waitlist_entry || gained_blob,
            schedule_peer: !peer_previously_tracked && self.announces.get(peer).is_some_and(|m| !m.is_empty()),
        }
    }

    /// Promotes every hash whose wait has elapsed from WAITING to QUEUED
    /// (§4.2). Returns the set of peers touched ("actives"), to be passed to
    /// the scheduler as a whitelist.
    pub(crate) fn promote_waiting(&mut self, now: Instant) -> FnvHashSet<PeerId> {
        let due: Vec<Hash> = self
            .waittime
            .iter()
            .filter(|(_, &first_announce)| {
                now.saturating_duration_since(first_announce) + self.config.gather_slack
                    > self.config.arrive_timeout
            })
            .map(|(hash, _)| *hash)
            .collect();

        let mut actives = FnvHashSet::default();

        for hash in due {
            let peers = self.waitlist.remove(&hash).expect("hash came from waittime, invariant 2");
            self.waittime.remove(&hash);

            debug_assert!(
                !self.announced.contains_key(&hash),
                "hash promoted from WAITING while already QUEUED, broken stage invariant"
            );

            for peer in &peers {
                let meta = self
                    .waitslots
                    .get_mut(peer)
                    .and_then(|slots| slots.remove(&hash))
                    .expect("invariant 2: waitslots[p][h] exists for every p in waitlist[h]");
                self.announces.entry(peer.clone()).or_default().insert(hash, meta);
                actives.insert(peer.clone());
            }

            self.announced.insert(hash, peers);
        }

        actives
    }

    /// Earliest outstanding `waittime` entry, if any — used by the service
    /// loop to compute the wait timer's next deadline.
    pub(crate) fn earliest_waittime(&self) -> Option<Instant> {
        self.waittime.values().copied().min()
    }

    /// Earliest dispatch time among non-dangling requests — used by the
    /// service loop to compute the timeout timer's next deadline.
    pub(crate) fn earliest_request_time(&self) -> Option<Instant> {
        self.requests.values().filter(|r| r.hashes.is_some()).map(|r| r.time).min()
    }
}
