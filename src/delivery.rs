//! Delivery reconciliation (§4.5), the timeout timer's FETCHING→QUEUED
//! demotion (§4.4), and peer-drop purge (§4.6).
//!
//! All three mutate the same dual indices `fetcher.rs` defines; kept in a
//! separate file the way the teacher separates `fetcher.rs`'s ingestion path
//! from its response-handling path.

use crate::{
    fetcher::{FnvHashSet, TransactionFetcher},
    types::{DeliveredTx, DropReason, Hash, PeerId},
};
use std::collections::HashSet;
use tokio::time::Instant;

/// Outcome of reconciling one delivery event.
#[derive(Debug, Default)]
pub struct DeliverOutcome {
    /// Set if a metadata mismatch warrants disconnecting the delivering peer.
    pub drop_peer: Option<DropReason>,
    /// Peers whose fallback set grew and so are worth a scheduling pass.
    pub touched: FnvHashSet<PeerId>,
}

/// Outcome of sweeping for timed-out requests.
#[derive(Debug, Default)]
pub struct TimeoutOutcome {
    /// Peers whose fallback set grew and so are worth a scheduling pass.
    pub touched: FnvHashSet<PeerId>,
}

/// Outcome of purging a dropped peer's state.
#[derive(Debug, Default)]
pub struct DropOutcome {
    /// Whether the peer had an in-flight request, i.e. scheduling slots were
    /// actually freed up.
    pub had_in_flight: bool,
    /// Peers whose fallback set grew and so are worth a scheduling pass.
    pub touched: FnvHashSet<PeerId>,
}

impl TransactionFetcher {
    /// Forgets `hash` everywhere outside WAITING, returning the peer it was
    /// being fetched from (if any) before the forgetting.
    fn untrack_non_waiting(&mut self, hash: &Hash) -> Option<PeerId> {
        let fetching_peer = self.fetching.get(hash).cloned();

        let mut peers_to_clean: HashSet<PeerId> = HashSet::new();
        if let Some(set) = self.announced.remove(hash) {
            peers_to_clean.extend(set);
        }
        if let Some(set) = self.alternates.remove(hash) {
            peers_to_clean.extend(set);
        }
        if let Some(p) = &fetching_peer {
            peers_to_clean.insert(p.clone());
        }

        for p in &peers_to_clean {
            if let Some(m) = self.announces.get_mut(p) {
                m.remove(hash);
                if m.is_empty() {
                    self.announces.remove(p);
                }
            }
        }

        self.fetching.remove(hash);
        fetching_peer
    }

    /// Reconciles one delivery (broadcast or direct reply) against tracked
    /// state (§4.5).
    pub(crate) fn on_deliver(
        &mut self,
        peer: &PeerId,
        delivered: &[DeliveredTx],
        direct: bool,
        requested_order: &[Hash],
        _now: Instant,
    ) -> DeliverOutcome {
        let mut outcome = DeliverOutcome::default();

        for d in delivered {
            let hash = d.hash;

            let remembered = self
                .waitslots
                .get(peer)
                .and_then(|m| m.get(&hash))
                .or_else(|| self.announces.get(peer).and_then(|m| m.get(&hash)));

            if let Some(remembered) = remembered {
                if remembered.meta.kind != d.observed.kind {
                    outcome.drop_peer.get_or_insert(DropReason::AnnouncedKindMismatch);
                } else {
                    let diff = remembered.meta.size.abs_diff(d.observed.size);
                    if diff > 8 {
                        outcome.drop_peer.get_or_insert(DropReason::AnnouncedSizeMismatch);
                    } else if diff > 0 {
                        tracing::warn!(
                            target: "net::tx",
                            %peer,
                            %hash,
                            announced = remembered.meta.size,
                            observed = d.observed.size,
                            "announced transaction size mismatch within tolerance"
                        );
                    }
                }
            }

            if let Some(peers) = self.waitlist.remove(&hash) {
                self.waittime.remove(&hash);
                for p in peers {
                    if let Some(slots) = self.waitslots.get_mut(&p) {
                        slots.remove(&hash);
                    }
                }
            } else {
                let fetching_peer = self.untrack_non_waiting(&hash);
                if let Some(fp) = fetching_peer {
                    if fp != *peer || !direct {
                        if let Some(req) = self.requests.get_mut(&fp) {
                            req.stolen.insert(hash);
                        }
                    }
                }
            }
        }

        if direct {
            if let Some(_req) = self.requests.remove(peer) {
                self.metrics.request_done(1);
                let delivered_set: HashSet<Hash> = delivered.iter().map(|d| d.hash).collect();
                let cutoff = requested_order.iter().rposition(|h| delivered_set.contains(h));

                for (idx, hash) in requested_order.iter().enumerate() {
                    if delivered_set.contains(hash) {
                        continue
                    }
                    if self.fetching.get(hash) != Some(peer) {
                        // Already resolved via some other path while this
                        // request was outstanding.
                        continue
                    }

                    let mut alts = self.alternates.remove(hash).unwrap_or_default();
                    let keep_origin = cutoff.is_some_and(|c| idx > c);
                    if keep_origin {
                        alts.insert(peer.clone());
                    } else if let Some(m) = self.announces.get_mut(peer) {
                        m.remove(hash);
                    }

                    self.fetching.remove(hash);
                    if !alts.is_empty() {
                        outcome.touched.extend(alts.iter().cloned());
                        self.announced.insert(*hash, alts);
                    }
                }

                outcome.touched.insert(peer.clone());
            }
        }

        outcome
    }

    /// Sweeps requests past `fetch_timeout` (+ `gather_slack`), marking them
    /// dangling and demoting their non-stolen hashes back to QUEUED (§4.4).
    pub(crate) fn sweep_timeouts(&mut self, now: Instant) -> TimeoutOutcome {
        let mut outcome = TimeoutOutcome::default();

        let timed_out: Vec<PeerId> = self
            .requests
            .iter()
            .filter(|(_, req)| {
                req.hashes.is_some()
                    && now.saturating_duration_since(req.time) + self.config.gather_slack
                        > self.config.fetch_timeout
            })
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in timed_out {
            let req = self.requests.get_mut(&peer).expect("peer came from requests");
            let hashes = req.hashes.take().expect("filtered for Some above");
            let stolen = std::mem::take(&mut req.stolen);
            self.metrics.request_timeout(1);

            for hash in hashes {
                if stolen.contains(&hash) {
                    continue
                }

                if let Some(m) = self.announces.get_mut(&peer) {
                    m.remove(&hash);
                }

                let alts = self.alternates.remove(&hash).unwrap_or_default();
                self.fetching.remove(&hash);
                if !alts.is_empty() {
                    outcome.touched.extend(alts.iter().cloned());
                    self.announced.insert(hash, alts);
                }
            }
        }

        outcome
    }

    /// Purges every trace of `peer` on disconnect (§4.6).
    pub(crate) fn on_drop_peer(&mut self, peer: &PeerId) -> DropOutcome {
        let mut outcome = DropOutcome::default();

        if let Some(slots) = self.waitslots.remove(peer) {
            for hash in slots.keys() {
                if let Some(peers) = self.waitlist.get_mut(hash) {
                    peers.remove(peer);
                    if peers.is_empty() {
                        self.waitlist.remove(hash);
                        self.waittime.remove(hash);
                    }
                }
            }
        }

        if let Some(req) = self.requests.remove(peer) {
            outcome.had_in_flight = true;
            if let Some(hashes) = req.hashes {
                for hash in hashes {
                    if req.stolen.contains(&hash) {
                        continue
                    }
                    let mut alts = self.alternates.remove(&hash).unwrap_or_default();
                    alts.remove(peer);
                    self.fetching.remove(&hash);
                    if !alts.is_empty() {
                        outcome.touched.extend(alts.iter().cloned());
                        self.announced.insert(hash, alts);
                    }
                }
            }
        }

        if let Some(announces) = self.announces.remove(peer) {
            for hash in announces.keys() {
                if let Some(peers) = self.announced.get_mut(hash) {
                    peers.remove(peer);
                    if peers.is_empty() {
                        self.announced.remove(hash);
                    }
                }
                if let Some(alts) = self.alternates.get_mut(hash) {
                    alts.remove(peer);
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FetcherConfig,
        fetcher::TransactionFetcher,
        types::{Metadata, PoolOutcome},
    };
    use alloy_primitives::B256;
    use std::time::Duration;

    fn hash(byte: u8) -> Hash {
        Hash(B256::from_slice(&[byte; 32]))
    }

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    fn item(h: Hash, kind: u8, size: u32) -> crate::types::AnnounceItem {
        crate::types::AnnounceItem { hash: h, meta: Metadata { kind, size } }
    }

    fn delivered(h: Hash, kind: u8, size: u32) -> DeliveredTx {
        DeliveredTx { hash: h, observed: Metadata { kind, size }, outcome: PoolOutcome::Accepted }
    }

    fn fetching_fixture(hashes: &[Hash], primary: &PeerId, now: Instant) -> TransactionFetcher {
        let mut f = TransactionFetcher::new(FetcherConfig::default());
        let items: Vec<_> = hashes.iter().map(|h| item(*h, 0, 10)).collect();
        f.on_announce(primary, items, now);
        f.promote_waiting(now + f.config.arrive_timeout + f.config.gather_slack + Duration::from_millis(1));
        f.schedule_fetches(now, None);
        f
    }

    #[test]
    fn direct_delivery_clears_fetching_request() {
        let now = Instant::now();
        let primary = peer("a");
        let mut f = fetching_fixture(&[hash(1), hash(2)], &primary, now);

        let delivered_txs = vec![delivered(hash(1), 0, 10), delivered(hash(2), 0, 10)];
        let outcome = f.on_deliver(&primary, &delivered_txs, true, &[hash(1), hash(2)], now);

        assert!(outcome.drop_peer.is_none());
        assert!(!f.requests.contains_key(&primary));
        assert!(!f.fetching.contains_key(&hash(1)));
        assert!(!f.fetching.contains_key(&hash(2)));
    }

    #[test]
    fn broadcast_steal_marks_stolen_and_skips_requeue_on_timeout() {
        let now = Instant::now();
        let primary = peer("a");
        let mut f = fetching_fixture(&[hash(1)], &primary, now);

        let delivered_txs = vec![delivered(hash(1), 0, 10)];
        f.on_deliver(&peer("broadcaster"), &delivered_txs, false, &[], now);

        assert!(f.requests[&primary].stolen.contains(&hash(1)));
        assert!(!f.fetching.contains_key(&hash(1)));

        let later = now + f.config.fetch_timeout + f.config.gather_slack + Duration::from_millis(1);
        let timeout_outcome = f.sweep_timeouts(later);
        assert!(timeout_outcome.touched.is_empty(), "stolen hash must not be re-queued");
        assert!(!f.announced.contains_key(&hash(1)));
    }

    #[test]
    fn kind_mismatch_requests_peer_drop() {
        let now = Instant::now();
        let primary = peer("a");
        let mut f = fetching_fixture(&[hash(1)], &primary, now);

        let bad = DeliveredTx { hash: hash(1), observed: Metadata { kind: 1, size: 10 }, outcome: PoolOutcome::Accepted };
        let outcome = f.on_deliver(&primary, &[bad], true, &[hash(1)], now);

        assert_eq!(outcome.drop_peer, Some(DropReason::AnnouncedKindMismatch));
    }

    #[test]
    fn timeout_demotes_to_queued_when_alternate_exists() {
        let now = Instant::now();
        let primary = peer("a");
        let mut f = fetching_fixture(&[hash(1)], &primary, now);
        f.on_announce(&peer("b"), vec![item(hash(1), 0, 10)], now);

        let later = now + f.config.fetch_timeout + f.config.gather_slack + Duration::from_millis(1);
        let outcome = f.sweep_timeouts(later);

        assert!(outcome.touched.contains(&peer("b")));
        assert!(f.announced.contains_key(&hash(1)));
        assert!(!f.fetching.contains_key(&hash(1)));
    }

    #[test]
    fn cutoff_retains_origin_after_cutoff_and_forgets_before_it() {
        let now = Instant::now();
        let primary = peer("a");
        let requested = vec![hash(1), hash(2), hash(3), hash(4)];
        let mut f = fetching_fixture(&requested, &primary, now);
        // another peer also announced h2 and h4 while they were FETCHING
        f.on_announce(&peer("b"), vec![item(hash(2), 0, 10), item(hash(4), 0, 10)], now);

        let delivered_txs = vec![delivered(hash(1), 0, 10), delivered(hash(3), 0, 10)];
        f.on_deliver(&primary, &delivered_txs, true, &requested, now);

        // h2 (before cutoff at index 2): origin forgotten, other announcer remains
        assert!(f.announced.contains_key(&hash(2)));
        assert!(f.announced[&hash(2)].contains(&peer("b")));
        assert!(!f.announced[&hash(2)].contains(&primary));

        // h4 (after cutoff): origin retained as a fallback alongside the other announcer
        assert!(f.announced.contains_key(&hash(4)));
        assert!(f.announced[&hash(4)].contains(&peer("b")));
        assert!(f.announced[&hash(4)].contains(&primary));
    }
}
