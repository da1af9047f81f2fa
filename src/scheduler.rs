//! Request scheduling (§4.3): assembling QUEUED hashes into bounded batches
//! and promoting them to FETCHING.
//!
//! Kept as free functions over `&mut TransactionFetcher` rather than a
//! separate struct — the teacher's `fetch.rs` likewise threads scheduling
//! logic as plain methods/functions operating on `StateFetcher`'s fields
//! instead of introducing a standalone scheduler type.

use crate::{
    fetcher::{FnvHashSet, TransactionFetcher},
    types::{Hash, PeerId},
};
use rand::seq::SliceRandom;
use tokio::time::Instant;

/// One batch handed to the caller for dispatch via [`crate::handlers::PeerFetch`].
#[derive(Debug, Clone)]
pub struct DispatchedRequest {
    pub peer: PeerId,
    pub hashes: Vec<Hash>,
}

impl TransactionFetcher {
    /// Builds the candidate peer order for this scheduling pass.
    ///
    /// With a whitelist, peers are considered in the given order (callers
    /// pass the wait-timer's or drop's "actives" set, where order doesn't
    /// matter). Without one, every peer with tracked announces is
    /// considered; this uses `HashMap`'s randomized-per-process iteration
    /// order in production, or the installed seeded RNG plus rotation offset
    /// in tests (§6), so scheduling never systematically favors one peer.
    fn candidate_peers(&mut self, whitelist: Option<&FnvHashSet<PeerId>>) -> Vec<PeerId> {
        if let Some(whitelist) = whitelist {
            return whitelist.iter().cloned().collect()
        }

        let mut peers: Vec<PeerId> = self.announces.keys().cloned().collect();
        if let Some((rng, rotation)) = &mut self.seeded_order {
            peers.shuffle(rng);
            if !peers.is_empty() {
                let r = *rotation % peers.len();
                peers.rotate_left(r);
            }
        }
        peers
    }

    /// Assembles and dispatches as many requests as current state allows
    /// (§4.3). `whitelist`, when given, restricts consideration to those
    /// peers (e.g. just-promoted or just-freed peers) rather than scanning
    /// every tracked peer.
    pub(crate) fn schedule_fetches(
        &mut self,
        now: Instant,
        whitelist: Option<&FnvHashSet<PeerId>>,
    ) -> Vec<DispatchedRequest> {
        let candidates = self.candidate_peers(whitelist);
        let mut dispatched = Vec::new();

        for peer in candidates {
            if self.requests.contains_key(&peer) {
                // Already has an in-flight (possibly dangling) request.
                continue
            }

            let Some(peer_announces) = self.announces.get(&peer) else { continue };
            if peer_announces.is_empty() {
                continue
            }

            let mut entries: Vec<(Hash, u64, u64)> = peer_announces
                .iter()
                .map(|(hash, meta)| (*hash, meta.seq, meta.meta.size))
                .collect();
            entries.sort_by_key(|(_, seq, _)| *seq);

            let mut batch = Vec::new();
            let mut acc_size: u64 = 0;

            for (hash, _, size) in entries {
                if self.fetching.contains_key(&hash) {
                    // Already being fetched from a different peer; this
                    // peer's announce of it stays recorded as a DoS-budget
                    // entry but isn't itself fetchable right now.
                    continue
                }

                // Check the prospective accumulated size before including
                // the hash, not after: `size` is an unverified, peer-claimed
                // value, and the batch must not be allowed to overshoot
                // MAX_RETRIEVAL_BYTES at creation time. The very first hash
                // is let through regardless, the same way the teacher's
                // eth68 packer always admits a lone oversized transaction.
                if !batch.is_empty() && acc_size + size > self.config.max_retrieval_bytes {
                    break
                }

                self.fetching.insert(hash, peer.clone());
                let alternates = self
                    .announced
                    .remove(&hash)
                    .map(|mut peers| {
                        peers.remove(&peer);
                        peers
                    })
                    .unwrap_or_default();
                if !alternates.is_empty() {
                    self.alternates.insert(hash, alternates);
                }

                acc_size += size;
                batch.push(hash);

                if batch.len() >= self.config.max_retrievals || acc_size >= self.config.max_retrieval_bytes {
                    break
                }
            }

            if !batch.is_empty() {
                self.metrics.request_out(1);
                self.requests.insert(
                    peer.clone(),
                    crate::fetcher::ActiveRequest {
                        hashes: Some(batch.clone()),
                        stolen: Default::default(),
                        time: now,
                    },
                );
                dispatched.push(DispatchedRequest { peer, hashes: batch });
            }
        }

        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::FetcherConfig, fetcher::TransactionFetcher, types::Metadata};
    use alloy_primitives::B256;

    fn hash(byte: u8) -> Hash {
        Hash(B256::from_slice(&[byte; 32]))
    }

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    fn item(h: Hash, size: u32) -> crate::types::AnnounceItem {
        crate::types::AnnounceItem { hash: h, meta: Metadata { kind: 0, size } }
    }

    fn queued(f: &mut TransactionFetcher, peer: &PeerId, hashes: &[Hash], now: Instant) {
        let items: Vec<_> = hashes.iter().map(|h| item(*h, 10)).collect();
        f.on_announce(peer, items, now);
        f.promote_waiting(now + f.config.arrive_timeout + f.config.gather_slack + std::time::Duration::from_millis(1));
    }

    #[test]
    fn single_peer_happy_path_dispatches_one_request() {
        let mut f = TransactionFetcher::new(FetcherConfig::default());
        let now = Instant::now();
        queued(&mut f, &peer("a"), &[hash(1), hash(2)], now);

        let dispatched = f.schedule_fetches(now, None);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].peer, peer("a"));
        assert_eq!(dispatched[0].hashes, vec![hash(1), hash(2)]);
        assert!(f.fetching.contains_key(&hash(1)));
        assert!(f.requests.contains_key(&peer("a")));
    }

    #[test]
    fn peer_with_in_flight_request_is_not_rescheduled() {
        let mut f = TransactionFetcher::new(FetcherConfig::default());
        let now = Instant::now();
        queued(&mut f, &peer("a"), &[hash(1)], now);
        f.schedule_fetches(now, None);

        queued(&mut f, &peer("a"), &[hash(2)], now);
        let dispatched = f.schedule_fetches(now, None);
        assert!(dispatched.is_empty());
    }

    #[test]
    fn batch_stops_at_max_retrievals() {
        let config = FetcherConfig { max_retrievals: 2, ..FetcherConfig::default() };
        let mut f = TransactionFetcher::new(config);
        let now = Instant::now();
        queued(&mut f, &peer("a"), &[hash(1), hash(2), hash(3)], now);

        let dispatched = f.schedule_fetches(now, None);
        assert_eq!(dispatched[0].hashes.len(), 2);
        // the third hash stays queued, available for a later pass
        assert!(f.announced.contains_key(&hash(3)));
    }

    #[test]
    fn batch_stops_before_overshooting_max_retrieval_bytes() {
        let config = FetcherConfig { max_retrieval_bytes: 100, ..FetcherConfig::default() };
        let mut f = TransactionFetcher::new(config);
        let now = Instant::now();
        let items = vec![item(hash(1), 60), item(hash(2), 60), item(hash(3), 10)];
        f.on_announce(&peer("a"), items, now);
        f.promote_waiting(now + f.config.arrive_timeout + f.config.gather_slack + std::time::Duration::from_millis(1));

        let dispatched = f.schedule_fetches(now, None);
        assert_eq!(dispatched[0].hashes, vec![hash(1)], "h2 would push the accumulated size past the cap, so appending stops before it");
        assert!(f.announced.contains_key(&hash(2)));
        assert!(f.announced.contains_key(&hash(3)));
    }

    #[test]
    fn a_lone_oversized_hash_is_admitted_alone() {
        let config = FetcherConfig { max_retrieval_bytes: 100, ..FetcherConfig::default() };
        let mut f = TransactionFetcher::new(config);
        let now = Instant::now();
        let items = vec![item(hash(1), 500), item(hash(2), 10)];
        f.on_announce(&peer("a"), items, now);
        f.promote_waiting(now + f.config.arrive_timeout + f.config.gather_slack + std::time::Duration::from_millis(1));

        let dispatched = f.schedule_fetches(now, None);
        assert_eq!(dispatched[0].hashes, vec![hash(1)], "the first hash is admitted even alone over the cap, but nothing follows it");
        assert!(f.announced.contains_key(&hash(2)));
    }

    #[test]
    fn second_announcer_becomes_alternate_excluding_primary() {
        let mut f = TransactionFetcher::new(FetcherConfig::default());
        let now = Instant::now();
        queued(&mut f, &peer("a"), &[hash(1)], now);
        queued(&mut f, &peer("b"), &[hash(1)], now);

        let dispatched = f.schedule_fetches(now, Some(&[peer("a")].into_iter().collect()));
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].peer, peer("a"));

        let alts = &f.alternates[&hash(1)];
        assert!(alts.contains(&peer("b")));
        assert!(!alts.contains(&peer("a")), "primary must not appear among its own fallbacks");
    }
}
