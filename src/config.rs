//! Tunable constants for the fetcher.
//!
//! Every constant named in the spec's resource-cap section lives here rather
//! than as a scattered `const`, so a test or an embedder can tighten the
//! timers without forking the crate — the source allows these to be
//! "compile-time or instance-configurable" and we take the latter.

use std::time::Duration;

/// Per-instance configuration. `Default` reproduces the constants exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Maximum live announcements (`waitslots` + `announces`) tracked per peer.
    pub max_announces: usize,
    /// Maximum hashes packed into a single outbound request.
    pub max_retrievals: usize,
    /// Maximum accumulated announced size packed into a single outbound request.
    pub max_retrieval_bytes: u64,
    /// How long a hash waits for a full broadcast before becoming eligible
    /// for an explicit request.
    pub arrive_timeout: Duration,
    /// Granularity of both internal timers; also the slack added to a
    /// timer's nominal deadline before it's considered overdue.
    pub gather_slack: Duration,
    /// How long a dispatched request may stay unanswered before it's
    /// considered timed out.
    pub fetch_timeout: Duration,
    /// Maximum entries retained in the underpriced negative cache.
    pub underpriced_set: usize,
    /// Maximum age of an underpriced negative cache entry before it's
    /// treated as absent.
    pub underpriced_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_announces: 4096,
            max_retrievals: 256,
            max_retrieval_bytes: 128 * 1024,
            arrive_timeout: Duration::from_millis(500),
            gather_slack: Duration::from_millis(100),
            fetch_timeout: Duration::from_secs(5),
            underpriced_set: 32_768,
            underpriced_timeout: Duration::from_secs(5 * 60),
        }
    }
}
