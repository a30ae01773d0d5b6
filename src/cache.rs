//! Short-lived cache of full-hash verdicts from `search_hashes`.
//!
//! Positive entries map a full hash and threat type to an expiry. Negative
//! entries map the partial hash that was searched to an expiry; while valid,
//! every full hash under it without a live positive entry is safe.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

use crate::api::{SearchHashesRequest, SearchHashesResponse};
use crate::config::Clock;
use crate::hash::{HashPrefix, MAX_HASH_PREFIX_LENGTH, MIN_HASH_PREFIX_LENGTH};
use crate::threat_type::ThreatType;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The hash is a known threat for these types. Do not ask the server.
    Positive(BTreeSet<ThreatType>),
    /// The hash is known to be safe. Do not ask the server.
    Negative,
    /// Nothing usable is cached; ask the server.
    Miss,
    /// The hash was not a full hash.
    InvalidInput,
}

#[derive(Debug, Default)]
struct CacheEntries {
    positive: AHashMap<HashPrefix, HashMap<ThreatType, SystemTime>>,
    negative: AHashMap<HashPrefix, SystemTime>,
}

impl CacheEntries {
    /// Negative expiries of every prefix of `full` present in the cache.
    fn negative_ttls<'a>(&'a self, full: &'a HashPrefix) -> impl Iterator<Item = SystemTime> + 'a {
        (MIN_HASH_PREFIX_LENGTH..=MAX_HASH_PREFIX_LENGTH.min(full.len()))
            .filter_map(move |n| self.negative.get(&full.truncate(n)).copied())
    }

    fn purge(&mut self, now: SystemTime) {
        // An expired positive survives while a covering negative entry outlives it,
        // so the hash keeps reporting a miss instead of falling back to "safe".
        let mut positive = std::mem::take(&mut self.positive);
        for (full, ttls) in positive.iter_mut() {
            ttls.retain(|_, pttl| {
                *pttl > now || self.negative_ttls(full).any(|nttl| nttl > *pttl)
            });
        }
        positive.retain(|_, ttls| !ttls.is_empty());
        self.positive = positive;

        // An expired negative survives while a full hash under it holds a live positive.
        let positive = &self.positive;
        self.negative.retain(|partial, nttl| {
            *nttl > now
                || positive.iter().any(|(full, ttls)| {
                    partial.is_prefix_of(full) && ttls.values().any(|pttl| *pttl > now)
                })
        });
    }
}

/// Thread-safe verdict cache.
pub struct ResultCache {
    entries: RwLock<CacheEntries>,
    clock: Clock,
}

impl ResultCache {
    /// Create an empty cache using `clock` for expiry checks.
    pub fn new(clock: Clock) -> Self {
        Self {
            entries: RwLock::new(CacheEntries::default()),
            clock,
        }
    }

    /// Record the result of a `search_hashes` call, then drop expired entries.
    pub fn update(&self, req: &SearchHashesRequest, resp: &SearchHashesResponse) {
        let now = (self.clock)();
        let mut entries = self.entries.write();

        for threat in &resp.threats {
            if !threat.hash.is_full() {
                continue;
            }
            let ttls = entries.positive.entry(threat.hash.clone()).or_default();
            for td in &threat.threat_types {
                ttls.insert(*td, threat.expire_time);
            }
        }

        if let Some(nttl) = resp.negative_expire_time {
            entries.negative.insert(req.hash_prefix.clone(), nttl);
        }

        entries.purge(now);
    }

    /// Look up a full hash.
    pub fn lookup(&self, hash: &HashPrefix) -> CacheLookup {
        if !hash.is_full() {
            return CacheLookup::InvalidInput;
        }
        let now = (self.clock)();
        let entries = self.entries.read();

        let mut threats = BTreeSet::new();
        if let Some(ttls) = entries.positive.get(hash) {
            for (td, pttl) in ttls {
                if *pttl > now {
                    threats.insert(*td);
                } else {
                    // Any expired verdict means the server has to be asked again.
                    return CacheLookup::Miss;
                }
            }
        }
        if !threats.is_empty() {
            return CacheLookup::Positive(threats);
        }

        if entries.negative_ttls(hash).any(|nttl| nttl > now) {
            return CacheLookup::Negative;
        }
        CacheLookup::Miss
    }

    /// Drop expired entries.
    pub fn purge(&self) {
        let now = (self.clock)();
        self.entries.write().purge(now);
    }

    /// Number of full hashes and partial hashes held.
    pub fn len(&self) -> (usize, usize) {
        let entries = self.entries.read();
        (entries.positive.len(), entries.negative.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}
