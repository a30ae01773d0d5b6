//! The lookup client.
//!
//! [`WebriskClient`] ties the local [`ThreatDatabase`], the [`ResultCache`]
//! and a [`ThreatApi`] together. A background thread keeps the database in
//! sync; callers look URLs up concurrently from any thread.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::api::{HttpApi, SearchHashesRequest, ThreatApi};
use crate::cache::{CacheLookup, ResultCache};
use crate::config::ClientConfig;
use crate::database::ThreatDatabase;
use crate::hash::HashPrefix;
use crate::threat_type::ThreatType;
use crate::urls::generate_patterns;
use crate::{Error, Result};

/// A URL pattern that matched a threat list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlThreat {
    /// Canonical `host/path` pattern that matched.
    pub pattern: String,
    pub threat_type: ThreatType,
}

impl fmt::Display for UrlThreat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pattern, self.threat_type)
    }
}

/// Snapshot of client statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Hashes resolved by the local database alone.
    pub queries_by_database: u64,
    /// Hashes resolved by the result cache.
    pub queries_by_cache: u64,
    /// Successful `search_hashes` calls.
    pub queries_by_api: u64,
    /// Queries that could not be answered.
    pub queries_fail: u64,
    /// How far the database is behind its update schedule. Zero when the
    /// next sync is still in the future.
    pub database_update_lag: Duration,
}

#[derive(Debug, Default)]
struct StatsCounters {
    by_database: AtomicU64,
    by_cache: AtomicU64,
    by_api: AtomicU64,
    fail: AtomicU64,
}

impl StatsCounters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// State shared with the updater thread.
struct Shared {
    config: ClientConfig,
    api: Arc<dyn ThreatApi>,
    db: ThreatDatabase,
    cache: ResultCache,
    stats: StatsCounters,
    closed: AtomicBool,
}

impl Shared {
    fn run_updater(&self, mut delay: Duration, shutdown: mpsc::Receiver<()>) {
        loop {
            log::debug!("Next update in {:?}", delay);
            match shutdown.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {
                    let (next, ok) = self.db.update(self.api.as_ref(), self.config.request_timeout);
                    if ok {
                        log::info!("Background threat list update complete");
                        self.cache.purge();
                    }
                    delay = next;
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Updater stopped");
                    return;
                }
            }
        }
    }
}

/// Background sync thread and its shutdown channel.
struct Updater {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Updater {
    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A full hash that needs a verdict, with the URLs it came from.
struct Candidate {
    pattern: String,
    urls: Vec<usize>,
}

/// Threat list lookup client.
///
/// # Example
///
/// ```ignore
/// use webrisk::{ClientConfig, WebriskClient};
/// use std::time::Duration;
///
/// let client = WebriskClient::new(ClientConfig::new("my-api-key"))?;
/// client.wait_until_ready(Duration::from_secs(60))?;
///
/// let threats = client.lookup_urls(&["http://testsafebrowsing.appspot.com/s/malware.html"])?;
/// for t in &threats[0] {
///     println!("{}", t);
/// }
/// client.close();
/// ```
pub struct WebriskClient {
    shared: Arc<Shared>,
    updater: Mutex<Updater>,
}

impl WebriskClient {
    /// Create a client talking to the configured server over HTTPS.
    ///
    /// Loads the snapshot from `db_path` when one is configured and fresh.
    /// Otherwise performs an initial sync before returning.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = HttpApi::new(&config)?;
        Self::with_api(config, Arc::new(api))
    }

    /// Create a client using a custom [`ThreatApi`] implementation.
    pub fn with_api(mut config: ClientConfig, api: Arc<dyn ThreatApi>) -> Result<Self> {
        config.set_defaults();

        let db = ThreatDatabase::new(&config);
        let delay = if db.init() {
            config.update_period.saturating_sub(db.since_last_update())
        } else {
            let (delay, ok) = db.update(api.as_ref(), config.request_timeout);
            if !ok {
                log::warn!("Initial threat list sync failed, retrying in {:?}", delay);
            }
            delay
        };

        let shared = Arc::new(Shared {
            cache: ResultCache::new(config.clock()),
            config,
            api,
            db,
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("webrisk-updater".to_string())
            .spawn(move || thread_shared.run_updater(delay, shutdown_rx))?;

        Ok(Self {
            shared,
            updater: Mutex::new(Updater {
                shutdown_tx: Some(shutdown_tx),
                handle: Some(handle),
            }),
        })
    }

    /// Current statistics and database health.
    pub fn status(&self) -> (Stats, Result<()>) {
        let c = &self.shared.stats;
        let stats = Stats {
            queries_by_database: c.by_database.load(Ordering::Relaxed),
            queries_by_cache: c.by_cache.load(Ordering::Relaxed),
            queries_by_api: c.by_api.load(Ordering::Relaxed),
            queries_fail: c.fail.load(Ordering::Relaxed),
            database_update_lag: self.shared.db.update_lag(),
        };
        (stats, self.shared.db.status().map_err(Error::from))
    }

    /// Block until the database is usable, the client is closed, or `timeout` passes.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.shared.db.wait_until_ready(timeout)
    }

    /// Look up URLs with the configured request timeout.
    ///
    /// See [`lookup_urls_with_timeout`](Self::lookup_urls_with_timeout).
    pub fn lookup_urls<S: AsRef<str>>(&self, urls: &[S]) -> Result<Vec<Vec<UrlThreat>>> {
        self.lookup_urls_with_timeout(urls, self.shared.config.request_timeout)
    }

    /// Look up URLs against the subscribed threat lists.
    ///
    /// Returns one entry per input URL, in input order; an empty entry means
    /// no threat was found. Fails without results when the database is not
    /// ready. When a server call fails part way, the error is
    /// [`Error::PartialLookup`] carrying what was resolved so far.
    ///
    /// A `timeout` too large to represent means no overall deadline; each
    /// server call is then bounded by the configured request timeout.
    pub fn lookup_urls_with_timeout<S: AsRef<str>>(
        &self,
        urls: &[S],
        timeout: Duration,
    ) -> Result<Vec<Vec<UrlThreat>>> {
        let deadline = Instant::now().checked_add(timeout);
        let shared = &self.shared;
        let stats = &shared.stats;

        if self.is_closed() {
            return Err(Error::Closed);
        }
        if let Err(e) = shared.db.status() {
            log::warn!("Inconsistent database: {}", e);
            StatsCounters::add(&stats.fail, urls.len());
            return Err(e.into());
        }

        // Collect the distinct full hashes of every URL's patterns.
        let mut candidates: Vec<(HashPrefix, Candidate)> = Vec::new();
        let mut index: HashMap<HashPrefix, usize> = HashMap::new();
        for (i, url) in urls.iter().enumerate() {
            let patterns = match generate_patterns(url.as_ref()) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Error generating URL patterns: {}", e);
                    StatsCounters::add(&stats.fail, urls.len() - i);
                    return Err(e);
                }
            };
            for pattern in patterns {
                let hash = HashPrefix::from_pattern(&pattern);
                match index.get(&hash) {
                    Some(&n) => {
                        let sources = &mut candidates[n].1.urls;
                        if !sources.contains(&i) {
                            sources.push(i);
                        }
                    }
                    None => {
                        index.insert(hash.clone(), candidates.len());
                        candidates.push((hash, Candidate { pattern, urls: vec![i] }));
                    }
                }
            }
        }

        let mut threats = vec![Vec::new(); urls.len()];
        // Lists the database flagged for each hash still awaiting the server.
        let mut pending: HashMap<usize, Vec<ThreatType>> = HashMap::new();
        let mut requests: BTreeMap<HashPrefix, BTreeSet<ThreatType>> = BTreeMap::new();

        for (n, (hash, candidate)) in candidates.iter().enumerate() {
            let (partial, lists) = shared.db.lookup(hash);
            if lists.is_empty() {
                StatsCounters::add(&stats.by_database, 1);
                continue;
            }

            match shared.cache.lookup(hash) {
                CacheLookup::Positive(cached) => {
                    for td in lists.iter().copied().filter(|td| cached.contains(td)) {
                        record(&mut threats, candidate, td);
                    }
                    StatsCounters::add(&stats.by_cache, 1);
                }
                CacheLookup::Negative => {
                    StatsCounters::add(&stats.by_cache, 1);
                }
                CacheLookup::Miss | CacheLookup::InvalidInput => {
                    requests.entry(partial).or_default().extend(lists.iter().copied());
                    pending.insert(n, lists);
                }
            }
        }

        for (partial, lists) in requests {
            let req = SearchHashesRequest {
                hash_prefix: partial,
                threat_types: lists.into_iter().collect(),
            };

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => shared.config.request_timeout,
            };
            let result = if remaining.is_zero() {
                Err(Error::Timeout)
            } else {
                shared.api.search_hashes(&req, remaining)
            };
            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    log::warn!("SearchHashes failure: {}", e);
                    StatsCounters::add(&stats.fail, 1);
                    return Err(Error::PartialLookup {
                        threats,
                        source: Box::new(e),
                    });
                }
            };

            shared.cache.update(&req, &resp);

            for threat in &resp.threats {
                let Some(&n) = index.get(&threat.hash) else {
                    continue;
                };
                let Some(lists) = pending.get(&n) else {
                    continue;
                };
                let candidate = &candidates[n].1;
                for td in threat.threat_types.iter().copied().filter(|td| lists.contains(td)) {
                    record(&mut threats, candidate, td);
                }
            }
            StatsCounters::add(&stats.by_api, 1);
        }

        Ok(threats)
    }

    /// Stop the updater. Every later call fails with [`Error::Closed`].
    ///
    /// Must not race with in-flight lookups. Calling it twice is harmless.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.db.close();
        self.updater.lock().stop();
        log::debug!("Client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WebriskClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn record(threats: &mut [Vec<UrlThreat>], candidate: &Candidate, threat_type: ThreatType) {
    for &i in &candidate.urls {
        let t = UrlThreat {
            pattern: candidate.pattern.clone(),
            threat_type,
        };
        if !threats[i].contains(&t) {
            threats[i].push(t);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ComputeDiffRequest, ComputeDiffResponse, RawHashes, ResponseType, SearchHashesResponse,
        ThreatEntryAdditions, ThreatHash,
    };
    use crate::hash::{HashPrefixes, MIN_HASH_PREFIX_LENGTH};
    use std::time::SystemTime;

    /// Serves one fixed list per type and answers searches from `full`.
    struct FakeApi {
        lists: BTreeMap<ThreatType, Vec<HashPrefix>>,
        full: Vec<(HashPrefix, ThreatType)>,
        /// When set, every reported threat carries these types regardless of the request.
        reported_types: Option<Vec<ThreatType>>,
        searches: Mutex<Vec<SearchHashesRequest>>,
    }

    impl FakeApi {
        fn new(entries: &[(&str, ThreatType)]) -> Self {
            let mut lists: BTreeMap<ThreatType, Vec<HashPrefix>> = BTreeMap::new();
            let mut full = Vec::new();
            for (pattern, td) in entries {
                let hash = HashPrefix::from_pattern(pattern);
                lists
                    .entry(*td)
                    .or_default()
                    .push(hash.truncate(MIN_HASH_PREFIX_LENGTH));
                full.push((hash, *td));
            }
            Self {
                lists,
                full,
                reported_types: None,
                searches: Mutex::new(Vec::new()),
            }
        }
    }

    impl ThreatApi for FakeApi {
        fn compute_diff(&self, req: &ComputeDiffRequest, _timeout: Duration) -> Result<ComputeDiffResponse> {
            let mut hashes: HashPrefixes = self.lists.get(&req.threat_type).cloned().unwrap_or_default().into();
            hashes.sort();
            let raw: Vec<u8> = hashes.iter().flat_map(|h| h.as_bytes().to_vec()).collect();
            Ok(ComputeDiffResponse {
                response_type: ResponseType::Reset,
                additions: Some(ThreatEntryAdditions {
                    raw_hashes: vec![RawHashes {
                        prefix_size: MIN_HASH_PREFIX_LENGTH as u32,
                        raw_hashes: raw,
                    }],
                    rice_hashes: None,
                }),
                new_version_token: b"v1".to_vec(),
                checksum: Some(hashes.sha256()),
                ..Default::default()
            })
        }

        fn search_hashes(&self, req: &SearchHashesRequest, _timeout: Duration) -> Result<SearchHashesResponse> {
            self.searches.lock().push(req.clone());
            let expire_time = SystemTime::now() + Duration::from_secs(300);
            let threats = self
                .full
                .iter()
                .filter(|(h, td)| {
                    req.hash_prefix.is_prefix_of(h)
                        && (self.reported_types.is_some() || req.threat_types.contains(td))
                })
                .map(|(h, td)| ThreatHash {
                    threat_types: self.reported_types.clone().unwrap_or_else(|| vec![*td]),
                    hash: h.clone(),
                    expire_time,
                })
                .collect();
            Ok(SearchHashesResponse {
                threats,
                negative_expire_time: Some(expire_time),
            })
        }
    }

    fn client(api: Arc<FakeApi>) -> WebriskClient {
        WebriskClient::with_api(ClientConfig::new("test-key"), api).unwrap()
    }

    #[test]
    fn test_lookup_urls() {
        let api = Arc::new(FakeApi::new(&[
            ("evil.example/", ThreatType::Malware),
            ("phish.example/login", ThreatType::SocialEngineering),
        ]));
        let c = client(api.clone());
        c.wait_until_ready(Duration::from_secs(1)).unwrap();

        let threats = c
            .lookup_urls(&[
                "http://good.example/",
                "http://evil.example/some/page.html",
                "https://phish.example/login",
            ])
            .unwrap();

        assert_eq!(threats.len(), 3);
        assert!(threats[0].is_empty());
        assert_eq!(
            threats[1],
            vec![UrlThreat {
                pattern: "evil.example/".to_string(),
                threat_type: ThreatType::Malware,
            }]
        );
        assert_eq!(threats[2][0].threat_type, ThreatType::SocialEngineering);

        // Second lookup is served from the cache.
        let searches = api.searches.lock().len();
        let again = c.lookup_urls(&["http://evil.example/other"]).unwrap();
        assert_eq!(again[0][0].threat_type, ThreatType::Malware);
        assert_eq!(api.searches.lock().len(), searches);

        let (stats, status) = c.status();
        assert!(status.is_ok());
        assert!(stats.queries_by_api >= 2);
        assert!(stats.queries_by_cache >= 1);
        assert!(stats.queries_by_database >= 1);
        assert_eq!(stats.queries_fail, 0);
    }

    #[test]
    fn test_duplicate_urls() {
        let api = Arc::new(FakeApi::new(&[("evil.example/", ThreatType::Malware)]));
        let c = client(api.clone());

        let threats = c
            .lookup_urls(&["http://evil.example/", "http://evil.example/"])
            .unwrap();
        assert_eq!(threats[0], threats[1]);
        assert_eq!(threats[0].len(), 1);
        assert_eq!(api.searches.lock().len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let c = client(Arc::new(FakeApi::new(&[])));
        assert!(c.lookup_urls::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_url() {
        let c = client(Arc::new(FakeApi::new(&[])));
        let err = c.lookup_urls(&["http://good.example/", ":bad"]).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert_eq!(c.status().0.queries_fail, 1);
    }

    #[test]
    fn test_close() {
        let c = client(Arc::new(FakeApi::new(&[])));
        c.close();
        c.close();
        assert!(c.is_closed());
        assert!(matches!(c.lookup_urls(&["http://a.example/"]), Err(Error::Closed)));
        assert!(matches!(c.wait_until_ready(Duration::from_millis(10)), Err(Error::Closed)));
    }

    #[test]
    fn test_stats_default() {
        let stats = Stats::default();
        assert_eq!(stats.queries_by_api, 0);
        assert_eq!(stats.database_update_lag, Duration::ZERO);
    }

    #[test]
    fn test_cached_verdict_limited_to_flagged_lists() {
        let mut api = FakeApi::new(&[("evil.example/", ThreatType::Malware)]);
        api.reported_types = Some(vec![ThreatType::Malware, ThreatType::SocialEngineering]);
        let api = Arc::new(api);
        let c = client(api.clone());
        let want = vec![UrlThreat {
            pattern: "evil.example/".to_string(),
            threat_type: ThreatType::Malware,
        }];

        let first = c.lookup_urls(&["http://evil.example/"]).unwrap();
        assert_eq!(first[0], want);

        // The cache holds both types the server reported.
        let hash = HashPrefix::from_pattern("evil.example/");
        assert_eq!(
            c.shared.cache.lookup(&hash),
            CacheLookup::Positive(
                [ThreatType::Malware, ThreatType::SocialEngineering]
                    .into_iter()
                    .collect()
            )
        );

        let searches = api.searches.lock().len();
        let second = c.lookup_urls(&["http://evil.example/"]).unwrap();
        assert_eq!(second[0], want);
        assert_eq!(api.searches.lock().len(), searches);
    }

    #[test]
    fn test_spent_budget_fails_without_touching_cache() {
        let api = Arc::new(FakeApi::new(&[("evil.example/", ThreatType::Malware)]));
        let c = client(api.clone());

        match c.lookup_urls_with_timeout(&["http://good.example/", "http://evil.example/"], Duration::ZERO) {
            Err(Error::PartialLookup { threats, source }) => {
                assert!(matches!(*source, Error::Timeout));
                assert_eq!(threats.len(), 2);
                assert!(threats.iter().all(|t| t.is_empty()));
            }
            other => panic!("expected partial lookup, got {:?}", other),
        }
        assert!(api.searches.lock().is_empty());
        assert!(c.shared.cache.is_empty());
        assert_eq!(c.status().0.queries_fail, 1);
    }

    #[test]
    fn test_unbounded_timeout() {
        let api = Arc::new(FakeApi::new(&[("evil.example/", ThreatType::Malware)]));
        let c = client(api);
        let threats = c
            .lookup_urls_with_timeout(&["http://evil.example/"], Duration::MAX)
            .unwrap();
        assert_eq!(threats[0][0].threat_type, ThreatType::Malware);
    }
}
