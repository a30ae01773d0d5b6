//! Local threat list database.
//!
//! Holds one [`PrefixSet`] per subscribed list, synchronized with the server
//! through [`ThreatApi::compute_diff`]. The lookup structure is immutable and
//! published through an [`ArcSwap`]; a sync builds a complete replacement and
//! swaps it in, so readers never see a half-applied update.
//!
//! State machine: not initialized, then ready or faulted. A faulted database
//! becomes ready again after the next successful sync.

mod list;
mod snapshot;

pub use list::PartialHashes;
pub use snapshot::{DatabaseFormat, FormatFlags, SnapshotHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::api::{ComputeDiffRequest, CompressionSet, ThreatApi};
use crate::config::{ClientConfig, Clock};
use crate::error::DatabaseError;
use crate::hash::{HashPrefix, PrefixSet};
use crate::threat_type::ThreatType;
use crate::{Error, Result};

/// Longest an update is expected to take. Added to the update period before
/// the database is declared stale, and used as the scheduling jitter bound.
pub const JITTER: Duration = Duration::from_secs(30);

/// First retry delay after a failed sync.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(15 * 60);

/// Upper bound on the retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// One list as used for lookups.
#[derive(Debug, Clone)]
struct ThreatList {
    set: PrefixSet,
    sha256: Vec<u8>,
    version_token: Vec<u8>,
}

impl ThreatList {
    fn from_partial(phs: &PartialHashes) -> Self {
        Self {
            set: PrefixSet::import(&phs.hashes),
            sha256: phs.sha256.clone(),
            version_token: phs.version_token.clone(),
        }
    }

    fn to_partial(&self) -> PartialHashes {
        PartialHashes {
            hashes: self.set.export(),
            sha256: self.sha256.clone(),
            version_token: self.version_token.clone(),
        }
    }
}

/// Immutable view published to readers.
#[derive(Debug, Clone)]
struct ThreatLists {
    lists: BTreeMap<ThreatType, ThreatList>,
    /// Time of the sync these lists came from.
    last: SystemTime,
}

impl ThreatLists {
    fn empty() -> Self {
        Self {
            lists: BTreeMap::new(),
            last: SystemTime::UNIX_EPOCH,
        }
    }
}

/// Bookkeeping owned by the updater.
#[derive(Debug, Default)]
struct UpdateState {
    /// Consecutive failed API calls.
    api_errors: u32,
    /// Lists whose local state was found corrupt; their next request starts over.
    reset: HashSet<ThreatType>,
}

/// Local database of partial hashes for the subscribed threat lists.
pub struct ThreatDatabase {
    threat_lists: Vec<ThreatType>,
    update_period: Duration,
    db_path: Option<PathBuf>,
    compression: CompressionSet,
    clock: Clock,

    tables: ArcSwap<ThreatLists>,
    /// Last error, `None` while healthy.
    health: RwLock<Option<DatabaseError>>,
    update: Mutex<UpdateState>,

    ready_lock: Mutex<bool>,
    ready: Condvar,
}

impl ThreatDatabase {
    /// Create an empty, not yet initialized database.
    pub fn new(config: &ClientConfig) -> Self {
        let mut config = config.clone();
        config.set_defaults();
        Self {
            threat_lists: config.threat_lists.clone(),
            update_period: config.update_period,
            db_path: config.db_path.clone(),
            compression: config.compression,
            clock: config.clock(),
            tables: ArcSwap::from_pointee(ThreatLists::empty()),
            health: RwLock::new(Some(DatabaseError::NotInitialized)),
            update: Mutex::new(UpdateState::default()),
            ready_lock: Mutex::new(false),
            ready: Condvar::new(),
        }
    }

    fn now(&self) -> SystemTime {
        (self.clock)()
    }

    fn is_stale(&self, last: SystemTime) -> bool {
        let age = self.now().duration_since(last).unwrap_or_default();
        age > 2 * (self.update_period + JITTER)
    }

    /// Load the snapshot from the configured path.
    ///
    /// Returns `true` if the database is ready for lookups. On `false`,
    /// [`status`](Self::status) reports why.
    pub fn init(&self) -> bool {
        let _guard = self.update.lock();

        let path = match &self.db_path {
            Some(p) => p,
            None => {
                log::info!("No database file specified");
                self.set_error(DatabaseError::NotInitialized);
                return false;
            }
        };

        let dbf = match snapshot::load(path) {
            Ok(dbf) => dbf,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No snapshot at {:?}", path);
                self.set_error(DatabaseError::NotInitialized);
                return false;
            }
            Err(e) => {
                log::warn!("Failed to load snapshot {:?}: {}", path, e);
                self.set_error(DatabaseError::Corrupted(e.to_string()));
                return false;
            }
        };

        if self.is_stale(dbf.time) {
            log::warn!("Snapshot {:?} is stale", path);
            self.set_error(DatabaseError::Stale);
            return false;
        }

        let mut lists = BTreeMap::new();
        for td in &self.threat_lists {
            match dbf.table.get(td) {
                Some(phs) => {
                    lists.insert(*td, ThreatList::from_partial(phs));
                }
                None => {
                    log::warn!("Database configuration mismatch, missing {}", td);
                    self.set_error(DatabaseError::ConfigMismatch(*td));
                    return false;
                }
            }
        }

        self.tables.store(Arc::new(ThreatLists {
            lists,
            last: dbf.time,
        }));
        self.clear_error();
        log::info!("Loaded snapshot from {:?}", path);
        true
    }

    /// Sync every subscribed list with the server.
    ///
    /// Returns the delay until the next sync and whether this one succeeded.
    /// Nothing is published unless every list applies cleanly.
    pub fn update(&self, api: &dyn ThreatApi, timeout: Duration) -> (Duration, bool) {
        let mut state = self.update.lock();
        let current = self.tables.load_full();

        let jitter = fastrand::i64(-(JITTER.as_millis() as i64)..=JITTER.as_millis() as i64);
        let mut next_wait = add_signed_millis(self.update_period, jitter);
        let last = self.now();

        let mut responses = Vec::with_capacity(self.threat_lists.len());
        for td in &self.threat_lists {
            let version_token = match current.lists.get(td) {
                Some(list) if !state.reset.contains(td) => list.version_token.clone(),
                _ => Vec::new(),
            };
            let req = ComputeDiffRequest {
                threat_type: *td,
                version_token,
                supported_compressions: self.compression,
            };

            let resp = match api.compute_diff(&req, timeout) {
                Ok(resp) => resp,
                Err(e) if e.is_corruption() => {
                    log::warn!("Malformed ComputeDiff response for {}: {}", td, e);
                    state.reset.insert(*td);
                    self.set_error(DatabaseError::Corrupted(e.to_string()));
                    return (next_wait, false);
                }
                Err(e) => {
                    state.api_errors += 1;
                    log::warn!("ComputeDiff failure ({}): {}", state.api_errors, e);
                    self.set_error(DatabaseError::UpdateFailed(e.to_string()));
                    return (retry_delay(state.api_errors), false);
                }
            };

            if let Some(recommended) = resp.recommended_next_diff {
                let server_wait = recommended.duration_since(last).unwrap_or_default();
                if server_wait > next_wait {
                    next_wait = server_wait;
                    log::info!("Server requested next update in {:?}", next_wait);
                }
            }
            responses.push((*td, resp));
        }
        state.api_errors = 0;

        let mut table = BTreeMap::new();
        for (td, resp) in &responses {
            let base = match current.lists.get(td) {
                Some(list) if !state.reset.contains(td) => Some(list.to_partial()),
                _ => None,
            };
            match PartialHashes::apply(base.as_ref(), resp) {
                Ok(phs) => {
                    table.insert(*td, phs);
                }
                Err(e) => {
                    log::warn!("Update failure for {}: {}", td, e);
                    state.reset.insert(*td);
                    self.set_error(DatabaseError::Corrupted(e.to_string()));
                    return (next_wait, false);
                }
            }
        }
        state.reset.clear();

        let lists = table
            .iter()
            .map(|(td, phs)| (*td, ThreatList::from_partial(phs)))
            .collect();
        self.tables.store(Arc::new(ThreatLists { lists, last }));

        if let Some(path) = &self.db_path {
            let dbf = DatabaseFormat { table, time: last };
            if let Err(e) = snapshot::save(path, &dbf) {
                log::warn!("Failed to save snapshot {:?}: {}", path, e);
            }
        }

        self.clear_error();
        (next_wait, true)
    }

    /// Match a full hash against every list.
    ///
    /// Returns the shortest matched prefix and the lists that matched. The
    /// list is empty when no list contains a prefix of `hash`.
    ///
    /// # Panics
    ///
    /// Panics if `hash` is not a full hash.
    pub fn lookup(&self, hash: &HashPrefix) -> (HashPrefix, Vec<ThreatType>) {
        assert!(hash.is_full(), "hash is not full: {}", hash);

        let tables = self.tables.load();
        let mut matched = 0;
        let mut threat_types = Vec::new();
        for (td, list) in &tables.lists {
            let n = list.set.lookup(hash.as_bytes());
            if n > 0 {
                matched = if matched == 0 { n } else { matched.min(n) };
                threat_types.push(*td);
            }
        }
        (hash.truncate(matched), threat_types)
    }

    /// `Ok` only when the last sync succeeded and is not stale.
    pub fn status(&self) -> std::result::Result<(), DatabaseError> {
        if let Some(err) = self.health.read().as_ref() {
            return Err(err.clone());
        }
        if self.is_stale(self.tables.load().last) {
            let mut health = self.health.write();
            if health.is_none() {
                log::warn!("Threat lists went stale");
                *health = Some(DatabaseError::Stale);
            }
            return Err(DatabaseError::Stale);
        }
        Ok(())
    }

    /// Time since the last successful sync.
    pub fn since_last_update(&self) -> Duration {
        self.now()
            .duration_since(self.tables.load().last)
            .unwrap_or_default()
    }

    /// How far past its scheduled time the next sync is.
    pub fn update_lag(&self) -> Duration {
        self.since_last_update().saturating_sub(self.update_period)
    }

    /// Time of the last successful sync or snapshot load.
    pub fn last_update(&self) -> SystemTime {
        self.tables.load().last
    }

    /// Lists currently held, with their sizes.
    pub fn list_sizes(&self) -> Vec<(ThreatType, usize)> {
        self.tables
            .load()
            .lists
            .iter()
            .map(|(td, list)| (*td, list.set.len()))
            .collect()
    }

    /// Block until the database is healthy, [`close`](Self::close) is called,
    /// or `timeout` passes.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut closed = self.ready_lock.lock();
        loop {
            if *closed {
                return Err(Error::Closed);
            }
            if self.status().is_ok() {
                return Ok(());
            }
            if self.ready.wait_until(&mut closed, deadline).timed_out() {
                return match self.status() {
                    Ok(()) => Ok(()),
                    Err(_) if *closed => Err(Error::Closed),
                    Err(_) => Err(Error::Timeout),
                };
            }
        }
    }

    /// Wake every waiter; further waits fail with [`Error::Closed`].
    pub fn close(&self) {
        *self.ready_lock.lock() = true;
        self.ready.notify_all();
    }

    fn set_error(&self, err: DatabaseError) {
        *self.health.write() = Some(err);
    }

    fn clear_error(&self) {
        let _closed = self.ready_lock.lock();
        let was_bad = self.health.write().take().is_some();
        if was_bad {
            log::info!("Database is now healthy");
        }
        self.ready.notify_all();
    }
}

/// Retry delay after `errors` consecutive failures:
/// `min(2^(errors-1) * 15min * (1 + rand), 24h)`.
fn retry_delay(errors: u32) -> Duration {
    let exp = errors.saturating_sub(1).min(16) as i32;
    let factor = 2f64.powi(exp) * (fastrand::f64() + 1.0);
    let delay = BASE_RETRY_DELAY.as_secs_f64() * factor;
    if delay >= MAX_RETRY_DELAY.as_secs_f64() {
        MAX_RETRY_DELAY
    } else {
        Duration::from_secs_f64(delay)
    }
}

fn add_signed_millis(d: Duration, millis: i64) -> Duration {
    if millis >= 0 {
        d + Duration::from_millis(millis as u64)
    } else {
        d.saturating_sub(Duration::from_millis(millis.unsigned_abs()))
    }
}
