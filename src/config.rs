//! Client configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::api::CompressionSet;
use crate::threat_type::{ThreatType, DEFAULT_THREAT_LISTS};

/// Default threat list service host.
pub const DEFAULT_SERVER_URL: &str = "webrisk.googleapis.com";

/// Default identifier sent with API requests.
pub const DEFAULT_CLIENT_ID: &str = "RustWebriskClient";

/// Default interval between list syncs.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Default timeout for a single API call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Source of the current time. Replaceable so tests can move time forward.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Configuration for [`WebriskClient`](crate::WebriskClient).
///
/// # Example
///
/// ```ignore
/// use webrisk::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("my-api-key")
///     .with_db_path("/var/cache/webrisk.db")
///     .with_update_period(Duration::from_secs(15 * 60));
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Host (optionally with scheme) of the threat list service.
    pub server_url: String,
    /// API key sent with every request.
    pub api_key: String,
    /// Proxy override. `None` uses ureq's environment handling.
    pub proxy_url: Option<String>,
    pub client_id: String,
    pub client_version: String,
    /// Snapshot file. `None` keeps the database in memory only.
    pub db_path: Option<PathBuf>,
    pub update_period: Duration,
    /// Subscribed lists. Empty means [`DEFAULT_THREAT_LISTS`].
    pub threat_lists: Vec<ThreatType>,
    pub request_timeout: Duration,
    pub compression: CompressionSet,
    clock: Clock,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: String::new(),
            proxy_url: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            db_path: None,
            update_period: DEFAULT_UPDATE_PERIOD,
            threat_lists: DEFAULT_THREAT_LISTS.to_vec(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            compression: CompressionSet::default(),
            clock: Arc::new(SystemTime::now),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with defaults and the given API key.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            ..Self::default()
        }
    }

    pub fn with_server_url(mut self, url: &str) -> Self {
        self.server_url = url.to_string();
        self
    }

    pub fn with_proxy_url(mut self, url: &str) -> Self {
        self.proxy_url = Some(url.to_string());
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_update_period(mut self, period: Duration) -> Self {
        self.update_period = period;
        self
    }

    pub fn with_threat_lists(mut self, lists: &[ThreatType]) -> Self {
        self.threat_lists = lists.to_vec();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_compression(mut self, compression: CompressionSet) -> Self {
        self.compression = compression;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current time according to the configured clock.
    pub fn now(&self) -> SystemTime {
        (self.clock)()
    }

    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    /// Replace zero and empty values with defaults, and sort and dedup the
    /// subscribed lists.
    pub fn set_defaults(&mut self) {
        if self.server_url.is_empty() {
            self.server_url = DEFAULT_SERVER_URL.to_string();
        }
        if self.client_id.is_empty() {
            self.client_id = DEFAULT_CLIENT_ID.to_string();
        }
        if self.client_version.is_empty() {
            self.client_version = env!("CARGO_PKG_VERSION").to_string();
        }
        if self.db_path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            self.db_path = None;
        }
        if self.update_period.is_zero() {
            self.update_period = DEFAULT_UPDATE_PERIOD;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }
        if self.threat_lists.is_empty() {
            self.threat_lists = DEFAULT_THREAT_LISTS.to_vec();
        }
        if self.compression.is_empty() {
            self.compression = CompressionSet::default();
        }
        self.threat_lists.sort();
        self.threat_lists.dedup();
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("proxy_url", &self.proxy_url)
            .field("client_id", &self.client_id)
            .field("client_version", &self.client_version)
            .field("db_path", &self.db_path)
            .field("update_period", &self.update_period)
            .field("threat_lists", &self.threat_lists)
            .field("request_timeout", &self.request_timeout)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("key");
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.update_period, Duration::from_secs(1800));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.threat_lists, DEFAULT_THREAT_LISTS.to_vec());
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_set_defaults() {
        let mut config = ClientConfig {
            server_url: String::new(),
            update_period: Duration::ZERO,
            request_timeout: Duration::ZERO,
            threat_lists: vec![ThreatType::UnwantedSoftware, ThreatType::Malware, ThreatType::Malware],
            db_path: Some(PathBuf::new()),
            ..ClientConfig::default()
        };
        config.set_defaults();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.update_period, DEFAULT_UPDATE_PERIOD);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(
            config.threat_lists,
            vec![ThreatType::Malware, ThreatType::UnwantedSoftware]
        );
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_clock_override() {
        let fixed = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let config = ClientConfig::default().with_clock(move || fixed);
        assert_eq!(config.now(), fixed);
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::new("secret-key");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }
}
