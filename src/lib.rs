//! Webrisk - A client for URL threat list lookups.
//!
//! This crate checks URLs against locally synchronized lists of SHA-256 hash
//! prefixes (malware, social engineering, unwanted software), confirming
//! possible matches with the list server. Most safe URLs never leave the
//! process; only a short hash prefix is sent for the rest.
//!
//! # Features
//!
//! - **Local database**: Sorted prefix sets with longest-match lookup
//! - **Incremental sync**: RESET/DIFF updates with raw or Rice-coded entries,
//!   verified by SHA-256 checksum
//! - **Result cache**: Positive and negative full-hash verdicts with expiry
//! - **Persistence**: Checksummed, gzip-compressed snapshot file
//! - **Thread-safe**: Lookups never wait for a sync in progress
//!
//! # Quick Start
//!
//! ```ignore
//! use webrisk::{ClientConfig, ThreatType, WebriskClient};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("my-api-key")
//!     .with_db_path("/var/cache/webrisk.db")
//!     .with_threat_lists(&[ThreatType::Malware, ThreatType::SocialEngineering]);
//!
//! let client = WebriskClient::new(config)?;
//! client.wait_until_ready(Duration::from_secs(60))?;
//!
//! let threats = client.lookup_urls(&["http://example.com/download.exe"])?;
//! if threats[0].is_empty() {
//!     println!("safe");
//! }
//! ```
//!
//! # Lookup Order
//!
//! Each URL is expanded into host/path patterns, and each pattern is hashed:
//! 1. Local database (no prefix match means safe)
//! 2. Result cache (cached threat or cached safe verdict)
//! 3. `search_hashes` on the server, one request per distinct prefix
//!
//! # Logging
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) facade. Install any
//! logger in the host application to see them.

mod cache;
mod client;
mod config;
mod error;
mod threat_type;

pub mod api;
pub mod database;
pub mod diff;
pub mod hash;
pub mod urls;

// Re-export core types
pub use error::{DatabaseError, Error, Result};
pub use threat_type::{ThreatType, DEFAULT_THREAT_LISTS};

// Re-export the client
pub use client::{Stats, UrlThreat, WebriskClient};
pub use config::{
    ClientConfig, Clock, DEFAULT_CLIENT_ID, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER_URL,
    DEFAULT_UPDATE_PERIOD,
};

// Re-export building blocks for advanced usage
pub use api::{CompressionSet, HttpApi, ThreatApi};
pub use cache::{CacheLookup, ResultCache};
pub use database::ThreatDatabase;
pub use hash::{HashPrefix, HashPrefixes, PrefixSet};
