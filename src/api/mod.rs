//! Logical model of the two remote calls and the transport seam.
//!
//! [`ThreatApi`] is the only thing the database and client know about the
//! network. [`HttpApi`] talks to the real service; tests plug in a scripted
//! implementation.

mod http;

pub use http::HttpApi;

use bitflags::bitflags;
use std::time::{Duration, SystemTime};

use crate::hash::HashPrefix;
use crate::threat_type::ThreatType;
use crate::Result;

bitflags! {
    /// Encodings the client accepts in a diff response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CompressionSet: u32 {
        /// Plain concatenated prefixes and index lists.
        const RAW = 0b00000001;
        /// Golomb-Rice delta coding.
        const RICE = 0b00000010;
    }
}

impl CompressionSet {
    /// Wire names of the enabled encodings.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(CompressionSet::RAW) {
            names.push("RAW");
        }
        if self.contains(CompressionSet::RICE) {
            names.push("RICE");
        }
        names
    }
}

impl Default for CompressionSet {
    fn default() -> Self {
        CompressionSet::RAW | CompressionSet::RICE
    }
}

/// Whether a diff response replaces or patches the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Unspecified,
    /// Apply removals then additions to the existing list.
    Diff,
    /// Additions form the complete new list.
    Reset,
}

/// Golomb-Rice coded run of ascending integers.
///
/// `first_value` is stored verbatim; `encoded_data` holds `entry_count`
/// deltas following it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiceDeltaEncoding {
    pub first_value: u64,
    pub rice_parameter: u32,
    pub entry_count: u32,
    pub encoded_data: Vec<u8>,
}

/// Same-length prefixes concatenated together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHashes {
    pub prefix_size: u32,
    pub raw_hashes: Vec<u8>,
}

/// Prefixes to add to a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreatEntryAdditions {
    pub raw_hashes: Vec<RawHashes>,
    pub rice_hashes: Option<RiceDeltaEncoding>,
}

/// Positions (in the sorted local list) to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreatEntryRemovals {
    pub raw_indices: Option<Vec<u32>>,
    pub rice_indices: Option<RiceDeltaEncoding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeDiffRequest {
    pub threat_type: ThreatType,
    /// Empty on first sync or after corruption, which forces a RESET.
    pub version_token: Vec<u8>,
    pub supported_compressions: CompressionSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputeDiffResponse {
    pub response_type: ResponseType,
    pub additions: Option<ThreatEntryAdditions>,
    pub removals: Option<ThreatEntryRemovals>,
    pub new_version_token: Vec<u8>,
    /// SHA-256 of the list after applying this response.
    pub checksum: Option<Vec<u8>>,
    pub recommended_next_diff: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHashesRequest {
    pub hash_prefix: HashPrefix,
    pub threat_types: Vec<ThreatType>,
}

/// A full hash known to be a threat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatHash {
    pub threat_types: Vec<ThreatType>,
    pub hash: HashPrefix,
    pub expire_time: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHashesResponse {
    pub threats: Vec<ThreatHash>,
    /// Until when hashes under the requested prefix that are not listed are safe.
    pub negative_expire_time: Option<SystemTime>,
}

/// The two remote calls the client depends on.
pub trait ThreatApi: Send + Sync {
    /// Fetch the changes to one threat list since `req.version_token`.
    fn compute_diff(&self, req: &ComputeDiffRequest, timeout: Duration)
        -> Result<ComputeDiffResponse>;

    /// Resolve a partial hash to the full hashes the server lists under it.
    fn search_hashes(
        &self,
        req: &SearchHashesRequest,
        timeout: Duration,
    ) -> Result<SearchHashesResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_names() {
        assert_eq!(CompressionSet::default().names(), vec!["RAW", "RICE"]);
        assert_eq!(CompressionSet::RAW.names(), vec!["RAW"]);
        assert!(CompressionSet::empty().names().is_empty());
    }
}
