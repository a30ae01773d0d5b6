//! Hash prefixes and prefix lists.
//!
//! A hash prefix is the leading 4..=32 bytes of the SHA-256 digest of a URL
//! pattern. A prefix of 32 bytes is a full hash.

mod set;

pub use set::PrefixSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Error, Result};

/// Shortest prefix the server hands out.
pub const MIN_HASH_PREFIX_LENGTH: usize = 4;

/// Length of a full SHA-256 hash.
pub const MAX_HASH_PREFIX_LENGTH: usize = 32;

/// Leading bytes of a SHA-256 digest.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashPrefix(Vec<u8>);

impl HashPrefix {
    /// Create a prefix from raw bytes. No length check is done here; see
    /// [`HashPrefix::is_valid`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Full hash of a URL pattern.
    pub fn from_pattern(pattern: &str) -> Self {
        Self(Sha256::digest(pattern.as_bytes()).to_vec())
    }

    /// Parse from lowercase or uppercase hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        hex::decode(s)
            .map(Self)
            .map_err(|e| Error::InvalidHashPrefixes(format!("bad hex {:?}: {}", s, e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this is a complete 32-byte hash.
    pub fn is_full(&self) -> bool {
        self.0.len() == MAX_HASH_PREFIX_LENGTH
    }

    /// Whether the length is within the range the server uses.
    pub fn is_valid(&self) -> bool {
        (MIN_HASH_PREFIX_LENGTH..=MAX_HASH_PREFIX_LENGTH).contains(&self.0.len())
    }

    /// The first `n` bytes, or the whole prefix if shorter.
    pub fn truncate(&self, n: usize) -> HashPrefix {
        Self(self.0[..n.min(self.0.len())].to_vec())
    }

    /// Whether `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &HashPrefix) -> bool {
        other.0.starts_with(&self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl AsRef<[u8]> for HashPrefix {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HashPrefix {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for HashPrefix {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl fmt::Debug for HashPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashPrefix({})", self.to_hex())
    }
}

impl fmt::Display for HashPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for HashPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Full hash of a URL pattern.
pub fn hash_from_pattern(pattern: &str) -> HashPrefix {
    HashPrefix::from_pattern(pattern)
}

/// A list of hash prefixes, normally kept sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashPrefixes(Vec<HashPrefix>);

impl HashPrefixes {
    pub fn new(hashes: Vec<HashPrefix>) -> Self {
        Self(hashes)
    }

    /// Sort by byte value.
    pub fn sort(&mut self) {
        self.0.sort_unstable();
    }

    /// Check every prefix is 4..=32 bytes and the list is strictly ascending.
    ///
    /// Prefixes of different lengths may overlap; only exact duplicates and
    /// ordering violations are rejected.
    pub fn validate(&self) -> Result<()> {
        for (i, h) in self.0.iter().enumerate() {
            if !h.is_valid() {
                return Err(Error::InvalidHashPrefixes(format!(
                    "prefix {} has length {}",
                    h,
                    h.len()
                )));
            }
            if i > 0 && self.0[i - 1] >= *h {
                return Err(Error::InvalidHashPrefixes(format!(
                    "prefix {} is out of order or duplicated",
                    h
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 over the concatenation of all prefixes, in list order.
    pub fn sha256(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for h in &self.0 {
            hasher.update(h.as_bytes());
        }
        hasher.finalize().to_vec()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HashPrefix> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[HashPrefix] {
        &self.0
    }

    pub fn push(&mut self, h: HashPrefix) {
        self.0.push(h);
    }

    pub fn extend(&mut self, hashes: impl IntoIterator<Item = HashPrefix>) {
        self.0.extend(hashes);
    }

    /// Drop the entries at the given indices. Every index must be in range.
    pub fn remove_indices(&mut self, indices: &[usize]) -> Result<()> {
        let len = self.0.len();
        let mut keep = vec![true; len];
        for &index in indices {
            if index >= len {
                return Err(Error::InvalidRemovalIndex { index, len });
            }
            keep[index] = false;
        }
        let mut i = 0;
        self.0.retain(|_| {
            i += 1;
            keep[i - 1]
        });
        Ok(())
    }

    pub fn into_inner(self) -> Vec<HashPrefix> {
        self.0
    }
}

impl From<Vec<HashPrefix>> for HashPrefixes {
    fn from(v: Vec<HashPrefix>) -> Self {
        Self(v)
    }
}

impl FromIterator<HashPrefix> for HashPrefixes {
    fn from_iter<I: IntoIterator<Item = HashPrefix>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a HashPrefixes {
    type Item = &'a HashPrefix;
    type IntoIter = std::slice::Iter<'a, HashPrefix>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
pub(crate) fn prefixes(items: &[&str]) -> HashPrefixes {
    items.iter().map(|s| HashPrefix::new(s.as_bytes())).collect()
}
