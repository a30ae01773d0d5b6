//! Longest-prefix lookup over a sorted prefix list.

use std::cmp::Ordering;

use super::{HashPrefix, HashPrefixes};

/// Prefixes of one length, stored back to back in sorted order.
#[derive(Debug, Clone)]
struct Bucket {
    len: usize,
    data: Vec<u8>,
}

impl Bucket {
    fn count(&self) -> usize {
        self.data.len() / self.len
    }

    fn entry(&self, i: usize) -> &[u8] {
        &self.data[i * self.len..(i + 1) * self.len]
    }

    fn contains(&self, key: &[u8]) -> bool {
        let (mut lo, mut hi) = (0, self.count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.entry(mid).cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return true,
            }
        }
        false
    }
}

/// Immutable set of hash prefixes, bucketed by length.
///
/// # Example
///
/// ```ignore
/// let set = PrefixSet::import(&hashes);
/// let matched = set.lookup(&full_hash); // 0 when nothing matches
/// ```
#[derive(Debug, Clone, Default)]
pub struct PrefixSet {
    /// Sorted by prefix length, longest first.
    buckets: Vec<Bucket>,
    count: usize,
}

impl PrefixSet {
    /// Build a set from a sorted, duplicate-free prefix list.
    ///
    /// # Panics
    ///
    /// Panics if `hashes` fails [`HashPrefixes::validate`]. Callers validate
    /// untrusted input before importing.
    pub fn import(hashes: &HashPrefixes) -> Self {
        if let Err(e) = hashes.validate() {
            panic!("PrefixSet::import given invalid input: {}", e);
        }

        let mut buckets: Vec<Bucket> = Vec::new();
        for h in hashes {
            match buckets.iter_mut().find(|b| b.len == h.len()) {
                Some(bucket) => bucket.data.extend_from_slice(h.as_bytes()),
                None => buckets.push(Bucket {
                    len: h.len(),
                    data: h.as_bytes().to_vec(),
                }),
            }
        }
        buckets.sort_by(|a, b| b.len.cmp(&a.len));
        for bucket in &mut buckets {
            bucket.data.shrink_to_fit();
        }

        Self {
            buckets,
            count: hashes.len(),
        }
    }

    /// Length of the longest prefix in the set that `hash` starts with, or 0.
    pub fn lookup(&self, hash: &[u8]) -> usize {
        self.buckets
            .iter()
            .filter(|b| b.len <= hash.len())
            .find(|b| b.contains(&hash[..b.len]))
            .map_or(0, |b| b.len)
    }

    /// All prefixes in sorted order.
    pub fn export(&self) -> HashPrefixes {
        let mut hashes: HashPrefixes = self
            .buckets
            .iter()
            .flat_map(|b| (0..b.count()).map(move |i| HashPrefix::from(b.entry(i))))
            .collect();
        hashes.sort();
        hashes
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::prefixes;

    #[test]
    fn test_lookup_vectors() {
        let vectors: Vec<(Vec<&str>, Vec<(&str, usize)>)> = vec![
            (
                vec!["aaaa", "bbbbb", "bbbbc"],
                vec![("aaaa", 4), ("bbbb", 0), ("bbbbbbbbb", 5), ("bbbbcbbbb", 5)],
            ),
            (
                vec!["aaaa", "bbbb"],
                vec![("aaaa", 4), ("aaaaaaa", 4), ("bbbb", 4), ("cccc", 0)],
            ),
            (
                vec!["abcdefgh", "abcdefgi", "abcdefgj"],
                vec![
                    ("abcd", 0),
                    ("abcde", 0),
                    ("abcdef", 0),
                    ("abcdefg", 0),
                    ("abcdefgh", 8),
                    ("abcdefgz", 0),
                ],
            ),
        ];

        for (i, (hashes, queries)) in vectors.into_iter().enumerate() {
            let input = prefixes(&hashes);
            let set = PrefixSet::import(&input);
            for (query, want) in queries {
                assert_eq!(set.lookup(query.as_bytes()), want, "vector {} query {}", i, query);
            }
            assert_eq!(set.export(), input);
            assert_eq!(set.len(), hashes.len());
        }
    }

    #[test]
    fn test_longest_match_wins() {
        let set = PrefixSet::import(&prefixes(&["abcd", "abcdefgh", "zzzz"]));
        assert_eq!(set.lookup(b"abcdefghijkl"), 8);
        assert_eq!(set.lookup(b"abcdxxxxxxxx"), 4);
        assert_eq!(set.lookup(b"zzzzzzzz"), 4);
    }

    #[test]
    fn test_empty_set() {
        let set = PrefixSet::import(&HashPrefixes::default());
        assert!(set.is_empty());
        assert_eq!(set.lookup(b"anything-at-all"), 0);
        assert!(set.export().is_empty());
    }

    #[test]
    #[should_panic]
    fn test_import_unsorted_panics() {
        PrefixSet::import(&prefixes(&["bbbb", "aaaa"]));
    }

    #[test]
    #[should_panic]
    fn test_import_duplicate_panics() {
        PrefixSet::import(&prefixes(&["aaaa", "aaaa"]));
    }

    #[test]
    fn test_real_hashes() {
        let mut hashes: HashPrefixes = (0..500)
            .map(|i| crate::hash::hash_from_pattern(&format!("host{}.example/", i)).truncate(4 + i % 5))
            .collect();
        hashes.sort();
        let set = PrefixSet::import(&hashes);
        for h in &hashes {
            let mut query = h.as_bytes().to_vec();
            query.extend_from_slice(b"footer");
            assert_eq!(set.lookup(&query), h.len());
        }
    }
}
