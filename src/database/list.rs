//! Update-side representation of one threat list.

use serde::{Deserialize, Serialize};

use crate::api::{ComputeDiffResponse, ResponseType};
use crate::diff::{decode_hashes, decode_indices};
use crate::hash::HashPrefixes;
use crate::{Error, Result};

/// A threat list in the form the server diffs against and the snapshot stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialHashes {
    /// Sorted, duplicate-free prefixes.
    pub hashes: HashPrefixes,
    /// SHA-256 over `hashes`.
    #[serde(with = "hex_bytes")]
    pub sha256: Vec<u8>,
    /// Server token naming the version of `hashes`.
    #[serde(with = "hex_bytes")]
    pub version_token: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

impl PartialHashes {
    /// Check ordering and that `sha256` matches the contents.
    pub fn verify(&self) -> Result<()> {
        self.hashes.validate()?;
        if self.sha256 != self.hashes.sha256() {
            return Err(Error::ChecksumMismatch);
        }
        Ok(())
    }

    /// Apply one diff response to `base` and return the resulting list.
    ///
    /// `base` is `None` when the list has no local state. The result has been
    /// verified; any failure leaves `base` untouched.
    pub fn apply(base: Option<&PartialHashes>, resp: &ComputeDiffResponse) -> Result<PartialHashes> {
        let mut next = match resp.response_type {
            ResponseType::Reset => PartialHashes::default(),
            ResponseType::Diff => base.cloned().ok_or_else(|| {
                Error::MalformedResponse("partial update received for non-existent list".into())
            })?,
            ResponseType::Unspecified => {
                return Err(Error::MalformedResponse("unknown response type".into()))
            }
        };

        if let Some(removals) = &resp.removals {
            let indices = decode_indices(removals)?;
            if !indices.is_empty() {
                if resp.response_type == ResponseType::Reset {
                    return Err(Error::MalformedResponse(
                        "indices to be removed included in a full update".into(),
                    ));
                }
                // Indices refer to the sorted list.
                next.hashes.sort();
                next.hashes.remove_indices(&indices)?;
            }
        }

        if let Some(additions) = &resp.additions {
            next.hashes.extend(decode_hashes(additions)?);
        }

        next.hashes.sort();
        next.hashes.validate()?;

        if let Some(checksum) = &resp.checksum {
            next.sha256 = checksum.clone();
        }
        if next.sha256 != next.hashes.sha256() {
            return Err(Error::ChecksumMismatch);
        }

        if !resp.new_version_token.is_empty() {
            next.version_token = resp.new_version_token.clone();
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RawHashes, ThreatEntryAdditions, ThreatEntryRemovals};
    use crate::diff::encode_rice_integers;
    use crate::hash::prefixes;

    fn raw_additions(size: u32, data: &[u8]) -> Option<ThreatEntryAdditions> {
        Some(ThreatEntryAdditions {
            raw_hashes: vec![RawHashes {
                prefix_size: size,
                raw_hashes: data.to_vec(),
            }],
            rice_hashes: None,
        })
    }

    fn raw_removals(indices: &[u32]) -> Option<ThreatEntryRemovals> {
        Some(ThreatEntryRemovals {
            raw_indices: Some(indices.to_vec()),
            rice_indices: None,
        })
    }

    fn list(items: &[&str], token: &[u8]) -> PartialHashes {
        let hashes = prefixes(items);
        PartialHashes {
            sha256: hashes.sha256(),
            hashes,
            version_token: token.to_vec(),
        }
    }

    #[test]
    fn test_reset() {
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Reset,
            additions: raw_additions(4, b"bbbbaaaa"),
            new_version_token: b"v1".to_vec(),
            checksum: Some(prefixes(&["aaaa", "bbbb"]).sha256()),
            ..Default::default()
        };
        let old = list(&["zzzz"], b"v0");
        let got = PartialHashes::apply(Some(&old), &resp).unwrap();
        assert_eq!(got, list(&["aaaa", "bbbb"], b"v1"));
        assert_eq!(
            hex::encode(&got.sha256),
            "e5c1edb50ff8b4fcc3ead3a845ffbe1ad51c9dae5d44335a5c333b57ac8df062"
        );
    }

    #[test]
    fn test_reset_with_removals_rejected() {
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Reset,
            removals: raw_removals(&[0]),
            additions: raw_additions(4, b"aaaa"),
            checksum: Some(prefixes(&["aaaa"]).sha256()),
            ..Default::default()
        };
        assert!(PartialHashes::apply(None, &resp).is_err());
    }

    #[test]
    fn test_diff() {
        let old = list(&["aaaa", "bbbb", "cccc"], b"v1");
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            removals: raw_removals(&[0]),
            additions: raw_additions(4, b"dddd"),
            new_version_token: b"v2".to_vec(),
            checksum: Some(prefixes(&["bbbb", "cccc", "dddd"]).sha256()),
            ..Default::default()
        };
        let got = PartialHashes::apply(Some(&old), &resp).unwrap();
        assert_eq!(got, list(&["bbbb", "cccc", "dddd"], b"v2"));
    }

    #[test]
    fn test_diff_with_rice_removals() {
        let old = list(&["aaaa", "bbbb", "cccc", "dddd"], b"v1");
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            removals: Some(ThreatEntryRemovals {
                raw_indices: None,
                rice_indices: Some(encode_rice_integers(&[1, 3], 2)),
            }),
            new_version_token: b"v2".to_vec(),
            checksum: Some(prefixes(&["aaaa", "cccc"]).sha256()),
            ..Default::default()
        };
        let got = PartialHashes::apply(Some(&old), &resp).unwrap();
        assert_eq!(got.hashes, prefixes(&["aaaa", "cccc"]));
    }

    #[test]
    fn test_diff_requires_existing_list() {
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            checksum: Some(HashPrefixes::default().sha256()),
            ..Default::default()
        };
        assert!(PartialHashes::apply(None, &resp).is_err());
    }

    #[test]
    fn test_unknown_response_type() {
        let old = list(&["aaaa"], b"v1");
        let resp = ComputeDiffResponse::default();
        assert!(PartialHashes::apply(Some(&old), &resp).is_err());
    }

    #[test]
    fn test_empty_diff_is_idempotent() {
        let old = list(&["aaaa", "bbbb"], b"v1");
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            ..Default::default()
        };
        assert_eq!(PartialHashes::apply(Some(&old), &resp).unwrap(), old);
    }

    #[test]
    fn test_removal_index_off_by_one() {
        let old = list(&["aaaa", "bbbb", "cccc"], b"v1");
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            removals: raw_removals(&[3]),
            checksum: Some(old.sha256.clone()),
            ..Default::default()
        };
        let err = PartialHashes::apply(Some(&old), &resp).unwrap_err();
        assert!(matches!(err, Error::InvalidRemovalIndex { index: 3, len: 3 }));
    }

    #[test]
    fn test_checksum_mismatch() {
        let old = list(&["aaaa", "bbbb"], b"v1");
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            additions: raw_additions(4, b"cccc"),
            checksum: Some(vec![0; 32]),
            ..Default::default()
        };
        assert!(matches!(
            PartialHashes::apply(Some(&old), &resp),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_duplicate_addition_rejected() {
        let old = list(&["aaaa", "bbbb"], b"v1");
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Diff,
            additions: raw_additions(4, b"aaaa"),
            ..Default::default()
        };
        assert!(matches!(
            PartialHashes::apply(Some(&old), &resp),
            Err(Error::InvalidHashPrefixes(_))
        ));
    }

    #[test]
    fn test_reset_mixed_lengths() {
        let resp = ComputeDiffResponse {
            response_type: ResponseType::Reset,
            additions: Some(ThreatEntryAdditions {
                raw_hashes: vec![
                    RawHashes {
                        prefix_size: 4,
                        raw_hashes: b"aaaa".to_vec(),
                    },
                    RawHashes {
                        prefix_size: 5,
                        raw_hashes: b"0421e".to_vec(),
                    },
                    RawHashes {
                        prefix_size: 6,
                        raw_hashes: b"666666".to_vec(),
                    },
                    RawHashes {
                        prefix_size: 7,
                        raw_hashes: b"7777777".to_vec(),
                    },
                    RawHashes {
                        prefix_size: 8,
                        raw_hashes: b"88888888".to_vec(),
                    },
                ],
                rice_hashes: None,
            }),
            checksum: Some(
                hex::decode("a3b93fac424834c2447e2dbe5db3ec8553519777523907ea310e207f556a7637")
                    .unwrap(),
            ),
            new_version_token: b"reset".to_vec(),
            ..Default::default()
        };
        let got = PartialHashes::apply(None, &resp).unwrap();
        assert_eq!(
            got.hashes,
            prefixes(&["0421e", "666666", "7777777", "88888888", "aaaa"])
        );
    }

    #[test]
    fn test_verify() {
        let good = list(&["aaaa", "bbbb"], b"v1");
        assert!(good.verify().is_ok());
        let mut bad = good.clone();
        bad.sha256[0] ^= 1;
        assert!(matches!(bad.verify(), Err(Error::ChecksumMismatch)));
    }
}
