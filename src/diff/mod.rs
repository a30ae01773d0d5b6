//! Decoding of list additions and removals from diff responses.

mod rice;

pub use rice::{decode_rice_integers, BitReader, RiceDecoder, MAX_RICE_PARAMETER};

#[cfg(test)]
pub(crate) use rice::encode_rice_integers;

use crate::api::{ThreatEntryAdditions, ThreatEntryRemovals};
use crate::hash::{HashPrefix, MAX_HASH_PREFIX_LENGTH, MIN_HASH_PREFIX_LENGTH};
use crate::{Error, Result};

/// Decode every added prefix. Raw groups come first, then Rice-coded 4-byte
/// prefixes (each value is a little-endian `u32`). The output is not sorted.
pub fn decode_hashes(additions: &ThreatEntryAdditions) -> Result<Vec<HashPrefix>> {
    let mut hashes = Vec::new();

    for raw in &additions.raw_hashes {
        let size = raw.prefix_size as usize;
        if !(MIN_HASH_PREFIX_LENGTH..=MAX_HASH_PREFIX_LENGTH).contains(&size) {
            return Err(Error::Decode(format!("invalid hash prefix length: {}", size)));
        }
        if raw.raw_hashes.len() % size != 0 {
            return Err(Error::Decode(format!(
                "raw hashes of {} bytes not divisible by prefix size {}",
                raw.raw_hashes.len(),
                size
            )));
        }
        hashes.extend(raw.raw_hashes.chunks_exact(size).map(HashPrefix::from));
    }

    if let Some(rice) = &additions.rice_hashes {
        for value in decode_rice_integers(rice)? {
            hashes.push(HashPrefix::new(value.to_le_bytes().to_vec()));
        }
    }

    Ok(hashes)
}

/// Decode every removal index, raw indices first.
pub fn decode_indices(removals: &ThreatEntryRemovals) -> Result<Vec<usize>> {
    let mut indices: Vec<usize> = removals
        .raw_indices
        .iter()
        .flatten()
        .map(|&i| i as usize)
        .collect();

    if let Some(rice) = &removals.rice_indices {
        indices.extend(decode_rice_integers(rice)?.into_iter().map(|i| i as usize));
    }

    Ok(indices)
}
