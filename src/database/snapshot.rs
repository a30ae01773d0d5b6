//! On-disk snapshot of the threat lists.
//!
//! Layout:
//! - 64-byte header: magic, version, flags, timestamp, payload size and the
//!   SHA-256 of the payload
//! - payload: gzip-compressed JSON of [`DatabaseFormat`]
//!
//! A snapshot is trusted only if the header checksum and the checksum of
//! every list inside it verify.

use bitflags::bitflags;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::list::PartialHashes;
use crate::threat_type::ThreatType;
use crate::{Error, Result};

/// Magic bytes for identifying snapshot files.
pub const MAGIC: [u8; 8] = *b"WEBRISK\x01";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 64;

bitflags! {
    /// Format flags for snapshot files.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatFlags: u32 {
        /// Payload is gzip compressed.
        const GZIP = 0b00000001;
    }
}

/// Everything persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFormat {
    pub table: BTreeMap<ThreatType, PartialHashes>,
    /// Time of the sync that produced `table`.
    #[serde(with = "system_time_serde")]
    pub time: SystemTime,
}

mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let d = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        (d.as_secs(), d.subsec_nanos()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (secs, nanos): (u64, u32) = Deserialize::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
}

/// Snapshot file header (64 bytes, little endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub flags: u32,
    /// Unix seconds of the sync the snapshot holds.
    pub timestamp: i64,
    pub payload_size: u64,
    /// SHA-256 of the payload bytes as stored.
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.magic);
        out[8..12].copy_from_slice(&self.version.to_le_bytes());
        out[12..16].copy_from_slice(&self.flags.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
        out[24..32].copy_from_slice(&self.payload_size.to_le_bytes());
        out[32..64].copy_from_slice(&self.checksum);
        out
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidHeaderSize {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let mut word = [0u8; 4];
        let mut dword = [0u8; 8];
        word.copy_from_slice(&data[8..12]);
        let version = u32::from_le_bytes(word);
        word.copy_from_slice(&data[12..16]);
        let flags = u32::from_le_bytes(word);
        dword.copy_from_slice(&data[16..24]);
        let timestamp = i64::from_le_bytes(dword);
        dword.copy_from_slice(&data[24..32]);
        let payload_size = u64::from_le_bytes(dword);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&data[32..64]);
        Ok(Self {
            magic,
            version,
            flags,
            timestamp,
            payload_size,
            checksum,
        })
    }

    /// Validate the header magic and version.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::InvalidMagic);
        }
        if self.version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    pub fn format_flags(&self) -> FormatFlags {
        FormatFlags::from_bits_truncate(self.flags)
    }
}

/// Serialize a snapshot to bytes.
pub fn encode(db: &DatabaseFormat) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(db)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let payload = encoder.finish()?;

    let timestamp = db
        .time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();
    let header = SnapshotHeader {
        magic: MAGIC,
        version: FORMAT_VERSION,
        flags: FormatFlags::GZIP.bits(),
        timestamp,
        payload_size: payload.len() as u64,
        checksum: Sha256::digest(&payload).into(),
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse and fully verify a snapshot.
pub fn decode(data: &[u8]) -> Result<DatabaseFormat> {
    let header = SnapshotHeader::from_bytes(data)?;
    header.validate()?;

    let payload = &data[HEADER_SIZE..];
    if payload.len() as u64 != header.payload_size {
        return Err(Error::InvalidHeaderSize {
            expected: HEADER_SIZE + header.payload_size as usize,
            actual: data.len(),
        });
    }
    let checksum: [u8; 32] = Sha256::digest(payload).into();
    if checksum != header.checksum {
        return Err(Error::ChecksumMismatch);
    }

    let db: DatabaseFormat = if header.format_flags().contains(FormatFlags::GZIP) {
        let mut json = Vec::new();
        GzDecoder::new(payload).read_to_end(&mut json)?;
        serde_json::from_slice(&json)?
    } else {
        serde_json::from_slice(payload)?
    };

    for (threat_type, list) in &db.table {
        list.verify().map_err(|e| {
            log::warn!("Snapshot list {} failed verification: {}", threat_type, e);
            e
        })?;
    }
    Ok(db)
}

/// Write a snapshot atomically (temp file then rename).
pub fn save(path: &Path, db: &DatabaseFormat) -> Result<()> {
    let data = encode(db)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut temp_file = fs::File::create(&temp_path)?;
    temp_file.write_all(&data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;
    log::debug!("Saved snapshot: {} bytes to {:?}", data.len(), path);
    Ok(())
}

/// Read and verify a snapshot from disk.
pub fn load(path: &Path) -> Result<DatabaseFormat> {
    let data = fs::read(path)?;
    decode(&data)
}
