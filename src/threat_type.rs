//! Threat categories served by the threat list API.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Category of a threat list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
#[non_exhaustive]
pub enum ThreatType {
    /// Unknown or unset category
    #[default]
    Unspecified = 0,
    /// Malware
    Malware = 1,
    /// Phishing and other deceptive content
    SocialEngineering = 2,
    /// Unwanted software
    UnwantedSoftware = 3,
    /// Social engineering list with wider coverage
    SocialEngineeringExtendedCoverage = 4,
}

/// Lists subscribed to when the configuration names none.
pub const DEFAULT_THREAT_LISTS: [ThreatType; 3] = [
    ThreatType::Malware,
    ThreatType::SocialEngineering,
    ThreatType::UnwantedSoftware,
];

impl ThreatType {
    /// All known categories, in wire order.
    pub const ALL: [ThreatType; 5] = [
        ThreatType::Unspecified,
        ThreatType::Malware,
        ThreatType::SocialEngineering,
        ThreatType::UnwantedSoftware,
        ThreatType::SocialEngineeringExtendedCoverage,
    ];

    /// Convert from a u8 value.
    ///
    /// Returns `None` for invalid values.
    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Convert to a u8 value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Unspecified => "THREAT_TYPE_UNSPECIFIED",
            ThreatType::Malware => "MALWARE",
            ThreatType::SocialEngineering => "SOCIAL_ENGINEERING",
            ThreatType::UnwantedSoftware => "UNWANTED_SOFTWARE",
            ThreatType::SocialEngineeringExtendedCoverage => {
                "SOCIAL_ENGINEERING_EXTENDED_COVERAGE"
            }
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ThreatType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        Self::ALL
            .iter()
            .find(|t| t.as_str() == upper)
            .copied()
            .ok_or_else(|| crate::Error::Config(format!("unknown threat type: {}", s)))
    }
}

impl Serialize for ThreatType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ThreatType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
