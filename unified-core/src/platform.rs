//! Venue definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two venues being reconciled
///
/// Kalshi is venue A (signed requests), Polymarket is venue B (public market data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Kalshi - US regulated prediction market
    Kalshi,
    /// Polymarket - Crypto-based prediction market
    Polymarket,
}

impl Platform {
    /// Both venues, in reconciliation order
    pub const ALL: [Platform; 2] = [Platform::Kalshi, Platform::Polymarket];

    /// Lowercase name used in status records and raw-message callbacks
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Kalshi => "kalshi",
            Platform::Polymarket => "polymarket",
        }
    }

    /// Get the full display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Kalshi => "Kalshi",
            Platform::Polymarket => "Polymarket",
        }
    }

    /// Log prefix for the venue's streaming loop
    pub fn ws_tag(&self) -> &'static str {
        match self {
            Platform::Kalshi => "[Kalshi WS]",
            Platform::Polymarket => "[Polymarket WS]",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalshi" | "k" | "venuea" => Ok(Platform::Kalshi),
            "polymarket" | "poly" | "p" | "venueb" => Ok(Platform::Polymarket),
            _ => Err(format!("Unknown platform: {}", s)),
        }
    }
}
