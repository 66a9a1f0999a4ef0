//! Discount tiers and caller-input normalization.
//!
//! A tier is persisted under its canonical key (`"10"`, `"15"`, `"20"`,
//! `"envio_gratis"`). Callers may send loose spellings; [`DiscountTier::from_str`]
//! folds case, whitespace, accents, `%` and `-`/`_` separators before matching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when caller input does not name a known tier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown discount tier: {0:?}")]
pub struct ParseTierError(String);

impl ParseTierError {
    /// The raw input that failed to parse.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.0
    }
}

/// A redeemable benefit class. Each tier has its own point cost and coupon pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiscountTier {
    /// 10% off.
    #[serde(rename = "10")]
    Percent10,
    /// 15% off.
    #[serde(rename = "15")]
    Percent15,
    /// 20% off.
    #[serde(rename = "20")]
    Percent20,
    /// Free shipping on the next order.
    #[serde(rename = "envio_gratis")]
    FreeShipping,
}

impl DiscountTier {
    /// Every tier, in display order.
    pub const ALL: [Self; 4] = [
        Self::Percent10,
        Self::Percent15,
        Self::Percent20,
        Self::FreeShipping,
    ];

    /// Canonical key used in documents and pricing maps.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Percent10 => "10",
            Self::Percent15 => "15",
            Self::Percent20 => "20",
            Self::FreeShipping => "envio_gratis",
        }
    }

    /// Human label used in ledger reasons and notifications.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Percent10 => "10%",
            Self::Percent15 => "15%",
            Self::Percent20 => "20%",
            Self::FreeShipping => "envío gratis",
        }
    }

    /// Percentage off, `None` for free shipping.
    #[must_use]
    pub const fn percent(&self) -> Option<u8> {
        match self {
            Self::Percent10 => Some(10),
            Self::Percent15 => Some(15),
            Self::Percent20 => Some(20),
            Self::FreeShipping => None,
        }
    }
}

impl fmt::Display for DiscountTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = normalize(s)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        match compact.trim_end_matches('%') {
            "10" => Ok(Self::Percent10),
            "15" => Ok(Self::Percent15),
            "20" => Ok(Self::Percent20),
            "enviogratis" | "enviogratuito" | "freeshipping" => Ok(Self::FreeShipping),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

/// Lowercase, strip accents, turn `-`/`_` into spaces and collapse whitespace.
fn normalize(input: &str) -> String {
    let folded: String = input
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            '-' | '_' => ' ',
            other => other,
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
