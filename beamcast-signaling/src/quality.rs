//! Quality tier negotiation
//!
//! Rooms advertise an ordered set of named tiers; viewers ask for one (or for
//! `auto`) and get the effective tier back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Preference value that lets the server pick a tier
pub const AUTO: &str = "auto";

/// Tier picked for `auto` when the room allows it
pub const AUTO_TARGET: Quality = Quality::P720;

/// Named quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
}

impl Quality {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::P1080 => "1080p",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::P360 => "360p",
            Self::P240 => "240p",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1080p" => Ok(Self::P1080),
            "720p" => Ok(Self::P720),
            "480p" => Ok(Self::P480),
            "360p" => Ok(Self::P360),
            "240p" => Ok(Self::P240),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// Select the effective tier for `preferred` from the room's `allowed` list.
///
/// Returns `None` only when `allowed` is empty.
#[must_use]
pub fn select(preferred: &str, allowed: &[Quality]) -> Option<Quality> {
    let first = allowed.first().copied()?;

    if preferred.trim().eq_ignore_ascii_case(AUTO) {
        return Some(if allowed.contains(&AUTO_TARGET) {
            AUTO_TARGET
        } else {
            first
        });
    }

    match preferred.parse::<Quality>() {
        Ok(quality) if allowed.contains(&quality) => Some(quality),
        _ => Some(first),
    }
}

/// Validate a `change-quality` request. `None` means the request is ignored
/// and the current tier is kept.
#[must_use]
pub fn validate_change(requested: &str, allowed: &[Quality]) -> Option<Quality> {
    requested
        .parse::<Quality>()
        .ok()
        .filter(|quality| allowed.contains(quality))
}
