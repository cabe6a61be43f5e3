//! Era lookback intervals.
//!
//! A lookback is the tolerance added to each interval's end before the
//! interval-union runs, so that intervals separated by less than the
//! tolerance fuse into one era. Accepted syntax is
//! `"<integer> (second|minute|hour|day)s?"`, case-insensitive.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

static LOOKBACK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+)\s*(second|minute|hour|day)s?\s*$").expect("Invalid lookback regex")
});

/// A non-negative duration with one-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Lookback {
    seconds: i64,
}

impl Lookback {
    pub const ZERO: Lookback = Lookback { seconds: 0 };

    pub fn from_seconds(seconds: i64) -> Self {
        Self { seconds }
    }

    pub fn from_days(days: i64) -> Self {
        Self {
            seconds: days * 86_400,
        }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0
    }

    /// Canonical text form stored in the lookup and Stem tables.
    pub fn canonical(&self) -> String {
        format!("{} seconds", self.seconds)
    }

    /// SQL interval literal, e.g. `interval '10800 seconds'`.
    pub fn to_sql(&self) -> String {
        format!("interval '{}'", self.canonical())
    }
}

impl FromStr for Lookback {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EtlError::InvalidEraLookbackInterval(s.to_string());
        let captures = LOOKBACK_REGEX.captures(s).ok_or_else(invalid)?;
        let amount: i64 = captures[1].parse().map_err(|_| invalid())?;
        let unit = match captures[2].to_ascii_lowercase().as_str() {
            "second" => 1,
            "minute" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            _ => return Err(invalid()),
        };
        amount
            .checked_mul(unit)
            .map(Lookback::from_seconds)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
