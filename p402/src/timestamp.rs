//! Unix timestamps for ERC-3009 authorization windows.
//!
//! `validAfter` and `validBefore` travel as stringified integers; this module
//! owns that representation.

use std::fmt;
use std::num::ParseIntError;
use std::ops::{Add, Sub};
use std::str::FromStr;
use std::time::SystemTime;

use serde_with::{DeserializeFromStr, SerializeDisplay};

/// Seconds since the Unix epoch.
///
/// Travels as a decimal string (`"1699999999"`) so 64-bit values survive
/// `JavaScript` number handling.
#[derive(
    Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr,
)]
pub struct UnixTimestamp(u64);

impl FromStr for UnixTimestamp {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub<u64> for UnixTimestamp {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

impl UnixTimestamp {
    /// The Unix epoch, `0`.
    pub const EPOCH: Self = Self(0);

    /// Wraps a count of seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time.
    ///
    /// A clock set before the epoch reads as [`UnixTimestamp::EPOCH`].
    #[must_use]
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(Self::EPOCH, |elapsed| Self(elapsed.as_secs()))
    }

    /// Seconds since the epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Returns `true` once `now` has reached this timestamp.
    #[must_use]
    pub fn has_passed(&self, now: Self) -> bool {
        now >= *self
    }
}
