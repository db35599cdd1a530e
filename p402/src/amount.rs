//! Prices and token amounts.
//!
//! A requirement states its price either as an atomic-unit integer string
//! (`"10000"`) or as a human decimal price (`"$0.01"`). [`TokenAmount`] is the
//! former, [`MoneyAmount`] parses the latter and scales it into atomic units.
//! [`format_atomic`] goes the other way for display.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Decimals of USDC on every supported network.
pub const USDC_DECIMALS: u8 = 6;

static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s$_]+").expect("valid noise pattern"));
static DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,3}(,\d{3})+|\d+)(\.\d+)?$").expect("valid decimal pattern")
});

/// Errors produced while turning a price into atomic units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The input is not a plain decimal number.
    #[error("invalid number format: {0:?}")]
    InvalidFormat(String),
    /// Negative values are not allowed.
    #[error("negative amounts are not allowed")]
    Negative,
    /// Zero is not a payable amount.
    #[error("amount must be greater than zero")]
    Zero,
    /// The input has more decimal places than the token supports.
    #[error("too much precision: {money} decimal places vs {token} on token")]
    WrongPrecision {
        /// Decimal places in the input.
        money: u32,
        /// Decimal places supported by the token.
        token: u32,
    },
    /// The scaled amount does not fit.
    #[error("amount out of range")]
    OutOfRange,
}

/// A human decimal price such as `"$0.01"` or `"1,250.5"`.
///
/// Currency symbols and whitespace are tolerated, and commas only between
/// groups of three integer digits. Anything else that is not a non-negative
/// decimal is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoneyAmount(Decimal);

impl MoneyAmount {
    /// Parses a human price string.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] for malformed, negative, or zero inputs.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let cleaned = NOISE.replace_all(input, "");
        if cleaned.starts_with('-') {
            return Err(AmountError::Negative);
        }
        if !DECIMAL.is_match(&cleaned) {
            return Err(AmountError::InvalidFormat(input.to_owned()));
        }
        let parsed = Decimal::from_str(&cleaned.replace(',', ""))
            .map_err(|_| AmountError::InvalidFormat(input.to_owned()))?;
        if parsed.is_zero() {
            return Err(AmountError::Zero);
        }
        Ok(Self(parsed.normalize()))
    }

    /// Number of significant decimal places.
    #[must_use]
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Scales the amount into atomic units of a token with `decimals` places.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::WrongPrecision`] when the price has more decimal
    /// places than the token.
    pub fn to_atomic(&self, decimals: u8) -> Result<U256, AmountError> {
        let token = u32::from(decimals);
        let money = self.scale();
        if money > token {
            return Err(AmountError::WrongPrecision { money, token });
        }
        let mantissa = u128::try_from(self.0.mantissa()).map_err(|_| AmountError::Negative)?;
        let factor = U256::from(10u8).pow(U256::from(token - money));
        U256::from(mantissa)
            .checked_mul(factor)
            .ok_or(AmountError::OutOfRange)
    }
}

impl FromStr for MoneyAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An amount in the token's smallest unit.
///
/// Travels as a decimal string (`"10000"`) so large values survive JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> U256 {
        self.0
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidFormat(s.to_owned()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| AmountError::OutOfRange)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// Renders an atomic amount as a human decimal string.
///
/// Trailing zeros are dropped: `50000` with 6 decimals is `"0.05"`, and
/// `10000000` is `"10"`.
#[must_use]
pub fn format_atomic(raw: U256, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = usize::from(decimals);
    if decimals == 0 {
        return digits;
    }
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_owned()
    } else {
        format!("{whole}.{fraction}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dollar_prices() {
        let amount = MoneyAmount::parse("$0.01").unwrap();
        assert_eq!(amount.to_atomic(USDC_DECIMALS).unwrap(), U256::from(10_000u64));
        let amount = MoneyAmount::parse("1,250.5").unwrap();
        assert_eq!(
            amount.to_atomic(USDC_DECIMALS).unwrap(),
            U256::from(1_250_500_000u64)
        );
    }

    #[test]
    fn commas_only_separate_thousands() {
        let amount = MoneyAmount::parse("$1,234,567.25").unwrap();
        assert_eq!(
            amount.to_atomic(USDC_DECIMALS).unwrap(),
            U256::from(1_234_567_250_000u64)
        );
        for input in ["1,2.5", "12,34", ",100", "1,000,", "0.1,5", "1000,000"] {
            assert!(
                matches!(MoneyAmount::parse(input), Err(AmountError::InvalidFormat(_))),
                "{input:?} accepted"
            );
        }
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        let amount = MoneyAmount::parse("0.0100000000").unwrap();
        assert_eq!(amount.to_atomic(USDC_DECIMALS).unwrap(), U256::from(10_000u64));
    }

    #[test]
    fn rejects_malformed_prices() {
        assert!(matches!(
            MoneyAmount::parse("1.2.3"),
            Err(AmountError::InvalidFormat(_))
        ));
        assert!(matches!(
            MoneyAmount::parse("ten dollars"),
            Err(AmountError::InvalidFormat(_))
        ));
        assert!(matches!(
            MoneyAmount::parse(""),
            Err(AmountError::InvalidFormat(_))
        ));
        assert_eq!(MoneyAmount::parse("-$1"), Err(AmountError::Negative));
        assert_eq!(MoneyAmount::parse("0.00"), Err(AmountError::Zero));
    }

    #[test]
    fn rejects_over_precise_prices() {
        let amount = MoneyAmount::parse("0.0000001").unwrap();
        assert_eq!(
            amount.to_atomic(USDC_DECIMALS),
            Err(AmountError::WrongPrecision { money: 7, token: 6 })
        );
    }

    #[test]
    fn token_amount_is_a_decimal_string() {
        let amount: TokenAmount = serde_json::from_str("\"10000\"").unwrap();
        assert_eq!(amount.value(), U256::from(10_000u64));
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"10000\"");
        assert!(serde_json::from_str::<TokenAmount>("10000").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"0x10\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"-5\"").is_err());
    }

    #[test]
    fn formats_atomic_amounts() {
        assert_eq!(format_atomic(U256::from(50_000u64), 6), "0.05");
        assert_eq!(format_atomic(U256::from(10_000_000u64), 6), "10");
        assert_eq!(format_atomic(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_atomic(U256::ZERO, 6), "0");
        assert_eq!(format_atomic(U256::from(1_234_567u64), 6), "1.234567");
        assert_eq!(format_atomic(U256::from(42u64), 0), "42");
    }
}
