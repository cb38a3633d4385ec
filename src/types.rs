// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, rounds, prices, sizes, quote amounts, timestamps. each is a newtype so the compiler catches type mixups.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

use crate::math::{divide_decimal, multiply_decimal};

/// Identifies one market in the settings store and in emitted events (e.g. "sETH-PERP").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey(pub String);

impl MarketKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

// 1.1: oracle round. strictly increasing per asset, 0 means "no round yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn previous(&self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }

    /// Rounds elapsed since `earlier`, zero when `earlier` is in the future.
    pub fn rounds_since(&self, earlier: RoundId) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {}", self.0)
    }
}

// 1.2: signed size: positive = long, negative = short. core to all position math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SignedSize(Decimal);

impl SignedSize {
    pub fn new(size: Decimal) -> Self {
        Self(size)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn abs(&self) -> Decimal {
        self.0.abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn add(&self, delta: Decimal) -> Self {
        Self(self.0 + delta)
    }

    /// True when both sizes are non-zero and point the same way.
    pub fn same_side(&self, other: SignedSize) -> bool {
        (self.is_long() && other.is_long()) || (self.is_short() && other.is_short())
    }
}

impl fmt::Display for SignedSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: price in quote currency per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Relative distance to `reference`, e.g. 0.02 for a 2% move.
    pub fn deviation_from(&self, reference: Price) -> Decimal {
        divide_decimal((self.0 - reference.0).abs(), reference.0).unwrap_or(Decimal::ZERO)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.4: quote currency amount. margin, pnl, funding, fees and deposits all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quote(Decimal);

impl Quote {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Quote) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Quote) -> Self {
        Self(self.0 - other.0)
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(multiply_decimal(self.0, factor))
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    pub fn max(self, other: Quote) -> Self {
        if self.0 >= other.0 {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: Quote) -> Self {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }

    /// Floors negative amounts at zero.
    pub fn non_negative(self) -> Self {
        self.max(Self::zero())
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Quote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Quote {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(q))
    }
}

impl<'a> Sum<&'a Quote> for Quote {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(*q))
    }
}

// 1.5: millisecond timestamp. engine time is injected so every run is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const SECONDS_PER_DAY: i64 = 86_400;

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * MILLIS_PER_SECOND)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Saturates at the far end of the clock instead of wrapping.
    pub fn plus_secs(&self, secs: u64) -> Self {
        let millis = i64::try_from(secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(MILLIS_PER_SECOND);
        Self(self.0.saturating_add(millis))
    }

    /// Whole-or-fractional seconds from `earlier` to self, zero if `earlier` is later.
    pub fn seconds_since(&self, earlier: Timestamp) -> Decimal {
        let diff_ms = (self.0 - earlier.0).max(0);
        Decimal::new(diff_ms, 3)
    }

    pub fn days_since(&self, earlier: Timestamp) -> Decimal {
        self.seconds_since(earlier) / Decimal::from(SECONDS_PER_DAY)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
