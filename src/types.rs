// 1.0: primitives shared by every module. ids, amounts, timestamps, call context.
// ids are string newtypes so a party can never be passed where a market is expected.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Owner used for every system account (insurance, settlement, fees, external...).
pub const SYSTEM_OWNER: &str = "*";
/// Market component of account ids that do not belong to a market.
pub const NO_MARKET: &str = "!";
/// The network party. takes the other side of distressed positions.
pub const NETWORK_PARTY: &str = "network";
/// Deposits made by this party top up the global reward account instead of a general account.
pub const REWARD_PARTY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// A trading party, or one of the reserved owners above.
    PartyId
);
string_id!(MarketId);
string_id!(AssetId);

impl PartyId {
    pub fn network() -> Self {
        Self::new(NETWORK_PARTY)
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_OWNER)
    }

    pub fn is_network(&self) -> bool {
        self.0 == NETWORK_PARTY
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_OWNER
    }

    pub fn is_reward(&self) -> bool {
        self.0 == REWARD_PARTY
    }
}

impl MarketId {
    /// Sentinel used for accounts that live outside any market.
    pub fn none() -> Self {
        Self::new(NO_MARKET)
    }

    pub fn is_none(&self) -> bool {
        self.0 == NO_MARKET
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),

    #[error("amount must be a whole number of units: {0}")]
    Fractional(Decimal),
}

// 1.1: non-negative whole number of asset units. every balance and transfer uses this.
// the inner decimal always has scale 0 so the byte form used for hashing is stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);
    /// Largest representable balance. credits that would pass it are refused.
    pub const MAX: Amount = Amount(Decimal::MAX);

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn new(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value));
        }
        if !value.fract().is_zero() {
            return Err(AmountError::Fractional(value));
        }
        Ok(Self(value.trunc()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `None` when the sum does not fit.
    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Self)
    }

    /// `None` when `other` is larger than `self`.
    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        if other.0 > self.0 {
            None
        } else {
            Some(Self(self.0 - other.0))
        }
    }

    pub fn saturating_sub(&self, other: Amount) -> Amount {
        self.checked_sub(other).unwrap_or(Amount::ZERO)
    }

    /// Even split into `parts` shares: (share, remainder). remainder < parts.
    pub fn split(&self, parts: usize) -> (Amount, Amount) {
        if parts <= 1 {
            return (*self, Amount::ZERO);
        }
        let divisor = Decimal::from(parts as u64);
        let remainder = self.0 % divisor;
        let share = (self.0 - remainder) / divisor;
        (Self(share.trunc()), Self(remainder.trunc()))
    }

    /// floor(self * numerator / denominator), never more than `self` when numerator <= denominator.
    pub fn mul_div_floor(&self, numerator: Amount, denominator: Amount) -> Amount {
        if denominator.is_zero() {
            return Amount::ZERO;
        }
        // self = q * den + r, so self * num / den = q * num + floor(r * num / den)
        let r = self.0 % denominator.0;
        let q = (self.0 - r) / denominator.0;
        let exact = q.checked_mul(numerator.0).and_then(|head| {
            r.checked_mul(numerator.0).map(|tail| {
                let tail_rem = tail % denominator.0;
                head + (tail - tail_rem) / denominator.0
            })
        });
        let scaled = match exact {
            Some(value) => value,
            // only reachable near the top of the 96-bit range
            None => self
                .0
                .checked_mul(numerator.0 / denominator.0)
                .map(|v| v.floor())
                .unwrap_or(Decimal::MAX),
        };
        Self(scaled.trunc())
    }

    /// Fixed-width big-endian form. two amounts are equal iff their bytes are equal.
    pub fn to_be_bytes(&self) -> [u8; 16] {
        let units = self.0.trunc().mantissa().to_u128().unwrap_or_default();
        units.to_be_bytes()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::from_decimal(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Amount::new(units)
    }
}

// `+` saturates at `Amount::MAX`. balances never get there: the store refuses
// overflowing credits and deposits are capped on the asset total.
impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        self.checked_add(rhs).unwrap_or(Amount::MAX)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        *self = *self + rhs;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, |acc, a| acc + *a)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

// 1.3: correlation token handed in by the block pipeline. shows up in spans and events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub trace_id: String,
    pub block_height: u64,
}

impl Context {
    pub fn new(trace_id: impl Into<String>, block_height: u64) -> Self {
        Self {
            trace_id: trace_id.into(),
            block_height,
        }
    }
}
