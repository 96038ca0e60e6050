//! 18-decimal fixed-point arithmetic
//!
//! Values are stored as a `U256` scaled by 10^18, the same representation the
//! contracts use, so every value can be handed to an ABI encoder untouched.
//! Multiplication and division truncate toward zero exactly like the contracts'
//! integer math; [`Decimal::pow`] reproduces the contracts' rounded `decPow`.

use alloy_primitives::U256;
use core::{fmt, ops, str::FromStr};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of fractional digits
pub const DECIMALS: u8 = 18;

const ONE_RAW: u64 = 1_000_000_000_000_000_000;
const HALF_RAW: u64 = 500_000_000_000_000_000;

/// Largest exponent accepted by [`Decimal::pow`] (1000 years of minutes).
pub const MAX_POW_EXPONENT: u64 = 525_600_000;

/// Errors produced when constructing or converting a [`Decimal`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecimalError {
    #[error("invalid decimal string {0:?}")]
    Parse(String),

    #[error("negative value {0:?} is not representable")]
    Negative(String),

    #[error("{digits} fractional digits exceed the 18-digit precision")]
    TooPrecise { digits: usize },

    #[error("{value} cannot be expressed with {decimals} token decimals without losing precision")]
    LossyConversion { value: Decimal, decimals: u8 },

    #[error("value overflows 256 bits")]
    Overflow,

    #[error("infinite value cannot be converted to token units")]
    Infinite,
}

/// Unsigned 18-decimal fixed-point number
///
/// `Decimal::INFINITY` is a distinguished sentinel (all bits set) used for
/// ratios whose denominator is zero.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Decimal(U256);

impl Decimal {
    pub const ZERO: Decimal = Decimal(U256::ZERO);
    pub const ONE: Decimal = Decimal(U256::from_limbs([ONE_RAW, 0, 0, 0]));
    pub const INFINITY: Decimal = Decimal(U256::MAX);

    const SCALE: U256 = U256::from_limbs([ONE_RAW, 0, 0, 0]);
    const HALF: U256 = U256::from_limbs([HALF_RAW, 0, 0, 0]);

    /// Wrap a raw 18-decimal integer, as returned by the contracts
    #[inline]
    pub const fn from_raw(raw: U256) -> Self {
        Decimal(raw)
    }

    /// Const constructor for raw values that fit in a `u128`
    #[inline]
    pub const fn from_raw_u128(raw: u128) -> Self {
        Decimal(U256::from_limbs([raw as u64, (raw >> 64) as u64, 0, 0]))
    }

    #[inline]
    pub const fn raw(self) -> U256 {
        self.0
    }

    /// Whole number `x`
    pub fn from_int(x: u64) -> Self {
        Decimal(U256::from(x) * Self::SCALE)
    }

    /// Interpret `amount` as a token amount with `decimals` fractional digits
    pub fn from_units(amount: U256, decimals: u8) -> Result<Self, DecimalError> {
        if decimals <= DECIMALS {
            amount
                .checked_mul(pow10(DECIMALS - decimals))
                .map(Decimal)
                .ok_or(DecimalError::Overflow)
        } else {
            let divisor = pow10(decimals - DECIMALS);
            if !(amount % divisor).is_zero() {
                return Err(DecimalError::TooPrecise {
                    digits: decimals as usize,
                });
            }
            Ok(Decimal(amount / divisor))
        }
    }

    /// Express the value as an integer amount of a token with `decimals` digits
    pub fn to_units(self, decimals: u8) -> Result<U256, DecimalError> {
        if self.is_infinite() {
            return Err(DecimalError::Infinite);
        }
        if decimals <= DECIMALS {
            let divisor = pow10(DECIMALS - decimals);
            if !(self.0 % divisor).is_zero() {
                return Err(DecimalError::LossyConversion {
                    value: self,
                    decimals,
                });
            }
            Ok(self.0 / divisor)
        } else {
            self.0
                .checked_mul(pow10(decimals - DECIMALS))
                .ok_or(DecimalError::Overflow)
        }
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_infinite(self) -> bool {
        self == Self::INFINITY
    }

    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        if self.is_infinite() || rhs.is_infinite() {
            return Some(Self::INFINITY);
        }
        self.0
            .checked_add(rhs.0)
            .filter(|sum| *sum != U256::MAX)
            .map(Decimal)
    }

    /// `None` when `rhs > self`
    pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
        if self.is_infinite() && !rhs.is_infinite() {
            return Some(Self::INFINITY);
        }
        self.0.checked_sub(rhs.0).map(Decimal)
    }

    pub fn saturating_sub(self, rhs: Decimal) -> Decimal {
        self.checked_sub(rhs).unwrap_or(Self::ZERO)
    }

    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        if self.is_zero() || rhs.is_zero() {
            return Some(Self::ZERO);
        }
        if self.is_infinite() || rhs.is_infinite() {
            return Some(Self::INFINITY);
        }
        self.0
            .checked_mul(rhs.0)
            .map(|prod| Decimal(prod / Self::SCALE))
    }

    /// Division; dividing a non-zero value by zero yields `INFINITY`
    pub fn checked_div(self, rhs: Decimal) -> Option<Decimal> {
        if rhs.is_zero() {
            return Some(if self.is_zero() {
                Self::ZERO
            } else {
                Self::INFINITY
            });
        }
        if self.is_infinite() {
            return Some(Self::INFINITY);
        }
        if rhs.is_infinite() {
            return Some(Self::ZERO);
        }
        self.0
            .checked_mul(Self::SCALE)
            .map(|scaled| Decimal(scaled / rhs.0))
    }

    /// `self * multiplier / divider` with a single truncation at the end
    pub fn mul_div(self, multiplier: Decimal, divider: Decimal) -> Decimal {
        if divider.is_zero() {
            return if self.is_zero() || multiplier.is_zero() {
                Self::ZERO
            } else {
                Self::INFINITY
            };
        }
        match self.0.checked_mul(multiplier.0) {
            Some(prod) => Decimal(prod / divider.0),
            None => Self::INFINITY,
        }
    }

    /// `self ^ exponent`, computed by squaring with the contracts' rounded
    /// multiplication. Exponents above [`MAX_POW_EXPONENT`] are capped.
    pub fn pow(self, exponent: u64) -> Decimal {
        let mut n = exponent.min(MAX_POW_EXPONENT);
        if n == 0 {
            return Self::ONE;
        }

        let mut y = Self::SCALE;
        let mut x = self.0;
        while n > 1 {
            if n % 2 == 0 {
                x = dec_mul(x, x);
                n /= 2;
            } else {
                y = dec_mul(x, y);
                x = dec_mul(x, x);
                n = (n - 1) / 2;
            }
        }
        Decimal(dec_mul(x, y))
    }

    /// `|self - other|`
    pub fn abs_diff(self, other: Decimal) -> Decimal {
        if self >= other {
            Decimal(self.0 - other.0)
        } else {
            Decimal(other.0 - self.0)
        }
    }
}

/// Rounded fixed-point product, `(x * y + 0.5) / 1`, saturating on overflow
fn dec_mul(x: U256, y: U256) -> U256 {
    x.checked_mul(y)
        .and_then(|prod| prod.checked_add(Decimal::HALF))
        .map(|prod| prod / Decimal::SCALE)
        .unwrap_or(U256::MAX)
}

fn pow10(exp: u8) -> U256 {
    let ten = U256::from(10u64);
    (0..exp).fold(U256::from(1u64), |acc, _| acc * ten)
}

impl From<u64> for Decimal {
    fn from(x: u64) -> Self {
        Decimal::from_int(x)
    }
}

// Operators follow integer semantics: overflow and underflow panic.

impl ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        match self.checked_add(rhs) {
            Some(sum) => sum,
            None => panic!("decimal addition overflow: {self} + {rhs}"),
        }
    }
}

impl ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        match self.checked_sub(rhs) {
            Some(diff) => diff,
            None => panic!("decimal subtraction underflow: {self} - {rhs}"),
        }
    }
}

impl ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        match self.checked_mul(rhs) {
            Some(prod) => prod,
            None => panic!("decimal multiplication overflow: {self} * {rhs}"),
        }
    }
}

impl ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        match self.checked_div(rhs) {
            Some(quot) => quot,
            None => panic!("decimal division overflow: {self} / {rhs}"),
        }
    }
}

impl ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        *self = *self + rhs;
    }
}

impl ops::SubAssign for Decimal {
    fn sub_assign(&mut self, rhs: Decimal) {
        *self = *self - rhs;
    }
}

impl core::iter::Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Decimal {
        iter.fold(Decimal::ZERO, |acc, x| acc + x)
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "∞" || s.eq_ignore_ascii_case("infinity") {
            return Ok(Decimal::INFINITY);
        }
        if s.starts_with('-') {
            return Err(DecimalError::Negative(s.to_string()));
        }

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DecimalError::Parse(s.to_string()));
        }
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(DecimalError::Parse(s.to_string()));
        }
        if frac_part.len() > DECIMALS as usize {
            return Err(DecimalError::TooPrecise {
                digits: frac_part.len(),
            });
        }

        let int = if int_part.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(int_part, 10).map_err(|_| DecimalError::Overflow)?
        };
        let frac = if frac_part.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(frac_part, 10).map_err(|_| DecimalError::Overflow)?
                * pow10(DECIMALS - frac_part.len() as u8)
        };

        int.checked_mul(Decimal::SCALE)
            .and_then(|scaled| scaled.checked_add(frac))
            .map(Decimal)
            .ok_or(DecimalError::Overflow)
    }
}

impl fmt::Display for Decimal {
    /// Trailing fractional zeros are dropped; `{:.N}` truncates to N digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return f.write_str("∞");
        }

        let int = self.0 / Decimal::SCALE;
        let frac = self.0 % Decimal::SCALE;
        let mut digits = format!("{:0>18}", frac.to_string());
        match f.precision() {
            Some(p) => digits.truncate(p.min(DECIMALS as usize)),
            None => {
                let trimmed = digits.trim_end_matches('0').len();
                digits.truncate(trimmed);
            }
        }

        if digits.is_empty() {
            write!(f, "{int}")
        } else {
            write!(f, "{int}.{digits}")
        }
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
