// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::fmt;

/// A rational number, used both for time bases (seconds per tick) and
/// frame rates (frames per second).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

/// Time base of the component's timestamps.
pub const MICROSECONDS: Rational = Rational::new(1, 1_000_000);

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    /// The value in Q16 fixed point, saturating at `u32::MAX`.
    pub fn to_q16(self) -> u32 {
        if !self.is_valid() {
            return 0;
        }
        let q16 = ((self.num as i128) << 16) / self.den as i128;
        q16.clamp(0, u32::MAX as i128) as u32
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Rescales `value` from time base `from` to time base `to`, rounding to
/// the nearest tick with halves away from zero. Saturates when the result
/// does not fit and yields zero for a degenerate time base.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if from.den == 0 || to.num == 0 {
        return 0;
    }
    checked_rescale(value, from, to).unwrap_or_else(|| {
        let negative = (value < 0) ^ (from.num < 0) ^ (from.den < 0) ^ (to.num < 0) ^ (to.den < 0);
        if negative {
            i64::MIN
        } else {
            i64::MAX
        }
    })
}

/// Like [`rescale`] but returns `None` instead of saturating, and for a
/// degenerate time base.
pub fn checked_rescale(value: i64, from: Rational, to: Rational) -> Option<i64> {
    let num = (value as i128)
        .checked_mul(from.num as i128)?
        .checked_mul(to.den as i128)?;
    let den = (from.den as i128).checked_mul(to.num as i128)?;
    if den == 0 {
        return None;
    }
    let (num, den) = if den < 0 {
        (num.checked_neg()?, den.checked_neg()?)
    } else {
        (num, den)
    };
    let half = den / 2;
    let out = if num >= 0 {
        num.checked_add(half)? / den
    } else {
        num.checked_sub(half)? / den
    };
    i64::try_from(out).ok()
}
