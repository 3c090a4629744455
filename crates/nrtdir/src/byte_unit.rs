use std::{
    fmt::{self, Debug, Display},
    ops::{Add, AddAssign, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};

const UNITS: [(ByteUnit, &str); 4] = [
    (ByteUnit::TB, "TB"),
    (ByteUnit::GB, "GB"),
    (ByteUnit::MB, "MB"),
    (ByteUnit::KB, "KB"),
];

/// A quantity of bytes. Arithmetic saturates rather than wrapping.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteUnit(u64);

impl ByteUnit {
    pub const ZERO: ByteUnit = ByteUnit(0);
    pub const MAX: ByteUnit = ByteUnit(u64::MAX);

    pub const KB: ByteUnit = ByteUnit(1 << 10);
    pub const MB: ByteUnit = ByteUnit(1 << 20);
    pub const GB: ByteUnit = ByteUnit(1 << 30);
    pub const TB: ByteUnit = ByteUnit(1 << 40);

    pub const fn new(bytes: u64) -> ByteUnit {
        ByteUnit(bytes)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn from_mb(mb: u64) -> ByteUnit {
        ByteUnit(mb.saturating_mul(Self::MB.0))
    }

    /// Converts a fractional number of binary megabytes into bytes,
    /// truncating any partial byte. Returns `None` unless `mb` is finite and
    /// strictly positive.
    pub fn from_mb_f64(mb: f64) -> Option<ByteUnit> {
        if mb.is_finite() && mb > 0.0 {
            // float to int casts saturate at u64::MAX
            Some(ByteUnit((mb * Self::MB.0 as f64) as u64))
        } else {
            None
        }
    }

    pub fn as_mb_f64(&self) -> f64 {
        self.0 as f64 / Self::MB.0 as f64
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, suffix) in UNITS {
            if *self >= unit {
                let whole = self.0 / unit.0;
                let frac = (self.0 % unit.0) as f64 / unit.0 as f64;
                return if frac < 0.005 {
                    write!(f, "{whole} {suffix}")
                } else if frac >= 0.995 {
                    write!(f, "{} {suffix}", whole + 1)
                } else {
                    write!(f, "{}.{:02.0} {suffix}", whole, (frac * 100.0).floor())
                };
            }
        }
        write!(f, "{} B", self.0)
    }
}

impl Debug for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Into<ByteUnit>> Add<T> for ByteUnit {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: T) -> Self::Output {
        ByteUnit(self.0.saturating_add(rhs.into().0))
    }
}

impl<T: Into<ByteUnit>> AddAssign<T> for ByteUnit {
    #[inline(always)]
    fn add_assign(&mut self, rhs: T) {
        *self = *self + rhs;
    }
}

impl<T: Into<ByteUnit>> Sub<T> for ByteUnit {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: T) -> Self::Output {
        ByteUnit(self.0.saturating_sub(rhs.into().0))
    }
}

impl<T: Into<ByteUnit>> SubAssign<T> for ByteUnit {
    #[inline(always)]
    fn sub_assign(&mut self, rhs: T) {
        *self = *self - rhs;
    }
}

impl From<ByteUnit> for u64 {
    fn from(value: ByteUnit) -> Self {
        value.0
    }
}

macro_rules! impl_unsigned {
    ($($T:ident),*) => {
        $(
            impl From<$T> for ByteUnit {
                fn from(bytes: $T) -> ByteUnit {
                    ByteUnit(bytes as u64)
                }
            }

            impl PartialEq<$T> for ByteUnit {
                fn eq(&self, other: &$T) -> bool {
                    self.0 == *other as u64
                }
            }
        )*
    };
}

impl_unsigned!(u8, u16, u32, u64, usize);
