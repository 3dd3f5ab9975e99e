//! Width-bound two-state values.
//!
//! Every signal in a Kestrel design holds an unsigned integer of 1 to 64 bits
//! stored in a `u64`. All operations here take the width explicitly and return
//! values already masked to the result width, so callers never observe bits
//! above the declared width. Signed interpretation is opt-in per call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The widest value a signal may carry.
pub const MAX_WIDTH: u32 = 64;

/// Errors raised when constructing or slicing width-bound values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The width is zero or exceeds [`MAX_WIDTH`].
    #[error("invalid width {0} (must be 1..={MAX_WIDTH})")]
    InvalidWidth(u32),

    /// A slice range falls outside the value or is inverted.
    #[error("slice [{high}:{low}] out of range for width {width}")]
    SliceOutOfRange {
        /// Most significant bit of the slice.
        high: u32,
        /// Least significant bit of the slice.
        low: u32,
        /// Width of the sliced value.
        width: u32,
    },

    /// A value has bits set above its declared width.
    #[error("value {value:#x} does not fit in {width} bits")]
    Overflow {
        /// The offending value.
        value: u64,
        /// The declared width.
        width: u32,
    },
}

/// Checks that `width` is a legal signal width.
pub fn check_width(width: u32) -> Result<(), ValueError> {
    if width == 0 || width > MAX_WIDTH {
        Err(ValueError::InvalidWidth(width))
    } else {
        Ok(())
    }
}

/// Returns the all-ones mask for `width` bits.
#[inline]
pub fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Truncates `value` to `width` bits.
#[inline]
pub fn mask(value: u64, width: u32) -> u64 {
    value & width_mask(width)
}

/// Interprets the low `width` bits of `value` as a two's-complement integer.
#[inline]
pub fn sign_extend(value: u64, width: u32) -> i64 {
    if width >= 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

/// Extracts bits `high..=low` of `value`, shifted down to bit zero.
#[inline]
pub fn slice(value: u64, high: u32, low: u32) -> u64 {
    mask(value >> low, high - low + 1)
}

/// Concatenates `(value, width)` parts, most significant part first.
///
/// The combined width must not exceed [`MAX_WIDTH`]; parts are masked to
/// their own widths before being packed.
pub fn concat(parts: &[(u64, u32)]) -> u64 {
    parts.iter().fold(0u64, |acc, &(value, width)| {
        let shifted = if width >= 64 { 0 } else { acc << width };
        shifted | mask(value, width)
    })
}

/// Changes the width of `value` from `from` to `to` bits.
///
/// Widening sign-extends when `signed` is set and zero-extends otherwise;
/// narrowing truncates.
#[inline]
pub fn resize(value: u64, from: u32, to: u32, signed: bool) -> u64 {
    if to > from && signed {
        mask(sign_extend(value, from) as u64, to)
    } else {
        mask(value, to)
    }
}

/// Left shift; amounts at or beyond `width` produce zero.
#[inline]
pub fn shl(value: u64, amount: u64, width: u32) -> u64 {
    if amount >= u64::from(width) {
        0
    } else {
        mask(value << amount, width)
    }
}

/// Right shift, logical or arithmetic.
///
/// An arithmetic shift fills with bit `width - 1`; amounts at or beyond
/// `width` produce zero or all sign bits respectively.
#[inline]
pub fn shr(value: u64, amount: u64, width: u32, arithmetic: bool) -> u64 {
    if arithmetic {
        let extended = sign_extend(value, width);
        let amount = amount.min(63) as u32;
        mask((extended >> amount) as u64, width)
    } else if amount >= u64::from(width) {
        0
    } else {
        mask(value >> amount, width)
    }
}

/// `a < b` on `width`-bit operands, optionally as two's-complement.
#[inline]
pub fn less_than(a: u64, b: u64, width: u32, signed: bool) -> bool {
    if signed {
        sign_extend(a, width) < sign_extend(b, width)
    } else {
        a < b
    }
}

/// Wrapping division; a zero divisor yields zero.
#[inline]
pub fn div(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        a / b
    }
}

/// Wrapping remainder; a zero divisor yields zero.
#[inline]
pub fn rem(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        a % b
    }
}

/// A value paired with its width, for display and test assertions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bits {
    value: u64,
    width: u32,
}

impl Bits {
    /// Creates a value, masking it to `width` bits.
    pub fn new(value: u64, width: u32) -> Result<Self, ValueError> {
        check_width(width)?;
        Ok(Self {
            value: mask(value, width),
            width,
        })
    }

    /// Creates a value, rejecting bits set above `width`.
    pub fn exact(value: u64, width: u32) -> Result<Self, ValueError> {
        check_width(width)?;
        if mask(value, width) != value {
            return Err(ValueError::Overflow { value, width });
        }
        Ok(Self { value, width })
    }

    /// The unsigned value.
    pub fn value(self) -> u64 {
        self.value
    }

    /// The width in bits.
    pub fn width(self) -> u32 {
        self.width
    }

    /// The value as a two's-complement integer.
    pub fn signed(self) -> i64 {
        sign_extend(self.value, self.width)
    }

    /// Returns bit `index`.
    pub fn bit(self, index: u32) -> bool {
        index < self.width && (self.value >> index) & 1 == 1
    }

    /// Extracts bits `high..=low`.
    pub fn slice(self, high: u32, low: u32) -> Result<Self, ValueError> {
        if low > high || high >= self.width {
            return Err(ValueError::SliceOutOfRange {
                high,
                low,
                width: self.width,
            });
        }
        Ok(Self {
            value: slice(self.value, high, low),
            width: high - low + 1,
        })
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'h{:x}", self.width, self.value)
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bits({self})")
    }
}
