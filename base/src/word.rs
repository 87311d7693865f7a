//! Fixed-width unsigned words.
//!
//! The processor is a 36-bit machine but most of its registers and
//! instruction fields are narrower.  Addresses within a segment are
//! 18 bits, absolute memory addresses are 24 bits, the timer
//! register is 27 bits and segment numbers are 15 bits.  Each width
//! has its own type, so a value which has been range-checked once
//! never needs masking again and a 24-bit absolute address cannot be
//! passed where an 18-bit offset is expected.
//!
//! None of these types are signed.  Arithmetic wraps modulo the
//! width of the type, as the hardware adders do.

use std::fmt::{self, Debug, Display, Formatter, Octal};
use std::ops::{BitAnd, BitOr, Not};

use serde::Serialize;

use super::error::ConversionFailed;

macro_rules! unsigned_word {
    ($(#[$attr:meta])* $Name:ident, $Inner:ty, $BITS:expr) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $Name {
            bits: $Inner,
        }

        impl $Name {
            pub const BITS: u32 = $BITS;
            const MASK: $Inner = ((1 as $Inner) << $BITS) - 1;

            pub const ZERO: $Name = $Name { bits: 0 };
            pub const ONE: $Name = $Name { bits: 1 };
            pub const MAX: $Name = $Name { bits: Self::MASK };

            /// Compile-time checked construction, used by the `w36!`
            /// family of macros.  An out-of-range argument fails to
            /// compile.
            pub const fn new<const N: $Inner>() -> $Name {
                struct Helper<const M: $Inner>;
                impl<const M: $Inner> Helper<M> {
                    const W: $Name = {
                        if M > $Name::MASK {
                            panic!("input value is out of range")
                        } else {
                            $Name { bits: M }
                        }
                    };
                }
                Helper::<N>::W
            }

            /// Keep only the low-order bits of `bits` which fit.
            pub const fn truncating(bits: $Inner) -> $Name {
                $Name {
                    bits: bits & Self::MASK,
                }
            }

            pub const fn bits(self) -> $Inner {
                self.bits
            }

            pub const fn is_zero(self) -> bool {
                self.bits == 0
            }

            pub const fn is_odd(self) -> bool {
                self.bits & 1 != 0
            }

            pub const fn and(self, mask: $Inner) -> $Name {
                $Name {
                    bits: self.bits & mask,
                }
            }

            #[must_use]
            pub fn wrapping_add(self, rhs: $Name) -> $Name {
                Self::truncating(self.bits.wrapping_add(rhs.bits))
            }

            #[must_use]
            pub fn wrapping_sub(self, rhs: $Name) -> $Name {
                // The modulus is a power of two, so two's-complement
                // wraparound of the inner type followed by masking
                // gives the right answer.
                Self::truncating(self.bits.wrapping_sub(rhs.bits))
            }

            pub fn checked_add(self, rhs: $Name) -> Option<$Name> {
                match self.bits.checked_add(rhs.bits) {
                    Some(sum) if sum <= Self::MASK => Some($Name { bits: sum }),
                    _ => None,
                }
            }

            pub fn checked_sub(self, rhs: $Name) -> Option<$Name> {
                self.bits.checked_sub(rhs.bits).map(|bits| $Name { bits })
            }
        }

        impl TryFrom<$Inner> for $Name {
            type Error = ConversionFailed;
            fn try_from(bits: $Inner) -> Result<$Name, ConversionFailed> {
                if bits > Self::MASK {
                    Err(ConversionFailed::TooLarge)
                } else {
                    Ok($Name { bits })
                }
            }
        }

        impl From<$Name> for $Inner {
            fn from(w: $Name) -> $Inner {
                w.bits
            }
        }

        impl BitAnd for $Name {
            type Output = $Name;
            fn bitand(self, rhs: $Name) -> $Name {
                $Name {
                    bits: self.bits & rhs.bits,
                }
            }
        }

        impl BitOr for $Name {
            type Output = $Name;
            fn bitor(self, rhs: $Name) -> $Name {
                $Name {
                    bits: self.bits | rhs.bits,
                }
            }
        }

        impl Not for $Name {
            type Output = $Name;
            fn not(self) -> $Name {
                $Name {
                    bits: !self.bits & Self::MASK,
                }
            }
        }

        impl Display for $Name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Octal::fmt(&self.bits, f)
            }
        }

        impl Octal for $Name {
            fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
                Octal::fmt(&self.bits, f)
            }
        }

        impl Debug for $Name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($Name), "({:#o})"), self.bits)
            }
        }
    };
}

/// Conversions from narrower native types, which always succeed.
macro_rules! from_native {
    ($Name:ident, $($from:ty)*) => {
        $(
            impl From<$from> for $Name {
                fn from(n: $from) -> $Name {
                    $Name { bits: n.into() }
                }
            }
        )*
    }
}

/// Conversions from native types which may be out of range.
macro_rules! try_from_native {
    ($Name:ident, $Inner:ty, $($from:ty)*) => {
        $(
            impl TryFrom<$from> for $Name {
                type Error = ConversionFailed;
                fn try_from(n: $from) -> Result<$Name, ConversionFailed> {
                    #[allow(unused_comparisons)]
                    let negative = n < 0;
                    match <$Inner>::try_from(n) {
                        Ok(bits) => $Name::try_from(bits),
                        Err(_) if negative => Err(ConversionFailed::TooSmall),
                        Err(_) => Err(ConversionFailed::TooLarge),
                    }
                }
            }
        )*
    }
}

/// Widening conversions between word types.
macro_rules! widen {
    ($Narrow:ident($NarrowInner:ty) => $($Wide:ident)*) => {
        $(
            impl From<$Narrow> for $Wide {
                fn from(w: $Narrow) -> $Wide {
                    $Wide { bits: w.bits.into() }
                }
            }

            impl TryFrom<$Wide> for $Narrow {
                type Error = ConversionFailed;
                fn try_from(w: $Wide) -> Result<$Narrow, ConversionFailed> {
                    let bits: Result<$NarrowInner, _> = w.bits.try_into();
                    match bits {
                        Ok(bits) => $Narrow::try_from(bits),
                        Err(_) => Err(ConversionFailed::TooLarge),
                    }
                }
            }
        )*
    }
}

unsigned_word!(
    /// A full machine word.
    Word36,
    u64,
    36
);
unsigned_word!(
    /// The width of the timer register.
    Word27,
    u32,
    27
);
unsigned_word!(
    /// An absolute memory address.
    Word24,
    u32,
    24
);
unsigned_word!(
    /// A half word; also the width of the instruction counter and of
    /// an offset within a segment.
    Word18,
    u32,
    18
);
unsigned_word!(
    /// A segment number.
    Word15,
    u16,
    15
);
unsigned_word!(
    /// A quarter word; also the width of an opcode.
    Word9,
    u16,
    9
);

from_native!(Word36, u8 u16 u32);
from_native!(Word27, u8 u16);
from_native!(Word24, u8 u16);
from_native!(Word18, u8 u16);
from_native!(Word15, u8);
from_native!(Word9, u8);

try_from_native!(Word36, u64, i32 i64 usize);
try_from_native!(Word27, u32, u64 i32 usize);
try_from_native!(Word24, u32, u64 i32 usize);
try_from_native!(Word18, u32, u64 i32 usize);
try_from_native!(Word15, u16, u32 i32 usize);
try_from_native!(Word9, u16, u32 i32 usize);

widen!(Word27(u32) => Word36);
widen!(Word24(u32) => Word36);
widen!(Word18(u32) => Word36 Word27 Word24);
widen!(Word15(u16) => Word36 Word24 Word18);
widen!(Word9(u16) => Word36 Word24 Word18);

impl Word24 {
    /// Index into a word array.  A 24-bit value always fits in a
    /// `usize` on the platforms we support.
    pub const fn as_index(self) -> usize {
        self.bits as usize
    }
}
