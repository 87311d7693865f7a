//! Convenience utilities for splitting 36-bit words into their
//! halves and for joining them together.
//!
//! Bits are numbered here from the least significant end, so the
//! "upper" half is the one holding the address field of an
//! instruction word.
use crate::word::{Word18, Word36};

/// Split a 36-bit word into its upper and lower 18-bit halves.
pub fn split_halves(w: Word36) -> (Word18, Word18) {
    (upper_half(w), lower_half(w))
}

/// Join two 18-bit values into a 36-bit word.
pub fn join_halves(upper: Word18, lower: Word18) -> Word36 {
    Word36::truncating((u64::from(upper.bits()) << 18) | u64::from(lower.bits()))
}

/// Extract the more-significant halfword from a full word.
pub fn upper_half(word: Word36) -> Word18 {
    Word18::truncating((word.bits() >> 18) as u32)
}

/// Extract the less-significant halfword from a full word.
pub fn lower_half(word: Word36) -> Word18 {
    Word18::truncating((word.bits() & 0o777_777) as u32)
}

/// Extract `width` bits of `word` whose least significant bit is at
/// position `lsb`.
pub(crate) fn field(word: Word36, lsb: u32, width: u32) -> u64 {
    (word.bits() >> lsb) & ((1_u64 << width) - 1)
}
