//! The `base` crate defines the word-level vocabulary of the 36-bit
//! processor: fixed-width unsigned words, half-word splitting and
//! the packed layout of an instruction word.  It holds no processor
//! state, so that tools other than the emulator (a loader, a
//! disassembler) can depend on it without pulling in the engine.

mod error;
mod word;

pub mod instruction;
pub mod prelude;
pub mod subword;

pub use crate::error::ConversionFailed;
pub use crate::word::*;

#[macro_export]
macro_rules! w36 {
    ($n:expr) => {
        $crate::prelude::Word36::new::<{ $n }>()
    };
}

#[macro_export]
macro_rules! w24 {
    ($n:expr) => {
        $crate::prelude::Word24::new::<{ $n }>()
    };
}

#[macro_export]
macro_rules! w18 {
    ($n:expr) => {
        $crate::prelude::Word18::new::<{ $n }>()
    };
}

#[test]
fn test_w36() {
    use prelude::Word36;
    let m: Word36 = w36!(40_u64);
    let n: Word36 = Word36::from(40_u32);
    assert_eq!(m, n);

    let p: Word36 = w36!(1u64 << 35);
    let q: Word36 = Word36::try_from(1u64 << 35).expect("test data should be in range");
    assert_eq!(p, q);
}

#[test]
fn test_w18() {
    use prelude::Word18;
    let p: Word18 = w18!(0o777_777);
    assert_eq!(p, Word18::MAX);
    assert!(Word18::try_from(1u32 << 18).is_err());
}
