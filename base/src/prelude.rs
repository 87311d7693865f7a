//! The prelude exports the word types and instruction-word accessors
//! which nearly every user of the crate needs.
pub use super::error::ConversionFailed;
pub use super::instruction::{InstructionWord, Opcode, Tag};
pub use super::subword::{join_halves, lower_half, split_halves, upper_half};
pub use super::word::*;
pub use super::{w18, w24, w36};
