//! The packed representation of an instruction word.
//!
//! A basic instruction occupies one 36-bit word.  Using the
//! least-significant-bit-zero numbering of this crate, the fields
//! are:
//!
//! | Y (address) | Opcode | Ext   | I     | A     | Tag    |
//! |-------------|--------|-------|-------|-------|--------|
//! | 18 bits     | 9 bits | 1 bit | 1 bit | 1 bit | 6 bits |
//! | (18-35)     | (9-17) | (8)   | (7)   | (6)   | (0-5)  |
//!
//! Ext is the opcode extension bit (it selects the second opcode
//! table, where most of the multiword string instructions live), I
//! inhibits interrupts after the instruction and A says that the
//! address field is relative to a pointer register.
//!
//! Multiword instructions are followed by descriptor words which
//! have a different layout; those are the business of the
//! instruction executor, not of this module.
//!
//! Outside this module the fields are handled unpacked; the packed
//! form exists only at this decode boundary.

use std::fmt::{self, Debug, Display, Formatter};

use super::subword::{self, field};
use super::word::{Word18, Word36, Word9};

const EXTENSION_BIT: u32 = 8;
const INHIBIT_BIT: u32 = 7;
const POINTER_REGISTER_BIT: u32 = 6;

/// An opcode together with its extension bit.  The opcodes of the two
/// tables overlap numerically, so both parts are needed to identify
/// an operation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Opcode {
    code: Word9,
    extended: bool,
}

impl Opcode {
    pub const fn basic(code: Word9) -> Opcode {
        Opcode {
            code,
            extended: false,
        }
    }

    pub const fn extended(code: Word9) -> Opcode {
        Opcode {
            code,
            extended: true,
        }
    }

    pub const fn code(&self) -> Word9 {
        self.code
    }

    pub const fn is_extended(&self) -> bool {
        self.extended
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:03o}(1)", self.code)
        } else {
            write!(f, "{:03o}", self.code)
        }
    }
}

impl Debug for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({self})")
    }
}

/// The address-modification tag.  The top two bits give the
/// modifier type and the bottom four the designator (a register or
/// an indirection variant).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tag(u8);

impl Tag {
    pub const NONE: Tag = Tag(0);

    pub fn new(bits: u8) -> Tag {
        Tag(bits & 0o77)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn modifier_type(&self) -> u8 {
        self.0 >> 4
    }

    pub const fn designator(&self) -> u8 {
        self.0 & 0o17
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:02o})", self.0)
    }
}

/// An instruction word, as fetched from memory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstructionWord(Word36);

impl InstructionWord {
    /// Build an instruction word from its fields.
    pub fn assemble(
        address: Word18,
        opcode: Opcode,
        inhibit: bool,
        pointer_register: bool,
        tag: Tag,
    ) -> InstructionWord {
        let lower: u32 = (u32::from(opcode.code.bits()) << 9)
            | (u32::from(opcode.extended) << EXTENSION_BIT)
            | (u32::from(inhibit) << INHIBIT_BIT)
            | (u32::from(pointer_register) << POINTER_REGISTER_BIT)
            | u32::from(tag.bits());
        InstructionWord(subword::join_halves(address, Word18::truncating(lower)))
    }

    pub const fn word(&self) -> Word36 {
        self.0
    }

    pub fn address(&self) -> Word18 {
        subword::upper_half(self.0)
    }

    pub fn opcode(&self) -> Opcode {
        Opcode {
            code: Word9::truncating(field(self.0, 9, 9) as u16),
            extended: field(self.0, EXTENSION_BIT, 1) != 0,
        }
    }

    pub fn inhibit(&self) -> bool {
        field(self.0, INHIBIT_BIT, 1) != 0
    }

    pub fn uses_pointer_register(&self) -> bool {
        field(self.0, POINTER_REGISTER_BIT, 1) != 0
    }

    pub fn tag(&self) -> Tag {
        Tag::new(field(self.0, 0, 6) as u8)
    }
}

impl From<Word36> for InstructionWord {
    fn from(w: Word36) -> InstructionWord {
        InstructionWord(w)
    }
}

impl From<InstructionWord> for Word36 {
    fn from(inst: InstructionWord) -> Word36 {
        inst.0
    }
}

impl Debug for InstructionWord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InstructionWord({:06o} {} i={} a={} tag={:02o})",
            self.address(),
            self.opcode(),
            u8::from(self.inhibit()),
            u8::from(self.uses_pointer_register()),
            self.tag().bits()
        )
    }
}
