//! The interface to instruction decoding and execution.
//!
//! The cycle engine knows very little about individual instructions.
//! It needs to know which ones transfer control (they set the
//! instruction counter themselves and affect interrupt sampling),
//! which one is DIS, which ones execute other instructions (XEC,
//! XED), which start a repeat, and how many descriptor words follow a
//! multiword instruction.  A [`Decoder`] supplies this.  Everything
//! else about an instruction is the business of the [`Executor`].
use base::prelude::*;

use crate::addressing::AddressTranslator;
use crate::fault::Fault;
use crate::registers::{ControlUnit, Registers};
use crate::scu::Controllers;
use crate::memory::MemoryAccess;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpcodeClass {
    #[default]
    Ordinary,
    Transfer,
    /// Delay until interrupt.
    Dis,
    Xec,
    Xed,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstructionFlags {
    pub transfer: bool,
    pub call: bool,
    /// Number of descriptor words following the instruction.
    pub descriptor_words: u8,
    /// The instruction enters BAR mode (TSS).  Such a transfer out of
    /// a trap pair leaves BAR mode on.
    pub enters_bar: bool,
    /// Address modification is not permitted.
    pub no_modification: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub word: InstructionWord,
    pub opcode: Opcode,
    pub tag: Tag,
    pub inhibit: bool,
    pub class: OpcodeClass,
    pub flags: InstructionFlags,
}

impl Default for DecodedInstruction {
    fn default() -> DecodedInstruction {
        StandardDecoder.decode(InstructionWord::assemble(
            Word18::ZERO,
            opcodes::NOP,
            false,
            false,
            Tag::NONE,
        ))
    }
}

impl DecodedInstruction {
    /// How far the instruction counter moves past this instruction.
    pub fn length(&self) -> Word18 {
        Word18::from(1 + self.flags.descriptor_words)
    }
}

pub trait Decoder: Send {
    fn decode(&self, word: InstructionWord) -> DecodedInstruction;
}

/// What the engine should do after an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Move on to the next instruction.
    Continue,
    /// The instruction set the instruction counter.
    Transfer,
    /// The instruction restored the control unit from a saved state
    /// (a return from a fault handler).
    Return,
    /// Execute these instructions (one for XEC, two for XED) in place
    /// of the next fetch.
    ExecuteIndirect { even: Word36, odd: Option<Word36> },
    /// Execute the current instruction again.
    BeginRepeat,
    /// Wait for an interrupt.
    Delay,
    /// Stop the engine with this reason code.
    HostStop(u32),
    /// The executor found itself in a state it cannot handle.
    Error(String),
}

/// What an executing instruction may touch.
pub struct ExecutionContext<'a> {
    pub cpu: usize,
    pub regs: &'a mut Registers,
    pub cu: &'a mut ControlUnit,
    pub memory: &'a mut MemoryAccess,
    pub controllers: &'a Controllers,
    pub translator: &'a mut dyn AddressTranslator,
}

impl ExecutionContext<'_> {
    /// The absolute address of an operand at `offset` in the current
    /// procedure segment.
    pub fn operand_address(&mut self, offset: Word18) -> Result<Word24, Fault> {
        let segment = self.regs.ppr.psr;
        self.regs.final_address(self.translator, segment, offset)
    }

    pub fn read_operand(&mut self, offset: Word18) -> Result<Word36, Fault> {
        let address = self.operand_address(offset)?;
        self.memory.read(address)
    }

    pub fn write_operand(&mut self, offset: Word18, value: Word36) -> Result<(), Fault> {
        let address = self.operand_address(offset)?;
        self.memory.write(address, value)
    }
}

pub trait Executor: Send {
    fn execute(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        inst: &DecodedInstruction,
    ) -> Result<Outcome, Fault>;
}

/// Opcodes the engine's sequencing depends on.
pub mod opcodes {
    use base::prelude::*;

    const fn basic(code: u16) -> Opcode {
        Opcode::basic(Word9::truncating(code))
    }

    const fn extended(code: u16) -> Opcode {
        Opcode::extended(Word9::truncating(code))
    }

    pub const NOP: Opcode = basic(0o011);
    pub const LDA: Opcode = basic(0o235);
    pub const STA: Opcode = basic(0o755);
    pub const TRA: Opcode = basic(0o710);
    pub const TZE: Opcode = basic(0o600);
    pub const TNZ: Opcode = basic(0o601);
    pub const TNC: Opcode = basic(0o602);
    pub const TRC: Opcode = basic(0o603);
    pub const TMI: Opcode = basic(0o604);
    pub const TPL: Opcode = basic(0o605);
    pub const TTF: Opcode = basic(0o607);
    pub const RTCD: Opcode = basic(0o610);
    pub const DIS: Opcode = basic(0o616);
    pub const TOV: Opcode = basic(0o617);
    pub const RET: Opcode = basic(0o630);
    pub const CALL6: Opcode = basic(0o713);
    pub const TSS: Opcode = basic(0o715);
    pub const XEC: Opcode = basic(0o716);
    pub const XED: Opcode = basic(0o717);
    pub const RPL: Opcode = basic(0o500);
    pub const RPT: Opcode = basic(0o520);
    pub const RPD: Opcode = basic(0o560);

    pub const MLR: Opcode = extended(0o100);
    pub const MRL: Opcode = extended(0o101);
    pub const CMPC: Opcode = extended(0o106);
    pub const SCD: Opcode = extended(0o120);
    pub const SCM: Opcode = extended(0o124);
    pub const MVT: Opcode = extended(0o160);
    pub const TCT: Opcode = extended(0o164);
    pub const TCTR: Opcode = extended(0o165);
    pub const AD2D: Opcode = extended(0o202);
    pub const SB2D: Opcode = extended(0o203);
    pub const MVN: Opcode = extended(0o300);
    pub const BTD: Opcode = extended(0o301);
    pub const DTB: Opcode = extended(0o305);

    /// tsx0 is 700; tsxn is 700 + n.
    pub fn is_tsx(op: Opcode) -> bool {
        !op.is_extended() && (0o700..=0o707).contains(&op.code().bits())
    }
}

/// A decoder which knows the opcodes listed in [`opcodes`] and treats
/// everything else as ordinary.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDecoder;

impl StandardDecoder {
    fn classify(op: Opcode) -> (OpcodeClass, InstructionFlags) {
        use opcodes::*;
        let transfer = InstructionFlags {
            transfer: true,
            ..InstructionFlags::default()
        };
        let descriptors = |n| InstructionFlags {
            descriptor_words: n,
            ..InstructionFlags::default()
        };
        match op {
            _ if is_tsx(op) => (OpcodeClass::Transfer, transfer),
            TRA | TZE | TNZ | TNC | TRC | TMI | TPL | TTF | TOV | RTCD | RET => {
                (OpcodeClass::Transfer, transfer)
            }
            CALL6 => (
                OpcodeClass::Transfer,
                InstructionFlags {
                    call: true,
                    ..transfer
                },
            ),
            TSS => (
                OpcodeClass::Transfer,
                InstructionFlags {
                    enters_bar: true,
                    ..transfer
                },
            ),
            DIS => (OpcodeClass::Dis, InstructionFlags::default()),
            XEC => (OpcodeClass::Xec, InstructionFlags::default()),
            XED => (OpcodeClass::Xed, InstructionFlags::default()),
            RPT | RPD | RPL => (
                OpcodeClass::Repeat,
                InstructionFlags {
                    no_modification: true,
                    ..InstructionFlags::default()
                },
            ),
            MLR | MRL | CMPC | MVN | AD2D | SB2D | BTD | DTB => (OpcodeClass::Ordinary, descriptors(2)),
            SCD | SCM | MVT | TCT | TCTR => (OpcodeClass::Ordinary, descriptors(3)),
            _ => (OpcodeClass::Ordinary, InstructionFlags::default()),
        }
    }
}

impl Decoder for StandardDecoder {
    fn decode(&self, word: InstructionWord) -> DecodedInstruction {
        let opcode = word.opcode();
        let (class, flags) = StandardDecoder::classify(opcode);
        DecodedInstruction {
            word,
            opcode,
            tag: word.tag(),
            inhibit: word.inhibit(),
            class,
            flags,
        }
    }
}

/// Called periodically to service peripherals, which may post
/// interrupts.
pub trait IoPoll: Send {
    fn poll(&mut self, controllers: &Controllers);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(op: Opcode) -> DecodedInstruction {
        StandardDecoder.decode(InstructionWord::assemble(
            Word18::truncating(0o100),
            op,
            false,
            false,
            Tag::NONE,
        ))
    }

    #[test]
    fn test_transfers() {
        for op in [opcodes::TRA, opcodes::TZE, opcodes::RET, opcodes::RTCD] {
            let inst = decode(op);
            assert_eq!(inst.class, OpcodeClass::Transfer, "{op}");
            assert!(inst.flags.transfer);
        }
        assert!(decode(Opcode::basic(Word9::truncating(0o703))).flags.transfer);
        assert!(decode(opcodes::CALL6).flags.call);
        assert!(decode(opcodes::TSS).flags.enters_bar);
        assert!(!decode(opcodes::TRA).flags.enters_bar);
    }

    #[test]
    fn test_descriptor_counts() {
        assert_eq!(decode(opcodes::MLR).length(), Word18::truncating(3));
        assert_eq!(decode(opcodes::TCTR).length(), Word18::truncating(4));
        assert_eq!(decode(opcodes::LDA).length(), Word18::ONE);
        // Same number, other table.
        assert_eq!(
            decode(Opcode::basic(Word9::truncating(0o100))).length(),
            Word18::ONE
        );
    }

    #[test]
    fn test_special_classes() {
        assert_eq!(decode(opcodes::DIS).class, OpcodeClass::Dis);
        assert_eq!(decode(opcodes::XEC).class, OpcodeClass::Xec);
        assert_eq!(decode(opcodes::XED).class, OpcodeClass::Xed);
        assert_eq!(decode(opcodes::RPD).class, OpcodeClass::Repeat);
        assert_eq!(DecodedInstruction::default().opcode, opcodes::NOP);
    }

    #[test]
    fn test_inhibit_bit_is_decoded() {
        let inst = StandardDecoder.decode(InstructionWord::assemble(
            Word18::ZERO,
            opcodes::NOP,
            true,
            false,
            Tag::NONE,
        ));
        assert!(inst.inhibit);
    }
}
