//! The architectural register file and the control unit's scratch
//! state.
//!
//! Registers which the hardware packs into a single word (the
//! indicator register, for example) are held here as named fields.
//! The packed form is produced only where it has to be stored in
//! memory, by [`Indicators::to_word`].
use base::prelude::*;

use crate::addressing::{AddressMode, BaseAddressRegister};
use crate::arbiter::Group7;
use crate::executor::DecodedInstruction;
use crate::timer::{LockupTime, TimerRegister};

/// The indicator register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Indicators {
    pub zero: bool,
    pub negative: bool,
    pub carry: bool,
    pub overflow: bool,
    pub exponent_overflow: bool,
    pub exponent_underflow: bool,
    pub overflow_mask: bool,
    pub tally_runout: bool,
    pub parity_error: bool,
    pub parity_mask: bool,
    /// Set when the processor is not in BAR mode.
    pub not_bar: bool,
    pub truncation: bool,
    pub mid_instruction_interrupt_fault: bool,
    pub absolute_mode: bool,
    pub hex_mode: bool,
}

const IR_ZERO: u32 = 0o400000;
const IR_NEGATIVE: u32 = 0o200000;
const IR_CARRY: u32 = 0o100000;
const IR_OVERFLOW: u32 = 0o040000;
const IR_EXPONENT_OVERFLOW: u32 = 0o020000;
const IR_EXPONENT_UNDERFLOW: u32 = 0o010000;
const IR_OVERFLOW_MASK: u32 = 0o004000;
const IR_TALLY_RUNOUT: u32 = 0o002000;
const IR_PARITY_ERROR: u32 = 0o001000;
const IR_PARITY_MASK: u32 = 0o000400;
const IR_NOT_BAR: u32 = 0o000200;
const IR_TRUNCATION: u32 = 0o000100;
const IR_MIF: u32 = 0o000040;
const IR_ABSOLUTE: u32 = 0o000020;
const IR_HEX: u32 = 0o000010;

impl Indicators {
    fn fields(&self) -> [(u32, bool); 15] {
        [
            (IR_ZERO, self.zero),
            (IR_NEGATIVE, self.negative),
            (IR_CARRY, self.carry),
            (IR_OVERFLOW, self.overflow),
            (IR_EXPONENT_OVERFLOW, self.exponent_overflow),
            (IR_EXPONENT_UNDERFLOW, self.exponent_underflow),
            (IR_OVERFLOW_MASK, self.overflow_mask),
            (IR_TALLY_RUNOUT, self.tally_runout),
            (IR_PARITY_ERROR, self.parity_error),
            (IR_PARITY_MASK, self.parity_mask),
            (IR_NOT_BAR, self.not_bar),
            (IR_TRUNCATION, self.truncation),
            (IR_MIF, self.mid_instruction_interrupt_fault),
            (IR_ABSOLUTE, self.absolute_mode),
            (IR_HEX, self.hex_mode),
        ]
    }

    /// The packed form, as stored by the `sti` and `scu` instructions.
    pub fn to_word(&self) -> Word18 {
        let bits = self
            .fields()
            .into_iter()
            .filter(|(_, set)| *set)
            .fold(0, |acc, (bit, _)| acc | bit);
        Word18::truncating(bits)
    }

    pub fn from_word(w: Word18) -> Indicators {
        let has = |bit: u32| w.bits() & bit != 0;
        Indicators {
            zero: has(IR_ZERO),
            negative: has(IR_NEGATIVE),
            carry: has(IR_CARRY),
            overflow: has(IR_OVERFLOW),
            exponent_overflow: has(IR_EXPONENT_OVERFLOW),
            exponent_underflow: has(IR_EXPONENT_UNDERFLOW),
            overflow_mask: has(IR_OVERFLOW_MASK),
            tally_runout: has(IR_TALLY_RUNOUT),
            parity_error: has(IR_PARITY_ERROR),
            parity_mask: has(IR_PARITY_MASK),
            not_bar: has(IR_NOT_BAR),
            truncation: has(IR_TRUNCATION),
            mid_instruction_interrupt_fault: has(IR_MIF),
            absolute_mode: has(IR_ABSOLUTE),
            hex_mode: has(IR_HEX),
        }
    }
}

/// The procedure pointer register: where the processor is executing
/// and with what privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcedurePointer {
    /// Procedure segment register.
    pub psr: Word15,
    /// Procedure ring register.
    pub prr: u8,
    /// The privileged bit of the current procedure's segment.
    pub privileged: bool,
    /// The instruction counter.
    pub ic: Word18,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    pub ppr: ProcedurePointer,
    pub a: Word36,
    pub q: Word36,
    pub x: [Word18; 8],
    pub ir: Indicators,
    pub bar: BaseAddressRegister,
    pub tr: TimerRegister,
    /// The lockup-time field of the cache mode register.
    pub lockup_time: LockupTime,
    /// Set while a trap pair executes; see
    /// [`Registers::enter_temporary_absolute`].
    pub(crate) secret_absolute: bool,
    /// Set when an appending cycle happens while `secret_absolute` is
    /// set.
    pub(crate) went_appending: bool,
}

impl Registers {
    /// The register state after a processor reset: absolute mode,
    /// not in BAR mode, privileged, ring 0 and a zero timer.
    pub fn initial(lockup_time: LockupTime) -> Registers {
        let mut regs = Registers {
            ppr: ProcedurePointer::default(),
            a: Word36::ZERO,
            q: Word36::ZERO,
            x: [Word18::ZERO; 8],
            ir: Indicators::default(),
            bar: BaseAddressRegister::default(),
            tr: TimerRegister::default(),
            lockup_time,
            secret_absolute: false,
            went_appending: false,
        };
        regs.set_address_mode(AddressMode::Absolute);
        regs
    }
}

/// State saved on entry to a trap pair, so that a pair which
/// completes without a transfer (or an interrupt which turns out not
/// to be there) can put things back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeStore {
    pub ppr: ProcedurePointer,
    pub ir: Indicators,
    pub mode: AddressMode,
    pub iwb: InstructionWord,
    /// On completion of the pair, move past the instruction which
    /// faulted.  Clear for faults taken at FETCH and for interrupts,
    /// where the stored instruction counter is that of an instruction
    /// which has not yet run.
    pub resume_advance: bool,
}

/// Control-unit scratch state which is not architecturally visible
/// except through `scu`.
#[derive(Debug, Clone, Default)]
pub struct ControlUnit {
    /// Instruction word buffer: the word being executed.
    pub iwb: InstructionWord,
    pub current: DecodedInstruction,
    /// The odd word of a trap pair, waiting for the even word to
    /// complete.
    pub trap_odd: Option<Word36>,
    /// The odd word of an XED pair.
    pub xed_odd: Option<Word36>,
    /// The XEC or XED instruction whose target is being executed.
    pub xec_origin: Option<DecodedInstruction>,
    pub repeating: bool,
    /// The previous instruction was a transfer.
    pub was_transfer: bool,
    /// One-shot: the next sampling point is skipped.
    pub was_inhibited: bool,
    /// The previous instruction was a DIS which completed.
    pub after_dis: bool,
    /// The last fault delivered was a trouble fault and no instruction
    /// has completed since.
    pub trouble_fault: bool,
    pub safe_store: Option<SafeStore>,
    /// Pending group 7 faults.  Loading the timer register should
    /// clear a pending timer runout.
    pub group7: Group7,
}

impl ControlUnit {
    pub fn in_xec(&self) -> bool {
        self.xec_origin.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn test_indicator_positions() {
        let ir = Indicators {
            zero: true,
            absolute_mode: true,
            ..Indicators::default()
        };
        assert_eq!(ir.to_word(), Word18::truncating(0o400020));
        assert!(Indicators::from_word(Word18::truncating(0o000200)).not_bar);
    }

    #[proptest]
    fn indicator_bits_survive_packing(#[strategy(0u32..0o1_000_000)] bits: u32) {
        // Only the fifteen defined positions are kept.
        let w = Word18::truncating(bits & 0o777770);
        assert_eq!(Indicators::from_word(w).to_word(), w);
    }

    #[test]
    fn test_initial_registers_are_absolute_and_privileged() {
        let regs = Registers::initial(LockupTime::default());
        assert_eq!(regs.address_mode(), AddressMode::Absolute);
        assert!(!regs.bar_mode());
        assert!(regs.is_privileged());
        assert_eq!(regs.tr.value(), Word27::ZERO);
    }
}
