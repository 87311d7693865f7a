//! Addressing modes.
//!
//! The processor addresses memory in one of two modes.  In absolute
//! mode the (18-bit) effective address is itself the absolute
//! address.  In append mode the effective address is an offset within
//! a segment and the appending unit translates it.  BAR mode is an
//! overlay on either: the address is first checked against, and
//! relocated by, the base address register.  BAR mode is on when the
//! not-BAR indicator is clear.
//!
//! While a trap pair (the two instructions at a fault or interrupt
//! vector) executes, the processor is in "temporary absolute mode".
//! This is not visible in the indicator register; it makes
//! [`Registers::address_mode`] report absolute mode whatever the
//! indicators say.
use base::prelude::*;

use crate::fault::Fault;
use crate::registers::Registers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Absolute,
    Append,
}

/// The base address register.  Both fields are in units of 512
/// words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseAddressRegister {
    pub base: Word9,
    pub bound: Word9,
}

impl BaseAddressRegister {
    /// Relocate an address issued in BAR mode.  A zero bound makes
    /// every address out of bounds.
    pub fn relocate(&self, address: Word18) -> Result<Word18, Fault> {
        let bound = u32::from(self.bound.bits()) << 9;
        if bound == 0 || address.bits() >= bound {
            return Err(Fault::store_out_of_bounds(address));
        }
        let base = u32::from(self.base.bits()) << 9;
        Ok(Word18::truncating(address.bits() + base))
    }
}

/// Stands in for the appending unit, which translates a segment
/// number and offset into an absolute address.
pub trait AddressTranslator: Send {
    fn translate(
        &mut self,
        regs: &mut Registers,
        segment: Word15,
        offset: Word18,
    ) -> Result<Word24, Fault>;
}

/// A translator in which every segment starts at absolute address
/// zero.
#[derive(Debug, Default)]
pub struct FlatTranslator;

impl AddressTranslator for FlatTranslator {
    fn translate(
        &mut self,
        regs: &mut Registers,
        _segment: Word15,
        offset: Word18,
    ) -> Result<Word24, Fault> {
        regs.note_append_cycle();
        Ok(Word24::from(offset))
    }
}

impl Registers {
    pub fn address_mode(&self) -> AddressMode {
        if self.secret_absolute || self.ir.absolute_mode {
            AddressMode::Absolute
        } else {
            AddressMode::Append
        }
    }

    pub fn bar_mode(&self) -> bool {
        !(self.secret_absolute || self.ir.not_bar)
    }

    pub fn is_privileged(&self) -> bool {
        if self.bar_mode() {
            false
        } else {
            self.address_mode() == AddressMode::Absolute || self.ppr.privileged
        }
    }

    /// Change the mode bits.  This also ends temporary absolute
    /// mode.  Absolute mode is always privileged.
    pub fn set_address_mode(&mut self, mode: AddressMode) {
        self.secret_absolute = false;
        match mode {
            AddressMode::Absolute => {
                self.ir.absolute_mode = true;
                self.ir.not_bar = true;
                self.ppr.privileged = true;
            }
            AddressMode::Append => {
                self.ir.absolute_mode = false;
                self.ir.not_bar = true;
            }
        }
    }

    pub fn enter_temporary_absolute(&mut self) {
        self.secret_absolute = true;
        self.went_appending = false;
        self.ir.not_bar = true;
    }

    /// End temporary absolute mode.  Returns true if the trap pair
    /// performed an appending cycle, in which case the processor
    /// should stay in append mode.
    pub fn leave_temporary_absolute(&mut self) -> bool {
        self.secret_absolute = false;
        std::mem::take(&mut self.went_appending)
    }

    pub fn in_temporary_absolute(&self) -> bool {
        self.secret_absolute
    }

    pub fn note_append_cycle(&mut self) {
        if self.secret_absolute {
            self.went_appending = true;
        }
    }

    /// Convert an effective address to an absolute one, applying BAR
    /// relocation and (in append mode) the translator.
    pub fn final_address(
        &mut self,
        translator: &mut dyn AddressTranslator,
        segment: Word15,
        offset: Word18,
    ) -> Result<Word24, Fault> {
        let offset = if self.bar_mode() {
            self.bar.relocate(offset)?
        } else {
            offset
        };
        match self.address_mode() {
            AddressMode::Absolute => Ok(Word24::from(offset)),
            AddressMode::Append => translator.translate(self, segment, offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultCode, FaultSubtype};
    use crate::timer::LockupTime;
    use test_strategy::proptest;

    fn bar(base: u16, bound: u16) -> BaseAddressRegister {
        BaseAddressRegister {
            base: Word9::truncating(base),
            bound: Word9::truncating(bound),
        }
    }

    #[proptest]
    fn zero_bound_always_faults(#[strategy(0u32..0o1_000_000)] a: u32, #[strategy(0u16..0o1000)] base: u16) {
        let fault = bar(base, 0)
            .relocate(Word18::truncating(a))
            .expect_err("a zero bound admits nothing");
        assert_eq!(fault.code, FaultCode::STR);
        assert_eq!(fault.subtype, FaultSubtype::StoreOutOfBounds);
    }

    #[proptest]
    fn bound_check_and_relocation(
        #[strategy(0u32..0o1_000_000)] a: u32,
        #[strategy(0u16..0o1000)] base: u16,
        #[strategy(1u16..0o1000)] bound: u16,
    ) {
        let result = bar(base, bound).relocate(Word18::truncating(a));
        if a >= u32::from(bound) << 9 {
            assert!(result.is_err());
        } else {
            let expected = (a + (u32::from(base) << 9)) & 0o777777;
            assert_eq!(result.map(|w| w.bits()), Ok(expected));
        }
    }

    #[test]
    fn test_temporary_absolute_overrides_mode() {
        let mut regs = Registers::initial(LockupTime::default());
        regs.set_address_mode(AddressMode::Append);
        regs.ir.not_bar = false;
        assert!(regs.bar_mode());
        assert!(!regs.is_privileged());

        regs.enter_temporary_absolute();
        assert_eq!(regs.address_mode(), AddressMode::Absolute);
        assert!(!regs.bar_mode());
        assert!(regs.is_privileged());

        assert!(!regs.leave_temporary_absolute());
        assert_eq!(regs.address_mode(), AddressMode::Append);
    }

    #[test]
    fn test_appending_in_trap_pair_is_remembered() {
        let mut regs = Registers::initial(LockupTime::default());
        regs.enter_temporary_absolute();
        // The trap pair is in absolute mode, so the translator is not
        // consulted by final_address; call it directly.
        let mut flat = FlatTranslator;
        let addr = flat.translate(&mut regs, Word15::ZERO, Word18::truncating(0o1234));
        assert_eq!(addr, Ok(Word24::truncating(0o1234)));
        assert!(regs.leave_temporary_absolute());
        // And it is a one-shot.
        assert!(!regs.leave_temporary_absolute());
    }

    #[test]
    fn test_final_address_in_bar_mode() {
        let mut regs = Registers::initial(LockupTime::default());
        regs.bar = bar(2, 1);
        regs.ir.not_bar = false;
        let mut flat = FlatTranslator;
        assert_eq!(
            regs.final_address(&mut flat, Word15::ZERO, Word18::truncating(0o10)),
            Ok(Word24::truncating(0o2010))
        );
        assert!(regs
            .final_address(&mut flat, Word15::ZERO, Word18::truncating(0o1000))
            .is_err());
    }
}
