//! Deciding when interrupts and group 7 faults may be taken.
//!
//! Interrupts and the group 7 faults (shutdown, timer runout,
//! connect) are only recognised at the start of an instruction, and
//! not at every such point: the instruction counter must be even, the
//! previous instruction must not have been a transfer or have had its
//! inhibit bit set, and the processor must not be part way through an
//! XEC, XED or repeat.  A DIS instruction is always a sampling point.
//!
//! When a group 7 fault and an interrupt are both pending, the fault
//! is taken and the interrupt waits for the next sampling point.
use base::prelude::*;

use crate::fault::FaultCode;
use crate::registers::ControlUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct SamplingInputs {
    pub ic_odd: bool,
    pub previous_transfer: bool,
    pub previous_inhibit: bool,
    pub in_xec_or_repeat: bool,
    pub after_dis: bool,
}

/// Whether interrupts and group 7 faults may be sampled.
pub fn sampling_allowed(inputs: SamplingInputs) -> bool {
    if inputs.after_dis {
        true
    } else if inputs.in_xec_or_repeat {
        false
    } else {
        !inputs.previous_inhibit && !inputs.ic_odd && !inputs.previous_transfer
    }
}

/// Make the sampling decision for the instruction at `ic`, updating
/// the one-shot flags in the control unit.
pub fn decide(cu: &mut ControlUnit, ic: Word18) -> bool {
    let inputs = SamplingInputs {
        ic_odd: ic.is_odd(),
        previous_transfer: cu.was_transfer,
        previous_inhibit: cu.was_inhibited,
        in_xec_or_repeat: cu.in_xec() || cu.repeating,
        after_dis: cu.after_dis,
    };
    let allowed = sampling_allowed(inputs);
    cu.after_dis = false;
    if !inputs.after_dis {
        cu.was_inhibited = false;
    }
    allowed
}

/// An XEC, XED or repeat is starting at `ic`.  From an odd address it
/// holds off sampling for the instruction after it.
pub fn note_indirect_execution(cu: &mut ControlUnit, ic: Word18) {
    if ic.is_odd() {
        cu.was_inhibited = true;
    }
}

/// A pseudo-fetch never samples, but still uses up the one-shot
/// inhibit left by the transfer which led to it.
pub fn skip(cu: &mut ControlUnit) {
    cu.was_inhibited = false;
}

/// The group 7 faults in the order in which they are taken.
const GROUP7_ORDER: [FaultCode; 4] = [FaultCode::CON, FaultCode::TRO, FaultCode::SDF, FaultCode::EXF];

/// Pending group 7 faults, as a mask of [`FaultCode::mask_bit`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Group7 {
    pending: u32,
}

impl Group7 {
    pub fn set(&mut self, code: FaultCode) {
        self.pending |= code.mask_bit();
    }

    /// Fold in faults raised by other threads.
    pub fn absorb(&mut self, preset: u32) {
        self.pending |= preset;
    }

    pub fn clear(&mut self) {
        self.pending = 0;
    }

    pub fn clear_code(&mut self, code: FaultCode) {
        self.pending &= !code.mask_bit();
    }

    pub fn is_set(&self, code: FaultCode) -> bool {
        self.pending & code.mask_bit() != 0
    }

    /// Is anything deliverable?  A timer runout is held back while the
    /// processor is privileged.
    pub fn pending(&self, privileged: bool) -> bool {
        let mut mask = self.pending;
        if privileged {
            mask &= !FaultCode::TRO.mask_bit();
        }
        mask != 0
    }

    /// Remove and return the fault to deliver.  Anything pending
    /// which is not one of the group 7 faults is reported as a
    /// trouble fault.
    pub fn take(&mut self, privileged: bool) -> Option<FaultCode> {
        if !self.pending(privileged) {
            return None;
        }
        for code in GROUP7_ORDER {
            if code == FaultCode::TRO && privileged {
                continue;
            }
            if self.is_set(code) {
                self.pending &= !code.mask_bit();
                return Some(code);
            }
        }
        let unexpected = self.pending & !FaultCode::TRO.mask_bit();
        self.pending &= !unexpected;
        Some(FaultCode::TRB)
    }
}
