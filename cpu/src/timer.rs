//! The timer register and the lockup monitor.
//!
//! The timer register is a 27-bit down-counter which the hardware
//! decrements at 512 kHz.  We have no such clock, so each cycle
//! decrements it by a configurable amount instead, and a sleep in
//! a DIS instruction is charged at the real rate.  When the counter
//! passes zero it is reloaded with its maximum value and a timer
//! runout fault becomes pending.
//!
//! The lockup monitor detects a processor which has gone too long
//! without reaching a point at which it could take an interrupt.
use std::time::Duration;

use conv::ValueFrom;
use serde::{Deserialize, Serialize};

use base::prelude::*;

/// The timer ticks at 512 kHz, which is 64 ticks every 125µs.
const TICKS_PER_125_MICROS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerUpdate {
    Decremented,
    Underflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerRegister {
    value: Word27,
}

impl TimerRegister {
    pub fn new(value: Word27) -> TimerRegister {
        TimerRegister { value }
    }

    pub fn value(&self) -> Word27 {
        self.value
    }

    pub fn load(&mut self, value: Word27) {
        self.value = value;
    }

    /// Count down by `by`.  Going past zero reloads the register with
    /// its maximum value.
    pub fn decrement(&mut self, by: u32) -> TimerUpdate {
        match self.value.bits().checked_sub(by) {
            Some(v) => {
                self.value = Word27::truncating(v);
                TimerUpdate::Decremented
            }
            None => {
                self.value = Word27::MAX;
                TimerUpdate::Underflow
            }
        }
    }

    /// Charge the register for a period of real time.
    pub fn elapse(&mut self, elapsed: Duration) -> TimerUpdate {
        let micros = elapsed
            .as_secs()
            .saturating_mul(1_000_000)
            .saturating_add(u64::from(elapsed.subsec_micros()));
        let ticks = micros.saturating_mul(TICKS_PER_125_MICROS) / 125;
        self.decrement(u32::value_from(ticks).unwrap_or(u32::MAX))
    }

    /// How long, in real time, until the register would underflow.
    pub fn time_to_underflow(&self) -> Duration {
        let ticks = u64::from(self.value.bits()) + 1;
        Duration::from_micros(ticks * 125 / TICKS_PER_125_MICROS)
    }
}

/// The lockup time setting (the `luf` field of the cache mode
/// register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockupTime {
    Ms2,
    Ms4,
    Ms8,
    #[default]
    Ms16,
}

impl LockupTime {
    /// Number of cycles which stand in for the configured time.
    pub fn cycle_limit(&self) -> u32 {
        match self {
            LockupTime::Ms2 => 2000,
            LockupTime::Ms4 => 4000,
            LockupTime::Ms8 => 8000,
            LockupTime::Ms16 => 16000,
        }
    }

    pub fn from_bits(bits: u8) -> LockupTime {
        match bits & 3 {
            0 => LockupTime::Ms2,
            1 => LockupTime::Ms4,
            2 => LockupTime::Ms8,
            _ => LockupTime::Ms16,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            LockupTime::Ms2 => 0,
            LockupTime::Ms4 => 1,
            LockupTime::Ms8 => 2,
            LockupTime::Ms16 => 3,
        }
    }
}

/// After 32ms a lockup fires whatever the privilege state.
pub const LOCKUP_HARD_LIMIT: u32 = 32000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockupCheck {
    Clear,
    /// The limit passed while privileged; the fault is held back.
    Latched,
    Fire,
}

#[derive(Debug, Clone, Default)]
pub struct LockupMonitor {
    counter: u32,
    occurred: bool,
}

impl LockupMonitor {
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn occurred(&self) -> bool {
        self.occurred
    }

    /// Count one cycle.  The count carries on while privileged so
    /// that the hard limit can still be reached; privilege only
    /// affects whether the configured limit raises the fault.
    pub fn advance(&mut self) {
        self.counter = self.counter.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.occurred = false;
    }

    /// The processor reached a point at which it could have taken an
    /// interrupt.  This restarts the count but keeps any latched
    /// lockup.
    pub fn sampled(&mut self) {
        self.counter = 0;
    }

    /// Decide whether a lockup fault is due.  A fault which fires
    /// also resets the monitor.
    pub fn check(&mut self, setting: LockupTime, privileged: bool) -> LockupCheck {
        let result = if self.counter > LOCKUP_HARD_LIMIT {
            LockupCheck::Fire
        } else if self.counter > setting.cycle_limit() {
            if privileged {
                self.occurred = true;
                LockupCheck::Latched
            } else {
                LockupCheck::Fire
            }
        } else if self.occurred && !privileged {
            LockupCheck::Fire
        } else {
            LockupCheck::Clear
        };
        if result == LockupCheck::Fire {
            self.reset();
        }
        result
    }
}
