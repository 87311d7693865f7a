//! Mapping absolute addresses onto system controllers.
//!
//! The 24-bit absolute address space is divided into 512 banks of
//! 32K words.  Each processor port is cabled to a system controller
//! and its switches say where in the address space that controller's
//! memory appears (the port assignment) and how much of it there is
//! (the store size).  The map built from those switches gives, for
//! each bank, the offset of the bank in the shared memory array and
//! the controller which owns it.
//!
//! Every controller owns one contiguous slice of the shared memory
//! array, `words_per_controller` words long, starting at
//! `controller * words_per_controller`.
//!
//! The map is rebuilt when the switches change (that is, on reset)
//! and is read-only while instructions execute.
use tracing::{event, Level};

use base::prelude::*;

use crate::config::{PortSwitches, Variant};

pub const BANK_SHIFT: u32 = 15;
pub const BANK_WORDS: usize = 1 << BANK_SHIFT;
pub const BANK_COUNT: usize = (1 << Word24::BITS) >> BANK_SHIFT;
const BANK_OFFSET_MASK: u32 = (1 << BANK_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankEntry {
    /// Index in the shared memory array of the first word of the bank.
    pub offset: usize,
    pub controller: usize,
}

#[derive(Debug, Clone)]
pub struct BankMap {
    banks: Vec<Option<BankEntry>>,
}

fn bank_of(address: Word24) -> usize {
    (address.bits() >> BANK_SHIFT) as usize
}

impl BankMap {
    /// Build the map from the port switches.  Ports are considered in
    /// order; where two ports claim the same bank, the first claim
    /// stands.  Problems are logged and the banks concerned left
    /// unmapped.
    pub fn build(
        cpu: u8,
        variant: Variant,
        ports: &[PortSwitches],
        words_per_controller: usize,
    ) -> BankMap {
        let mut banks: Vec<Option<BankEntry>> = vec![None; BANK_COUNT];
        for (port_number, port) in ports.iter().enumerate() {
            if !port.enabled {
                continue;
            }
            let (controller, size) = match (port.controller, variant.store_size_words(port.store_size)) {
                (Some(c), Some(size)) => (c, size),
                _ => {
                    // Switches::sanitize disables these.
                    continue;
                }
            };
            let first_bank = (usize::from(port.assignment) * size) >> BANK_SHIFT;
            let mut overlapping = 0;
            let mut beyond_controller = 0;
            let mut beyond_address_space = 0;
            for page in 0..(size / BANK_WORDS) {
                let bank = first_bank + page;
                let offset_in_controller = page * BANK_WORDS;
                if bank >= BANK_COUNT {
                    beyond_address_space += 1;
                } else if banks[bank].is_some() {
                    overlapping += 1;
                } else if offset_in_controller + BANK_WORDS > words_per_controller {
                    beyond_controller += 1;
                } else {
                    banks[bank] = Some(BankEntry {
                        offset: controller * words_per_controller + offset_in_controller,
                        controller,
                    });
                }
            }
            if overlapping > 0 {
                event!(
                    Level::WARN,
                    "cpu {cpu} port {port_number}: {overlapping} banks overlap memory already claimed by another port; they are left unmapped for this port"
                );
            }
            if beyond_controller > 0 {
                event!(
                    Level::WARN,
                    "cpu {cpu} port {port_number}: store size exceeds controller {controller}'s {words_per_controller} words; {beyond_controller} banks are unmapped"
                );
            }
            if beyond_address_space > 0 {
                event!(
                    Level::WARN,
                    "cpu {cpu} port {port_number}: {beyond_address_space} banks lie beyond the end of the address space"
                );
            }
        }
        BankMap { banks }
    }

    /// A map which sends every address to the same index in the
    /// shared memory array.  Used when mapping is turned off.
    pub fn identity(total_words: usize, words_per_controller: usize) -> BankMap {
        let banks = (0..BANK_COUNT)
            .map(|bank| {
                let offset = bank * BANK_WORDS;
                if offset + BANK_WORDS <= total_words && words_per_controller > 0 {
                    Some(BankEntry {
                        offset,
                        controller: offset / words_per_controller,
                    })
                } else {
                    None
                }
            })
            .collect();
        BankMap { banks }
    }

    pub fn lookup(&self, address: Word24) -> Option<BankEntry> {
        self.banks.get(bank_of(address)).copied().flatten()
    }

    /// The index of `address` in the shared memory array.
    pub fn index_of(&self, address: Word24) -> Option<usize> {
        self.lookup(address)
            .map(|entry| entry.offset + (address.bits() & BANK_OFFSET_MASK) as usize)
    }

    pub fn mapped_banks(&self) -> usize {
        self.banks.iter().filter(|b| b.is_some()).count()
    }
}
