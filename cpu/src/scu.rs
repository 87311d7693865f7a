//! System controllers: the interrupt side.
//!
//! A system controller owns a slice of memory (see
//! [`crate::memorymap`]) and 32 interrupt cells.  Peripherals (or
//! software, via `sscr`) set a cell; processors take the interrupt
//! at a sampling point, which clears the cell.  Cell 0 has the
//! highest priority.
//!
//! Each controller has two execute-interrupt mask registers.  Each
//! mask is assigned to one of the controller's ports, and a processor
//! cabled to that port sees exactly the cells its mask enables.
//!
//! Each controller is behind its own mutex.  No code holds two of
//! them at once, and none holds one while locking a memory word.
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{event, Level};

use base::prelude::*;

use crate::fault::FaultCode;
use crate::signal::Signals;

pub const N_CELLS: u8 = 32;

/// Cell `n` is held in bit `31 - n`, so that the highest-priority
/// cell is the most significant bit.
fn cell_bit(cell: u8) -> u32 {
    1_u32 << (31 - u32::from(cell))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptMask {
    /// The controller port this mask is assigned to, if any.
    pub port: Option<u8>,
    /// Enabled cells, in the same bit order as the cells themselves.
    pub enabled: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemController {
    cells: u32,
    masks: [InterruptMask; 2],
}

impl Default for SystemController {
    fn default() -> SystemController {
        SystemController {
            cells: 0,
            masks: [
                InterruptMask {
                    port: Some(0),
                    enabled: u32::MAX,
                },
                InterruptMask::default(),
            ],
        }
    }
}

impl SystemController {
    fn visible_to(&self, port: u8) -> u32 {
        self.masks
            .iter()
            .filter(|m| m.port == Some(port))
            .fold(0, |acc, m| acc | m.enabled)
            & self.cells
    }

    pub fn cells(&self) -> u32 {
        self.cells
    }
}

/// Where a processor port is cabled: which controller, and which of
/// its ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLink {
    pub controller: usize,
    pub controller_port: u8,
}

#[derive(Debug)]
pub struct Controllers {
    units: Vec<Mutex<SystemController>>,
    signals: Signals,
}

impl Controllers {
    pub fn new(controllers: usize, processors: usize) -> Controllers {
        Controllers {
            units: (0..controllers)
                .map(|_| Mutex::new(SystemController::default()))
                .collect(),
            signals: Signals::new(processors),
        }
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn count(&self) -> usize {
        self.units.len()
    }

    fn unit(&self, controller: usize) -> Option<MutexGuard<'_, SystemController>> {
        self.units
            .get(controller)
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// A copy of a controller's state, for display.
    pub fn snapshot(&self, controller: usize) -> Option<SystemController> {
        self.unit(controller).map(|unit| unit.clone())
    }

    pub fn set_mask(&self, controller: usize, mask: usize, value: InterruptMask) -> bool {
        match self.unit(controller) {
            Some(mut unit) => match unit.masks.get_mut(mask) {
                Some(m) => {
                    *m = value;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Set an interrupt cell, and wake every processor so that
    /// whichever can see it takes it.
    pub fn post_interrupt(&self, controller: usize, cell: u8) -> bool {
        if cell >= N_CELLS {
            event!(Level::ERROR, "interrupt cell {cell} does not exist");
            return false;
        }
        match self.unit(controller) {
            Some(mut unit) => {
                unit.cells |= cell_bit(cell);
            }
            None => {
                event!(
                    Level::ERROR,
                    "cannot post interrupt {cell}: there is no controller {controller}"
                );
                return false;
            }
        }
        self.signals.wake_all();
        true
    }

    /// Is any interrupt visible through any of these ports?
    pub fn interrupt_pending(&self, ports: &[PortLink]) -> bool {
        ports.iter().any(|link| {
            self.unit(link.controller)
                .is_some_and(|unit| unit.visible_to(link.controller_port) != 0)
        })
    }

    /// Claim the highest-priority visible interrupt, returning the
    /// absolute address of its trap pair.  Controllers are scanned in
    /// port order.  `None` means another processor got there first
    /// (or the cell was never set).
    pub fn take_highest_interrupt(&self, ports: &[PortLink]) -> Option<Word24> {
        ports.iter().find_map(|link| {
            let mut unit = self.unit(link.controller)?;
            let visible = unit.visible_to(link.controller_port);
            if visible == 0 {
                return None;
            }
            let cell = visible.leading_zeros();
            unit.cells &= !(1_u32 << (31 - cell));
            Some(Word24::truncating(cell * 2))
        })
    }

    /// A connect: raise a connect fault on processor `cpu`.
    pub fn connect(&self, cpu: usize) {
        event!(Level::DEBUG, "connect to cpu {cpu}");
        self.signals.raise_group7(cpu, FaultCode::CON);
    }
}
