//! Host-level controls shared by all processors: the stop request,
//! instruction-counter breakpoints and stall points.
//!
//! A stall point makes the processor sleep when it reaches a
//! particular instruction.  It has no counterpart on the real
//! machine; it exists to widen race windows when chasing bugs in
//! multiprocessor software.
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use base::prelude::*;

pub const N_STALL_POINTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallPoint {
    pub segment: Word15,
    pub offset: Word18,
    pub delay: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub struct NoSuchStallPoint(pub usize);

impl Display for NoSuchStallPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "stall point {} does not exist; there are {}",
            self.0, N_STALL_POINTS
        )
    }
}

impl Error for NoSuchStallPoint {}

#[derive(Debug, Clone, Default)]
pub struct StallTable {
    entries: [Option<StallPoint>; N_STALL_POINTS],
}

impl StallTable {
    pub fn set(&mut self, n: usize, point: Option<StallPoint>) -> Result<(), NoSuchStallPoint> {
        let entry = self.entries.get_mut(n).ok_or(NoSuchStallPoint(n))?;
        *entry = point;
        Ok(())
    }

    pub fn lookup(&self, segment: Word15, offset: Word18) -> Option<Duration> {
        self.entries
            .iter()
            .flatten()
            .find(|p| p.segment == segment && p.offset == offset)
            .map(|p| p.delay)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }
}

#[derive(Debug, Default)]
pub struct HostControls {
    stop: AtomicBool,
    breakpoints: RwLock<BTreeSet<Word18>>,
    stalls: RwLock<StallTable>,
}

impl HostControls {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn set_breakpoint(&self, ic: Word18) {
        self.breakpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ic);
    }

    pub fn clear_breakpoint(&self, ic: Word18) -> bool {
        self.breakpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ic)
    }

    pub fn is_breakpoint(&self, ic: Word18) -> bool {
        self.breakpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&ic)
    }

    pub fn set_stall_point(&self, n: usize, point: Option<StallPoint>) -> Result<(), NoSuchStallPoint> {
        self.stalls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(n, point)
    }

    pub fn stall_for(&self, segment: Word15, offset: Word18) -> Option<Duration> {
        let table = self.stalls.read().unwrap_or_else(PoisonError::into_inner);
        if table.is_empty() {
            None
        } else {
            table.lookup(segment, offset)
        }
    }
}
