//! Waking processors which are waiting in a DIS instruction.
//!
//! Each processor has a signal which other threads raise to wake it,
//! and a set of group 7 faults which other threads have asked it to
//! take (a connect, for example).  The processor itself folds those
//! into its own state at the top of each cycle; nothing else touches
//! its registers.
//!
//! There is also one system-wide signal, raised whenever any
//! processor is woken, for the round-robin scheduler which drives all
//! the processors from one thread.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{event, Level};

use crate::fault::FaultCode;

#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        self.cond.notify_all();
    }

    /// Consume the signal if it has been raised.
    pub fn take(&self) -> bool {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *raised)
    }

    /// Wait for the signal for at most `timeout`, consuming it.
    /// Returns true if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut raised, _) = self
            .cond
            .wait_timeout_while(raised, timeout, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *raised)
    }
}

#[derive(Debug, Default)]
struct ProcessorSignal {
    wake: Signal,
    group7_preset: AtomicU32,
}

#[derive(Debug)]
pub struct Signals {
    processors: Vec<ProcessorSignal>,
    any: Signal,
}

impl Signals {
    pub fn new(processors: usize) -> Signals {
        Signals {
            processors: (0..processors).map(|_| ProcessorSignal::default()).collect(),
            any: Signal::default(),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    pub fn wake(&self, cpu: usize) {
        if let Some(p) = self.processors.get(cpu) {
            p.wake.raise();
        }
        self.any.raise();
    }

    pub fn wake_all(&self) {
        for p in self.processors.iter() {
            p.wake.raise();
        }
        self.any.raise();
    }

    /// Ask processor `cpu` to take a group 7 fault at its next
    /// sampling point.
    pub fn raise_group7(&self, cpu: usize, code: FaultCode) {
        match self.processors.get(cpu) {
            Some(p) if code.is_group7() => {
                p.group7_preset.fetch_or(code.mask_bit(), Ordering::AcqRel);
                self.wake(cpu);
            }
            Some(_) => {
                event!(
                    Level::ERROR,
                    "{} is not a group 7 fault and cannot be raised from outside processor {}",
                    code,
                    cpu
                );
            }
            None => {
                event!(Level::ERROR, "cannot raise {code}: there is no processor {cpu}");
            }
        }
    }

    /// Collect the group 7 faults raised for `cpu` since the last call.
    pub fn take_group7(&self, cpu: usize) -> u32 {
        self.processors
            .get(cpu)
            .map_or(0, |p| p.group7_preset.swap(0, Ordering::AcqRel))
    }

    pub fn processor(&self, cpu: usize) -> Option<&Signal> {
        self.processors.get(cpu).map(|p| &p.wake)
    }

    pub fn any(&self) -> &Signal {
        &self.any
    }
}
