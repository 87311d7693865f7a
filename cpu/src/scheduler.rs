//! Driving the processors.
//!
//! There are two ways to run a multiprocessor configuration:
//!
//! - Round robin: one host thread steps each processor in turn.  A
//!   processor waiting in DIS is skipped until its wait expires or
//!   something wakes it.  Only one processor executes at a time, so
//!   memory word locks never contend.
//! - Thread per processor: each processor has a host thread of its
//!   own.  Word locks are real interlocks.
//!
//! Either way, the run ends at the first [`HostStop`].
use std::cmp::Reverse;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use keyed_priority_queue::KeyedPriorityQueue;
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::control::{Activity, Processor};
use crate::memory::WordLocking;
use crate::scu::Controllers;
use crate::stall::HostControls;
use crate::stop::HostStop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchedulingModel {
    #[default]
    RoundRobin,
    ThreadPerProcessor,
}

impl SchedulingModel {
    pub fn word_locking(&self) -> WordLocking {
        match self {
            SchedulingModel::RoundRobin => WordLocking::Uncontended,
            SchedulingModel::ThreadPerProcessor => WordLocking::Interlocked,
        }
    }
}

/// Processors waiting in a DIS instruction, each with the time at
/// which it next needs to run.  The earliest deadline comes first.
type Sleepers = KeyedPriorityQueue<usize, Reverse<Instant>>;

pub fn run_round_robin(processors: &mut [Processor], controllers: &Controllers) -> HostStop {
    let signals = controllers.signals();
    let mut sleepers = Sleepers::new();
    loop {
        if signals.any().take() {
            // Whatever happened may end somebody's wait.
            sleepers = Sleepers::new();
        }
        let now = Instant::now();
        let mut ran = false;
        for cpu in processors.iter_mut() {
            let index = cpu.index();
            let deadline = sleepers.get_priority(&index).map(|Reverse(t)| *t);
            if let Some(until) = deadline {
                if until > now {
                    continue;
                }
                sleepers.remove(&index);
            }
            if let Some(signal) = signals.processor(index) {
                signal.take();
            }
            match cpu.step() {
                Ok(Activity::Ran) => {
                    ran = true;
                }
                Ok(Activity::Delayed(wait)) => {
                    sleepers.push(index, Reverse(now + wait));
                }
                Err(stop) => {
                    event!(Level::INFO, "cpu {index} stopped: {stop}");
                    return stop;
                }
            }
        }
        if !ran {
            let earliest = sleepers.peek().map(|(_, Reverse(t))| *t);
            if let Some(until) = earliest {
                let wait = until.saturating_duration_since(Instant::now());
                event!(Level::TRACE, "all processors waiting; idle for {wait:?}");
                if signals.any().wait_timeout(wait) {
                    sleepers = Sleepers::new();
                }
            }
        }
    }
}

fn run_one(cpu: &mut Processor, controllers: &Controllers) -> HostStop {
    let index = cpu.index();
    let signal = controllers.signals().processor(index);
    loop {
        match cpu.step() {
            Ok(Activity::Ran) => (),
            Ok(Activity::Delayed(wait)) => match signal {
                Some(signal) => {
                    signal.wait_timeout(wait);
                }
                None => thread::sleep(wait),
            },
            Err(stop) => return stop,
        }
    }
}

/// Run each processor on a thread of its own.  The first processor to
/// stop asks the others to stop too.  The result is the first stop
/// which was not simply a response to that request.
pub fn run_threaded(
    processors: &mut [Processor],
    controllers: &Controllers,
    host: &HostControls,
) -> HostStop {
    let first: Mutex<Option<HostStop>> = Mutex::new(None);
    thread::scope(|s| {
        for cpu in processors.iter_mut() {
            let first = &first;
            s.spawn(move || {
                let index = cpu.index();
                let stop = run_one(cpu, controllers);
                event!(Level::INFO, "cpu {index} stopped: {stop}");
                {
                    let mut slot = first.lock().unwrap_or_else(PoisonError::into_inner);
                    let replace = match slot.as_ref() {
                        None => true,
                        Some(HostStop::OperatorStop) => stop != HostStop::OperatorStop,
                        Some(_) => false,
                    };
                    if replace {
                        *slot = Some(stop);
                    }
                }
                host.request_stop();
                controllers.signals().wake_all();
            });
        }
    });
    first
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .unwrap_or(HostStop::OperatorStop)
}

#[test]
fn test_word_locking_follows_model() {
    assert_eq!(
        SchedulingModel::RoundRobin.word_locking(),
        WordLocking::Uncontended
    );
    assert_eq!(
        SchedulingModel::ThreadPerProcessor.word_locking(),
        WordLocking::Interlocked
    );
}
