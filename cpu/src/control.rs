//! The instruction cycle engine.
//!
//! Each call to [`Processor::step`] performs one machine cycle.  The
//! cycle is one of:
//!
//! - FETCH: decide whether to take an interrupt or group 7 fault,
//!   check for lockup, then fetch the instruction at the instruction
//!   counter.
//! - PSEUDO_FETCH: as FETCH, but never samples.  A transfer is
//!   followed by one of these.
//! - EXEC: execute the current instruction.
//! - FAULT, INTERRUPT: save the control unit state, enter temporary
//!   absolute mode and load the trap pair.
//! - FAULT_EXEC, INTERRUPT_EXEC: execute the two instructions of the
//!   trap pair.
//! - SYNC_FAULT_RETURN: resume after a fault handler restored the
//!   control unit.
//!
//! A fault never unwinds out of the engine.  Whatever raised it
//! returns `Err(Fault)` to the cycle which was running, and that
//! cycle sets the next state to FAULT.  The only things which escape
//! from [`Processor::step`] are [`HostStop`]s.
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{event, span, Level};

use base::prelude::*;

use crate::addressing::{AddressMode, AddressTranslator, FlatTranslator};
use crate::arbiter;
use crate::config::ProcessorConfig;
use crate::diagnostics::CurrentInstructionDiagnostics;
use crate::executor::{
    opcodes, DecodedInstruction, Decoder, ExecutionContext, Executor, IoPoll, Outcome,
    StandardDecoder,
};
use crate::fault::{Fault, FaultCode, FaultSubtype, N_FAULTS};
use crate::memory::{MemoryAccess, SharedMemory, WordLocking};
use crate::memorymap::BankMap;
use crate::registers::{ControlUnit, Registers, SafeStore};
use crate::scu::{Controllers, PortLink};
use crate::stall::HostControls;
use crate::stop::HostStop;
use crate::timer::{LockupCheck, LockupMonitor, TimerUpdate};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cycle {
    Fetch,
    PseudoFetch,
    Exec,
    Fault,
    FaultExec,
    Interrupt,
    InterruptExec,
    SyncFaultReturn,
}

const ALL_CYCLES: [Cycle; 8] = [
    Cycle::Fetch,
    Cycle::PseudoFetch,
    Cycle::Exec,
    Cycle::Fault,
    Cycle::FaultExec,
    Cycle::Interrupt,
    Cycle::InterruptExec,
    Cycle::SyncFaultReturn,
];

impl Cycle {
    pub const fn name(&self) -> &'static str {
        match self {
            Cycle::Fetch => "FETCH",
            Cycle::PseudoFetch => "PSEUDO_FETCH",
            Cycle::Exec => "EXEC",
            Cycle::Fault => "FAULT",
            Cycle::FaultExec => "FAULT_EXEC",
            Cycle::Interrupt => "INTERRUPT",
            Cycle::InterruptExec => "INTERRUPT_EXEC",
            Cycle::SyncFaultReturn => "SYNC_FAULT_RETURN",
        }
    }

    pub fn in_trap_pair(&self) -> bool {
        matches!(self, Cycle::FaultExec | Cycle::InterruptExec)
    }
}

impl Display for Cycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCycle(pub String);

impl Display for UnknownCycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "there is no cycle named '{}'", self.0)
    }
}

impl std::error::Error for UnknownCycle {}

impl TryFrom<&str> for Cycle {
    type Error = UnknownCycle;
    fn try_from(s: &str) -> Result<Cycle, UnknownCycle> {
        ALL_CYCLES
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCycle(s.to_owned()))
    }
}

/// What a processor did in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Ran,
    /// The processor is waiting in a DIS instruction and has nothing
    /// to do for up to this long, unless woken.
    Delayed(Duration),
}

/// The resources a processor shares with the rest of the system.
#[derive(Debug, Clone)]
pub struct SystemResources {
    pub memory: Arc<SharedMemory>,
    pub controllers: Arc<Controllers>,
    pub host: Arc<HostControls>,
    pub locking: WordLocking,
    pub words_per_controller: usize,
    /// Longest a DIS instruction waits before polling again.
    pub poll_interval: Duration,
    pub poll_every_cycles: u64,
}

/// The processor's collaborators for everything the engine does not
/// do itself.
pub struct ProcessorParts {
    pub decoder: Box<dyn Decoder>,
    pub executor: Box<dyn Executor>,
    pub translator: Box<dyn AddressTranslator>,
}

impl ProcessorParts {
    pub fn standard(executor: Box<dyn Executor>) -> ProcessorParts {
        ProcessorParts {
            decoder: Box::new(StandardDecoder),
            executor,
            translator: Box::new(FlatTranslator),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingFault {
    fault: Fault,
    resume_advance: bool,
}

pub struct Processor {
    index: usize,
    config: ProcessorConfig,
    pub regs: Registers,
    pub cu: ControlUnit,
    cycle: Cycle,
    memory: MemoryAccess,
    controllers: Arc<Controllers>,
    host: Arc<HostControls>,
    ports: Vec<PortLink>,
    words_per_controller: usize,
    lockup: LockupMonitor,
    fault_counts: [u64; N_FAULTS],
    pending_fault: Option<PendingFault>,
    restart: Option<Word24>,
    skip_breakpoint: bool,
    sleeping_since: Option<Instant>,
    cycles: u64,
    cycle_limit: Option<u64>,
    poll_interval: Duration,
    poll_every_cycles: u64,
    poller: Option<Box<dyn IoPoll>>,
    decoder: Box<dyn Decoder>,
    executor: Box<dyn Executor>,
    translator: Box<dyn AddressTranslator>,
}

impl Processor {
    pub fn new(
        index: usize,
        config: ProcessorConfig,
        resources: &SystemResources,
        parts: ProcessorParts,
    ) -> Processor {
        let memory = MemoryAccess::new(
            index,
            Arc::clone(&resources.memory),
            BankMap::identity(0, resources.words_per_controller),
            resources.locking,
        );
        let mut cpu = Processor {
            index,
            config,
            regs: Registers::initial(Default::default()),
            cu: ControlUnit::default(),
            cycle: Cycle::Fetch,
            memory,
            controllers: Arc::clone(&resources.controllers),
            host: Arc::clone(&resources.host),
            ports: Vec::new(),
            words_per_controller: resources.words_per_controller,
            lockup: LockupMonitor::default(),
            fault_counts: [0; N_FAULTS],
            pending_fault: None,
            restart: None,
            skip_breakpoint: false,
            sleeping_since: None,
            cycles: 0,
            cycle_limit: None,
            poll_interval: resources.poll_interval,
            poll_every_cycles: resources.poll_every_cycles.max(1),
            poller: None,
            decoder: parts.decoder,
            executor: parts.executor,
            translator: parts.translator,
        };
        cpu.reset();
        cpu
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryAccess {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryAccess {
        &mut self.memory
    }

    pub fn controllers(&self) -> &Arc<Controllers> {
        &self.controllers
    }

    pub fn fault_count(&self, code: FaultCode) -> u64 {
        self.fault_counts[usize::from(code.number())]
    }

    pub fn set_cycle_limit(&mut self, limit: Option<u64>) {
        self.cycle_limit = limit;
    }

    pub fn set_poller(&mut self, poller: Box<dyn IoPoll>) {
        self.poller = Some(poller);
    }

    /// Replace the switch and tweak settings.  They take effect at the
    /// reset which this performs.
    pub fn configure(&mut self, config: ProcessorConfig) {
        self.config = config;
        self.reset();
    }

    /// Initialize the processor from its switch settings.
    pub fn reset(&mut self) {
        event!(Level::INFO, "cpu {}: reset", self.index);
        let controllers = self.controllers.count();
        let variant = self.config.variant;
        self.config.switches.sanitize(variant, controllers);
        self.ports = self
            .config
            .switches
            .ports
            .iter()
            .filter(|p| p.enabled)
            .filter_map(|p| {
                p.controller.map(|controller| PortLink {
                    controller,
                    controller_port: p.controller_port,
                })
            })
            .collect();
        let map = if self.config.tweaks.use_map {
            BankMap::build(
                self.config.switches.cpu_number,
                variant,
                &self.config.switches.ports,
                self.words_per_controller,
            )
        } else {
            BankMap::identity(self.memory.shared().len(), self.words_per_controller)
        };
        self.memory.unlock_all();
        self.memory.set_map(map);

        self.regs = Registers::initial(self.config.switches.lockup_time);
        self.cu = ControlUnit::default();
        self.lockup.reset();
        self.fault_counts = [0; N_FAULTS];
        self.pending_fault = None;
        self.restart = None;
        self.skip_breakpoint = false;
        self.sleeping_since = None;
        self.cycles = 0;
        // Faults raised for us before the reset are discarded.
        self.controllers.signals().take_group7(self.index);

        if self.config.tweaks.nodis {
            self.cycle = Cycle::Fetch;
        } else {
            let dis = InstructionWord::assemble(Word18::ZERO, opcodes::DIS, false, false, Tag::NONE);
            self.load_instruction(dis.word());
            self.cycle = Cycle::Exec;
        }
    }

    /// Continue at the named cycle, abandoning the current one.  An
    /// unknown name is fatal.
    pub fn reenter(&mut self, name: &str) -> Result<(), HostStop> {
        match Cycle::try_from(name) {
            Ok(cycle) => {
                event!(
                    Level::DEBUG,
                    "cpu {}: re-entering at {} (was {})",
                    self.index,
                    cycle,
                    self.cycle
                );
                self.memory.unlock_all();
                self.cycle = cycle;
                Ok(())
            }
            Err(e) => {
                event!(Level::ERROR, "cpu {}: {}", self.index, e);
                Err(HostStop::Unexpected(e.to_string()))
            }
        }
    }

    /// Start executing the trap pair at `address`, as if a fault had
    /// vectored there.
    pub fn restart_at(&mut self, address: Word24) {
        event!(
            Level::INFO,
            "cpu {}: restart at {:08o}",
            self.index,
            address
        );
        self.memory.unlock_all();
        self.restart = Some(address);
        self.pending_fault = None;
        self.cycle = Cycle::Fault;
    }

    pub fn diagnostics(&self) -> CurrentInstructionDiagnostics {
        CurrentInstructionDiagnostics {
            cpu: self.index,
            cycle: self.cycle,
            segment: self.regs.ppr.psr,
            ic: self.regs.ppr.ic,
            instruction: self.cu.iwb,
        }
    }

    /// Perform one cycle.
    pub fn step(&mut self) -> Result<Activity, HostStop> {
        let span = span!(
            Level::TRACE,
            "cycle",
            cpu = self.index,
            state = self.cycle.name()
        );
        let _enter = span.enter();

        self.housekeeping()?;
        self.advance_timers();
        let activity = self.dispatch()?;
        self.cycles += 1;
        if self.config.tweaks.halt_on_host_error && self.memory.take_violations() > 0 {
            return Err(HostStop::Unexpected(format!(
                "cpu {}: memory lock discipline violation",
                self.index
            )));
        }
        Ok(activity)
    }

    fn housekeeping(&mut self) -> Result<(), HostStop> {
        if self.host.stop_requested() {
            self.memory.unlock_all();
            return Err(HostStop::OperatorStop);
        }
        if let Some(limit) = self.cycle_limit {
            if self.cycles >= limit {
                self.memory.unlock_all();
                return Err(HostStop::CycleLimit);
            }
        }
        if self.index == 0 && self.cycles % self.poll_every_cycles == 0 {
            if let Some(poller) = self.poller.as_mut() {
                poller.poll(&self.controllers);
            }
        }
        if matches!(self.cycle, Cycle::Fetch | Cycle::PseudoFetch) {
            let ic = self.regs.ppr.ic;
            if self.host.is_breakpoint(ic) && !std::mem::take(&mut self.skip_breakpoint) {
                self.skip_breakpoint = true;
                event!(
                    Level::INFO,
                    "cpu {}: breakpoint at {:06o}",
                    self.index,
                    ic
                );
                return Err(HostStop::Breakpoint);
            }
            if let Some(delay) = self.host.stall_for(self.regs.ppr.psr, ic) {
                event!(
                    Level::DEBUG,
                    "cpu {}: stalling {:?} at {:05o}|{:06o}",
                    self.index,
                    delay,
                    self.regs.ppr.psr,
                    ic
                );
                std::thread::sleep(delay);
            }
        }
        Ok(())
    }

    fn advance_timers(&mut self) {
        if let Some(since) = self.sleeping_since.take() {
            if self.regs.tr.elapse(since.elapsed()) == TimerUpdate::Underflow {
                self.timer_runout();
            }
        }
        if self.regs.tr.decrement(self.config.tweaks.timer_rate) == TimerUpdate::Underflow {
            self.timer_runout();
        }
        self.lockup.advance();
    }

    fn timer_runout(&mut self) {
        if self.config.tweaks.tro_enable {
            event!(Level::TRACE, "cpu {}: timer runout", self.index);
            self.cu.group7.set(FaultCode::TRO);
        }
    }

    /// Is an interrupt or a deliverable group 7 fault pending?
    fn trap_due(&self) -> bool {
        self.cu.group7.pending(self.regs.is_privileged())
            || self.controllers.interrupt_pending(&self.ports)
    }

    fn absorb_group7(&mut self) {
        let preset = self.controllers.signals().take_group7(self.index);
        self.cu.group7.absorb(preset);
    }

    fn dispatch(&mut self) -> Result<Activity, HostStop> {
        event!(
            Level::TRACE,
            "{} at {:05o}|{:06o}",
            self.cycle,
            self.regs.ppr.psr,
            self.regs.ppr.ic
        );
        match self.cycle {
            Cycle::Fetch => self.fetch_cycle(true)?,
            Cycle::PseudoFetch => self.fetch_cycle(false)?,
            Cycle::Exec | Cycle::FaultExec | Cycle::InterruptExec => return self.exec_cycle(),
            Cycle::Fault => self.fault_cycle()?,
            Cycle::Interrupt => self.interrupt_cycle()?,
            Cycle::SyncFaultReturn => self.sync_fault_return(),
        }
        Ok(Activity::Ran)
    }

    fn load_instruction(&mut self, word: Word36) {
        let iwb = InstructionWord::from(word);
        self.cu.iwb = iwb;
        self.cu.current = self.decoder.decode(iwb);
        if self.cu.current.inhibit {
            self.cu.was_inhibited = true;
        }
    }

    fn fetch_cycle(&mut self, sample: bool) -> Result<(), HostStop> {
        self.absorb_group7();
        self.cu.trouble_fault = false;
        let privileged = self.regs.is_privileged();
        let sampling = if sample {
            arbiter::decide(&mut self.cu, self.regs.ppr.ic)
        } else {
            arbiter::skip(&mut self.cu);
            false
        };
        if sampling {
            self.lockup.sampled();
            if let Some(code) = self.cu.group7.take(privileged) {
                let subtype = match code {
                    FaultCode::CON => FaultSubtype::ConnectFromPort(0),
                    _ => FaultSubtype::None,
                };
                return self.raise_fault(Fault::new(code, subtype, "sampled at fetch"), false);
            }
            if self.controllers.interrupt_pending(&self.ports) {
                self.cycle = Cycle::Interrupt;
                return Ok(());
            }
        }

        match self.lockup.check(self.regs.lockup_time, privileged) {
            LockupCheck::Fire => {
                return self.raise_fault(
                    Fault::new(FaultCode::LUF, FaultSubtype::None, "instruction lockup"),
                    false,
                );
            }
            LockupCheck::Latched => {
                event!(
                    Level::TRACE,
                    "cpu {}: lockup latched while privileged",
                    self.index
                );
            }
            LockupCheck::Clear => (),
        }

        let ic = self.regs.ppr.ic;
        self.memory.set_ic(ic);
        let segment = self.regs.ppr.psr;
        let fetched = self
            .regs
            .final_address(self.translator.as_mut(), segment, ic)
            .and_then(|address| self.memory.read(address));
        match fetched {
            Ok(word) => {
                self.load_instruction(word);
                self.cycle = Cycle::Exec;
                Ok(())
            }
            Err(fault) => self.raise_fault(fault, false),
        }
    }

    fn exec_cycle(&mut self) -> Result<Activity, HostStop> {
        let inst = self.cu.current;
        let outcome = {
            let mut ctx = ExecutionContext {
                cpu: self.index,
                regs: &mut self.regs,
                cu: &mut self.cu,
                memory: &mut self.memory,
                controllers: self.controllers.as_ref(),
                translator: self.translator.as_mut(),
            };
            self.executor.execute(&mut ctx, &inst)
        };
        match outcome {
            Err(fault) => self.raise_fault(fault, true)?,
            Ok(Outcome::Continue) => self.complete(&inst),
            Ok(Outcome::Transfer) => self.transfer(&inst),
            Ok(Outcome::Return) => self.fault_return(),
            Ok(Outcome::ExecuteIndirect { even, odd }) => {
                if self.cu.xec_origin.is_none() {
                    if self.cycle == Cycle::Exec {
                        arbiter::note_indirect_execution(&mut self.cu, self.regs.ppr.ic);
                    }
                    self.cu.xec_origin = Some(inst);
                }
                self.cu.xed_odd = odd;
                self.load_instruction(even);
            }
            Ok(Outcome::BeginRepeat) => {
                if !self.cu.repeating && self.cycle == Cycle::Exec {
                    arbiter::note_indirect_execution(&mut self.cu, self.regs.ppr.ic);
                }
                self.cu.repeating = true;
            }
            Ok(Outcome::Delay) => return Ok(self.delay(&inst)),
            Ok(Outcome::HostStop(code)) => {
                self.complete(&inst);
                event!(
                    Level::INFO,
                    "{}: executor stop, code {}",
                    self.diagnostics(),
                    code
                );
                return Err(HostStop::ExecutorStop(code));
            }
            Ok(Outcome::Error(why)) => {
                event!(
                    Level::ERROR,
                    "{}: instruction executor error: {}",
                    self.diagnostics(),
                    why
                );
                if self.config.tweaks.halt_on_host_error {
                    return Err(HostStop::Unexpected(why));
                }
                self.complete(&inst);
            }
        }
        Ok(Activity::Ran)
    }

    /// The instruction finished without transferring control.
    fn complete(&mut self, inst: &DecodedInstruction) {
        self.cu.was_transfer = false;
        self.cu.repeating = false;
        let mut length = inst.length();
        if let Some(origin) = self.cu.xec_origin {
            if let Some(odd) = self.cu.xed_odd.take() {
                self.load_instruction(odd);
                return;
            }
            // The XEC or XED itself is now complete.
            self.cu.xec_origin = None;
            length = origin.length();
        }
        if self.cycle.in_trap_pair() {
            match self.cu.trap_odd.take() {
                Some(odd) => self.load_instruction(odd),
                None => self.trap_pair_complete(),
            }
            return;
        }
        self.regs.ppr.ic = self.regs.ppr.ic.wrapping_add(length);
        self.cycle = Cycle::Fetch;
    }

    /// A trap pair finished without transferring control: go back to
    /// where we were.
    fn trap_pair_complete(&mut self) {
        let appended = self.regs.leave_temporary_absolute();
        match self.cu.safe_store.take() {
            Some(saved) => {
                self.regs.ppr = saved.ppr;
                if saved.resume_advance {
                    let faulted = self.decoder.decode(saved.iwb);
                    self.regs.ppr.ic = self.regs.ppr.ic.wrapping_add(faulted.length());
                }
                let mode = if appended { AddressMode::Append } else { saved.mode };
                self.regs.set_address_mode(mode);
                self.regs.ir.not_bar = saved.ir.not_bar;
            }
            None => {
                event!(
                    Level::ERROR,
                    "{}: trap pair completed but nothing was saved on entry",
                    self.diagnostics()
                );
            }
        }
        self.cycle = Cycle::Fetch;
    }

    fn transfer(&mut self, inst: &DecodedInstruction) {
        self.cu.xec_origin = None;
        self.cu.xed_odd = None;
        self.cu.repeating = false;
        self.cu.was_transfer = true;
        if self.cycle.in_trap_pair() {
            self.cu.trap_odd = None;
            self.cu.safe_store = None;
            if !self.regs.leave_temporary_absolute() {
                self.regs.set_address_mode(AddressMode::Absolute);
            }
            self.regs.ir.not_bar = !inst.flags.enters_bar;
        }
        self.cycle = Cycle::PseudoFetch;
    }

    /// The executor restored the control unit from a safe-store
    /// (typically `rcu` at the end of a fault handler).
    fn fault_return(&mut self) {
        self.cu.xec_origin = None;
        self.cu.xed_odd = None;
        self.cu.trap_odd = None;
        self.cu.safe_store = None;
        if self.cycle.in_trap_pair() {
            self.regs.leave_temporary_absolute();
        }
        self.cycle = Cycle::SyncFaultReturn;
    }

    fn sync_fault_return(&mut self) {
        let restored = self.decoder.decode(self.cu.iwb);
        self.regs.ppr.ic = self.regs.ppr.ic.wrapping_add(restored.length());
        self.cycle = Cycle::Fetch;
    }

    fn delay(&mut self, inst: &DecodedInstruction) -> Activity {
        self.absorb_group7();
        self.lockup.sampled();
        if !self.config.tweaks.dis_enable || self.trap_due() {
            self.complete(inst);
            self.cu.after_dis = true;
            return Activity::Ran;
        }
        let mut wait = self.poll_interval;
        if self.config.tweaks.tro_enable {
            wait = wait.min(self.regs.tr.time_to_underflow());
        }
        self.sleeping_since = Some(Instant::now());
        Activity::Delayed(wait)
    }

    /// Arrange for `fault` to be delivered in the next cycle.
    /// `resume_advance` says whether, if the trap pair does not
    /// transfer, execution resumes after the current instruction (as
    /// opposed to at it).
    fn raise_fault(&mut self, fault: Fault, resume_advance: bool) -> Result<(), HostStop> {
        self.memory.unlock_all();
        let fault = if matches!(self.cycle, Cycle::Fault | Cycle::FaultExec) {
            if self.cu.trouble_fault && !self.trap_due() && !self.config.tweaks.isolts_mode {
                event!(
                    Level::ERROR,
                    "{}: fault while handling a trouble fault: {}",
                    self.diagnostics(),
                    fault
                );
                return Err(HostStop::Unexpected(format!(
                    "cpu {}: trouble fault cascade ({})",
                    self.index, fault
                )));
            }
            Fault::new(
                FaultCode::TRB,
                FaultSubtype::None,
                format!("fault while servicing a fault: {fault}"),
            )
        } else {
            fault
        };

        self.fault_counts[usize::from(fault.code.number())] += 1;
        if self.config.tweaks.report_faults {
            event!(Level::INFO, "{}: {}", self.diagnostics(), fault);
        } else {
            event!(Level::DEBUG, "{}: {}", self.diagnostics(), fault);
        }
        if self.config.tweaks.halt_on_unimplemented && fault.subtype == FaultSubtype::IllegalOpcode {
            return Err(HostStop::Unexpected(format!("unimplemented instruction: {fault}")));
        }
        if self.config.tweaks.drl_fatal && fault.code == FaultCode::DRL {
            return Err(HostStop::Unexpected(format!("derail: {fault}")));
        }

        self.cu.trouble_fault = fault.code == FaultCode::TRB;
        self.pending_fault = Some(PendingFault {
            fault,
            resume_advance,
        });
        self.cycle = Cycle::Fault;
        Ok(())
    }

    /// Capture the state to return to when the trap pair completes.
    /// A fault taken while already in temporary absolute mode keeps
    /// the state saved by the outer trap, since the current registers
    /// are those forced on entry to it.
    fn save_state(&mut self, resume_advance: bool) {
        if self.regs.in_temporary_absolute() && self.cu.safe_store.is_some() {
            event!(
                Level::DEBUG,
                "{}: nested trap keeps the outer safe-store",
                self.diagnostics()
            );
        } else {
            self.cu.safe_store = Some(SafeStore {
                ppr: self.regs.ppr,
                ir: self.regs.ir,
                mode: self.regs.address_mode(),
                iwb: self.cu.iwb,
                resume_advance,
            });
        }
        self.regs.enter_temporary_absolute();
        self.regs.ppr.prr = 0;
        self.cu.xec_origin = None;
        self.cu.xed_odd = None;
        self.cu.repeating = false;
    }

    fn load_trap_pair(&mut self, address: Word24, next: Cycle) -> Result<(), HostStop> {
        match self.memory.read_pair(address) {
            Ok((even, odd)) => {
                self.lockup.reset();
                self.cu.trap_odd = Some(odd);
                self.load_instruction(even);
                self.cycle = next;
                Ok(())
            }
            Err(fault) => self.raise_fault(fault, false),
        }
    }

    fn fault_cycle(&mut self) -> Result<(), HostStop> {
        let pending = self.pending_fault.take();
        let address = match (self.restart.take(), &pending) {
            (Some(address), _) => address,
            (None, Some(p)) => p.fault.code.trap_pair_address(self.config.switches.fault_base),
            (None, None) => {
                event!(
                    Level::ERROR,
                    "{}: FAULT cycle with no fault to deliver",
                    self.diagnostics()
                );
                return Err(HostStop::Unexpected(
                    "FAULT cycle with no fault to deliver".to_string(),
                ));
            }
        };
        self.save_state(pending.as_ref().is_some_and(|p| p.resume_advance));
        self.load_trap_pair(address, Cycle::FaultExec)
    }

    fn interrupt_cycle(&mut self) -> Result<(), HostStop> {
        self.save_state(false);
        match self.controllers.take_highest_interrupt(&self.ports) {
            Some(address) => {
                event!(
                    Level::DEBUG,
                    "{}: interrupt, trap pair at {:o}",
                    self.diagnostics(),
                    address
                );
                self.load_trap_pair(address, Cycle::InterruptExec)
            }
            None => {
                // Another processor took it between sampling and now.
                event!(
                    Level::DEBUG,
                    "cpu {}: interrupt no longer pending",
                    self.index
                );
                self.regs.leave_temporary_absolute();
                if let Some(saved) = self.cu.safe_store.take() {
                    self.regs.ppr = saved.ppr;
                    self.regs.ir = saved.ir;
                }
                self.cycle = Cycle::Fetch;
                Ok(())
            }
        }
    }
}
