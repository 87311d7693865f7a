use std::sync::Arc;
use std::time::Duration;

use base::prelude::*;

use super::{Activity, Cycle, Processor, ProcessorParts, SystemResources};
use crate::addressing::AddressMode;
use crate::config::{PortSwitches, ProcessorConfig, Switches, Tweaks};
use crate::executor::{opcodes, DecodedInstruction, ExecutionContext, Executor, Outcome};
use crate::fault::{Fault, FaultCode, FaultSubtype};
use crate::memory::{SharedMemory, WordLocking};
use crate::memorymap::BANK_WORDS;
use crate::scu::{Controllers, PortLink};
use crate::stall::HostControls;
use crate::stop::HostStop;
use crate::timer::LockupTime;

const RCU: Opcode = Opcode::basic(Word9::truncating(0o613));
const STAC: Opcode = Opcode::basic(Word9::truncating(0o354));
const DRL: Opcode = Opcode::basic(Word9::truncating(0o002));
const STOP: Opcode = Opcode::basic(Word9::truncating(0o777));
const CONFUSED: Opcode = Opcode::basic(Word9::truncating(0o776));

const PROGRAM: u32 = 0o1000;

/// Just enough of an instruction set to drive the cycle engine.
struct TestExecutor;

impl Executor for TestExecutor {
    fn execute(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        inst: &DecodedInstruction,
    ) -> Result<Outcome, Fault> {
        let y = inst.word.address();
        match inst.opcode {
            opcodes::NOP => Ok(Outcome::Continue),
            opcodes::TRA | opcodes::TSS => {
                ctx.regs.ppr.ic = y;
                Ok(Outcome::Transfer)
            }
            opcodes::DIS => Ok(Outcome::Delay),
            opcodes::LDA => {
                ctx.regs.a = ctx.read_operand(y)?;
                Ok(Outcome::Continue)
            }
            opcodes::STA => {
                let a = ctx.regs.a;
                ctx.write_operand(y, a)?;
                Ok(Outcome::Continue)
            }
            opcodes::XEC => Ok(Outcome::ExecuteIndirect {
                even: ctx.read_operand(y)?,
                odd: None,
            }),
            opcodes::XED => {
                let even = y.and(!1);
                Ok(Outcome::ExecuteIndirect {
                    even: ctx.read_operand(even)?,
                    odd: Some(ctx.read_operand(even | Word18::ONE)?),
                })
            }
            opcodes::RPT => {
                if !ctx.cu.repeating {
                    return Ok(Outcome::BeginRepeat);
                }
                ctx.regs.x[0] = ctx.regs.x[0].wrapping_sub(Word18::ONE);
                if ctx.regs.x[0].is_zero() {
                    Ok(Outcome::Continue)
                } else {
                    Ok(Outcome::BeginRepeat)
                }
            }
            RCU => match ctx.cu.safe_store.clone() {
                Some(saved) => {
                    ctx.regs.ppr = saved.ppr;
                    ctx.cu.iwb = saved.iwb;
                    Ok(Outcome::Return)
                }
                None => Ok(Outcome::Error("nothing to restore".to_string())),
            },
            DRL => Err(Fault::new(FaultCode::DRL, FaultSubtype::None, "derail")),
            STAC => {
                ctx.memory.read_lock(Word24::from(y))?;
                Err(Fault::new(
                    FaultCode::STR,
                    FaultSubtype::None,
                    "fault part way through a read-modify-write",
                ))
            }
            STOP => Ok(Outcome::HostStop(7)),
            CONFUSED => Ok(Outcome::Error("confused".to_string())),
            _ => Err(Fault::illegal_opcode(inst.opcode)),
        }
    }
}

fn inst(op: Opcode, address: u32) -> Word36 {
    InstructionWord::assemble(Word18::truncating(address), op, false, false, Tag::NONE).word()
}

fn test_tweaks() -> Tweaks {
    Tweaks {
        nodis: true,
        tro_enable: false,
        ..Tweaks::default()
    }
}

struct Rig {
    cpu: Processor,
    resources: SystemResources,
}

impl Rig {
    fn new(tweaks: Tweaks) -> Rig {
        let resources = SystemResources {
            memory: Arc::new(SharedMemory::new(BANK_WORDS)),
            controllers: Arc::new(Controllers::new(1, 1)),
            host: Arc::new(HostControls::default()),
            locking: WordLocking::Uncontended,
            words_per_controller: BANK_WORDS,
            poll_interval: Duration::from_millis(1),
            poll_every_cycles: 1,
        };
        let config = ProcessorConfig {
            switches: Switches {
                ports: vec![PortSwitches {
                    enabled: true,
                    store_size: 0,
                    controller: Some(0),
                    ..PortSwitches::default()
                }],
                ..Switches::default()
            },
            tweaks,
            ..ProcessorConfig::default()
        };
        let mut cpu = Processor::new(
            0,
            config,
            &resources,
            ProcessorParts::standard(Box::new(TestExecutor)),
        );
        cpu.regs.ppr.ic = Word18::truncating(PROGRAM);
        Rig { cpu, resources }
    }

    fn poke(&self, address: u32, words: &[Word36]) {
        self.resources
            .memory
            .load(address as usize, words)
            .expect("test program should fit in memory");
    }

    fn peek(&self, address: u32) -> Word36 {
        self.resources
            .memory
            .peek(address as usize)
            .expect("address should be in memory")
    }

    fn step(&mut self) -> Activity {
        match self.cpu.step() {
            Ok(activity) => activity,
            Err(stop) => panic!("unexpected stop in {} cycle: {stop}", self.cpu.cycle()),
        }
    }

    fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    fn unprivileged(&mut self) {
        self.cpu.regs.set_address_mode(AddressMode::Append);
        self.cpu.regs.ppr.privileged = false;
    }

    fn ic(&self) -> u32 {
        self.cpu.regs.ppr.ic.bits()
    }
}

fn trap_pair(code: FaultCode) -> u32 {
    code.trap_pair_address(0).bits()
}

#[test]
fn test_cycle_names() {
    assert_eq!(Cycle::try_from("pseudo_fetch"), Ok(Cycle::PseudoFetch));
    assert_eq!(Cycle::try_from("FAULT_EXEC"), Ok(Cycle::FaultExec));
    assert!(Cycle::try_from("LUNCH").is_err());
    assert_eq!(Cycle::SyncFaultReturn.to_string(), "SYNC_FAULT_RETURN");
}

#[test]
fn test_ordinary_instruction_advances_ic() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::NOP, 0)]);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Absolute);
    assert!(!rig.cpu.regs.bar_mode());
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
}

#[test]
fn test_dis_waits_without_leaving_exec() {
    let mut rig = Rig::new(Tweaks {
        nodis: false,
        ..test_tweaks()
    });
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    assert_eq!(rig.cpu.cu.current.opcode, opcodes::DIS);
    for _ in 0..2 {
        assert_eq!(rig.step(), Activity::Delayed(Duration::from_millis(1)));
        assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    }
}

#[test]
fn test_dis_sleep_is_bounded_by_timer() {
    let mut rig = Rig::new(Tweaks {
        nodis: false,
        tro_enable: true,
        ..test_tweaks()
    });
    rig.cpu.regs.tr.load(Word27::truncating(63));
    match rig.step() {
        Activity::Delayed(d) => assert!(d <= Duration::from_micros(125), "slept {d:?}"),
        Activity::Ran => panic!("DIS should have waited"),
    }
}

#[test]
fn test_disabled_dis_completes_at_once() {
    let mut rig = Rig::new(Tweaks {
        dis_enable: false,
        ..test_tweaks()
    });
    rig.poke(PROGRAM, &[inst(opcodes::DIS, 0)]);
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
    assert!(rig.cpu.cu.after_dis);
}

#[test]
fn test_interrupt_wakes_dis() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::DIS, 0)]);
    // Cell 5's trap pair.
    rig.poke(0o12, &[inst(opcodes::TRA, 0o2000), inst(opcodes::NOP, 0)]);
    rig.step();
    assert!(matches!(rig.step(), Activity::Delayed(_)));
    assert!(rig.resources.controllers.post_interrupt(0, 5));
    assert_eq!(rig.step(), Activity::Ran);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
    // The instruction after a DIS is a sampling point even at an odd
    // address.
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Interrupt);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::InterruptExec);
    assert!(rig.cpu.regs.in_temporary_absolute());
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::PseudoFetch);
    assert_eq!(rig.ic(), 0o2000);
    assert!(!rig.cpu.regs.in_temporary_absolute());
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Absolute);
    assert!(rig.cpu.cu.safe_store.is_none());
}

#[test]
fn test_vanished_interrupt_restores_state() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::NOP, 0)]);
    rig.unprivileged();
    assert!(rig.resources.controllers.post_interrupt(0, 3));
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Interrupt);
    // Someone else takes it first.
    let port = PortLink {
        controller: 0,
        controller_port: 0,
    };
    assert!(rig.resources.controllers.take_highest_interrupt(&[port]).is_some());
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM);
    assert!(!rig.cpu.regs.in_temporary_absolute());
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Append);
    assert!(!rig.cpu.regs.is_privileged());
    assert!(rig.cpu.cu.safe_store.is_none());
}

#[test]
fn test_no_sampling_after_transfer_or_at_odd_address() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::TRA, PROGRAM + 3)]);
    rig.poke(PROGRAM + 3, &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)]);
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::PseudoFetch);
    assert!(rig.resources.controllers.post_interrupt(0, 0));
    rig.steps(2);
    // At PROGRAM+3 (odd) now fetched and executed; the next fetch is
    // even and not after a transfer.
    assert_eq!(rig.ic(), PROGRAM + 4);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Interrupt);
}

#[test]
fn test_inhibit_bit_defers_sampling() {
    let mut rig = Rig::new(test_tweaks());
    let inhibited =
        InstructionWord::assemble(Word18::ZERO, opcodes::NOP, true, false, Tag::NONE).word();
    rig.poke(
        PROGRAM + 1,
        &[inhibited, inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    rig.cpu.regs.ppr.ic = Word18::truncating(PROGRAM + 1);
    rig.steps(2);
    assert!(rig.resources.controllers.post_interrupt(0, 0));
    // PROGRAM+2 is even but follows an inhibited instruction, and
    // PROGRAM+3 is odd.
    for ic in [PROGRAM + 2, PROGRAM + 3] {
        assert_eq!(rig.ic(), ic);
        rig.step();
        assert_eq!(rig.cpu.cycle(), Cycle::Exec);
        rig.step();
    }
    assert_eq!(rig.ic(), PROGRAM + 4);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Interrupt);
}

#[test]
fn test_inhibited_transfer_defers_only_its_target() {
    let mut rig = Rig::new(test_tweaks());
    let inhibited = InstructionWord::assemble(
        Word18::truncating(PROGRAM + 1),
        opcodes::TRA,
        true,
        false,
        Tag::NONE,
    )
    .word();
    rig.poke(
        PROGRAM,
        &[inhibited, inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    rig.step();
    assert!(rig.resources.controllers.post_interrupt(0, 0));
    rig.steps(2);
    assert_eq!(rig.ic(), PROGRAM + 1);
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    assert!(!rig.cpu.cu.was_inhibited);
    rig.step();
    assert_eq!(rig.ic(), PROGRAM + 2);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Interrupt);
}

#[test]
fn test_xec_at_odd_address_defers_sampling() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(
        PROGRAM,
        &[
            inst(opcodes::NOP, 0),
            inst(opcodes::XEC, 0o1500),
            inst(opcodes::NOP, 0),
            inst(opcodes::NOP, 0),
            inst(opcodes::NOP, 0),
        ],
    );
    rig.poke(0o1500, &[inst(opcodes::NOP, 0)]);
    rig.steps(5);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 2);
    assert!(rig.resources.controllers.post_interrupt(0, 0));
    // PROGRAM+2 is even, but follows an XEC at an odd address.
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    rig.steps(3);
    assert_eq!(rig.ic(), PROGRAM + 4);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Interrupt);
}

#[test]
fn test_repeat_at_odd_address_defers_sampling() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM + 1, &[inst(opcodes::RPT, 0), inst(opcodes::NOP, 0)]);
    rig.cpu.regs.ppr.ic = Word18::truncating(PROGRAM + 1);
    rig.cpu.regs.x[0] = Word18::truncating(2);
    rig.steps(4);
    assert!(!rig.cpu.cu.repeating);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 2);
    assert!(rig.resources.controllers.post_interrupt(0, 0));
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
}

#[test]
fn test_group7_fault_beats_interrupt() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::NOP, 0)]);
    rig.poke(
        trap_pair(FaultCode::CON),
        &[inst(opcodes::TRA, 0o3000), inst(opcodes::NOP, 0)],
    );
    rig.resources.controllers.connect(0);
    assert!(rig.resources.controllers.post_interrupt(0, 1));
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::CON), 1);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::FaultExec);
    let port = PortLink {
        controller: 0,
        controller_port: 0,
    };
    assert!(rig.resources.controllers.interrupt_pending(&[port]));
}

#[test]
fn test_timer_runout_waits_for_unprivileged_code() {
    let mut rig = Rig::new(Tweaks {
        tro_enable: true,
        ..test_tweaks()
    });
    rig.poke(PROGRAM, &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)]);
    // The timer starts at zero, so it runs out on the first cycle.
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    assert!(rig.cpu.cu.group7.is_set(FaultCode::TRO));
    rig.step();

    rig.cpu.regs.ppr.ic = Word18::truncating(PROGRAM);
    rig.unprivileged();
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::TRO), 1);
    assert!(!rig.cpu.cu.group7.is_set(FaultCode::TRO));
}

#[test]
fn test_xec_executes_target_then_moves_past_itself() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::XEC, 0o1500)]);
    rig.poke(0o1500, &[inst(opcodes::LDA, 0o1600)]);
    rig.poke(0o1600, &[Word36::truncating(42)]);
    rig.steps(2);
    assert!(rig.cpu.cu.in_xec());
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    rig.step();
    assert_eq!(rig.cpu.regs.a, Word36::truncating(42));
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
    assert!(!rig.cpu.cu.in_xec());
}

#[test]
fn test_xed_executes_both_words() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::XED, 0o1500)]);
    rig.poke(
        0o1500,
        &[inst(opcodes::LDA, 0o1600), inst(opcodes::STA, 0o1601)],
    );
    rig.poke(0o1600, &[Word36::truncating(0o777)]);
    rig.steps(3);
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    assert_eq!(rig.ic(), PROGRAM);
    rig.step();
    assert_eq!(rig.peek(0o1601), Word36::truncating(0o777));
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
}

#[test]
fn test_transfer_in_xed_abandons_odd_word() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::XED, 0o1500)]);
    rig.poke(
        0o1500,
        &[inst(opcodes::TRA, 0o2000), inst(opcodes::STA, 0o1601)],
    );
    rig.steps(3);
    assert_eq!(rig.cpu.cycle(), Cycle::PseudoFetch);
    assert_eq!(rig.ic(), 0o2000);
    assert!(!rig.cpu.cu.in_xec());
    assert!(rig.cpu.cu.xed_odd.is_none());
}

#[test]
fn test_repeat_runs_until_done() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::RPT, 0)]);
    rig.cpu.regs.x[0] = Word18::truncating(3);
    rig.steps(2);
    assert!(rig.cpu.cu.repeating);
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    rig.step();
    assert!(rig.cpu.regs.x[0].is_zero());
    assert!(!rig.cpu.cu.repeating);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
}

#[test]
fn test_fault_pair_without_transfer_resumes_after_faulting_instruction() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(
        trap_pair(FaultCode::DRL),
        &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    rig.unprivileged();
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::DRL), 1);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::FaultExec);
    assert!(rig.cpu.regs.is_privileged());
    assert_eq!(rig.cpu.regs.ppr.prr, 0);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::FaultExec);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Append);
    assert!(!rig.cpu.regs.is_privileged());
}

#[test]
fn test_fetch_fault_resumes_at_same_instruction() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(
        trap_pair(FaultCode::STR),
        &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    rig.cpu.regs.ir.not_bar = false;
    rig.cpu.regs.bar.bound = Word9::ONE;
    assert!(rig.cpu.regs.bar_mode());
    // 01000 is past a 512-word bound.
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::STR), 1);
    rig.steps(3);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM);
    assert!(rig.cpu.regs.bar_mode());
}

#[test]
fn test_transfer_out_of_fault_pair_enters_absolute_mode() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(
        trap_pair(FaultCode::DRL),
        &[inst(opcodes::TRA, 0o4000), inst(opcodes::NOP, 0)],
    );
    rig.unprivileged();
    rig.steps(4);
    assert_eq!(rig.cpu.cycle(), Cycle::PseudoFetch);
    assert_eq!(rig.ic(), 0o4000);
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Absolute);
    assert!(!rig.cpu.regs.bar_mode());
    assert!(rig.cpu.cu.safe_store.is_none());
    assert!(rig.cpu.cu.trap_odd.is_none());
}

#[test]
fn test_tss_out_of_fault_pair_enters_bar_mode() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(
        trap_pair(FaultCode::DRL),
        &[inst(opcodes::TSS, 0o100), inst(opcodes::NOP, 0)],
    );
    rig.steps(4);
    assert_eq!(rig.cpu.cycle(), Cycle::PseudoFetch);
    assert!(rig.cpu.regs.bar_mode());
}

#[test]
fn test_fault_handler_return() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(
        trap_pair(FaultCode::DRL),
        &[inst(RCU, 0), inst(opcodes::NOP, 0)],
    );
    rig.steps(4);
    assert_eq!(rig.cpu.cycle(), Cycle::SyncFaultReturn);
    assert!(!rig.cpu.regs.in_temporary_absolute());
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
}

#[test]
fn test_fault_in_fault_pair_becomes_trouble() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(trap_pair(FaultCode::DRL), &[inst(DRL, 0), inst(opcodes::NOP, 0)]);
    rig.poke(
        trap_pair(FaultCode::TRB),
        &[inst(opcodes::TRA, 0o5000), inst(opcodes::NOP, 0)],
    );
    rig.steps(4);
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::DRL), 1);
    assert_eq!(rig.cpu.fault_count(FaultCode::TRB), 1);
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::PseudoFetch);
    assert_eq!(rig.ic(), 0o5000);
}

#[test]
fn test_trouble_pair_without_transfer_restores_original_state() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(trap_pair(FaultCode::DRL), &[inst(DRL, 0), inst(opcodes::NOP, 0)]);
    rig.poke(
        trap_pair(FaultCode::TRB),
        &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    rig.unprivileged();
    rig.cpu.regs.ppr.prr = 4;
    rig.steps(7);
    assert_eq!(rig.cpu.fault_count(FaultCode::TRB), 1);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM + 1);
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Append);
    assert!(!rig.cpu.regs.is_privileged());
    assert_eq!(rig.cpu.regs.ppr.prr, 4);
}

#[test]
fn test_fault_in_interrupt_pair_restores_interrupted_state() {
    let mut rig = Rig::new(test_tweaks());
    let illegal = Opcode::basic(Word9::truncating(0o775));
    rig.poke(PROGRAM, &[inst(opcodes::NOP, 0)]);
    // Cell 3's trap pair.
    rig.poke(0o6, &[inst(illegal, 0), inst(opcodes::NOP, 0)]);
    rig.poke(
        trap_pair(FaultCode::IPR),
        &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    rig.unprivileged();
    rig.cpu.regs.ppr.prr = 4;
    assert!(rig.resources.controllers.post_interrupt(0, 3));
    rig.steps(3);
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::IPR), 1);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::FaultExec);
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM);
    assert!(!rig.cpu.regs.in_temporary_absolute());
    assert_eq!(rig.cpu.regs.address_mode(), AddressMode::Append);
    assert!(!rig.cpu.regs.is_privileged());
    assert_eq!(rig.cpu.regs.ppr.prr, 4);
    assert!(rig.cpu.cu.safe_store.is_none());
}

#[test]
fn test_trouble_fault_cascade_stops_engine() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(trap_pair(FaultCode::DRL), &[inst(DRL, 0), inst(opcodes::NOP, 0)]);
    rig.poke(trap_pair(FaultCode::TRB), &[inst(DRL, 0), inst(opcodes::NOP, 0)]);
    rig.steps(5);
    assert_eq!(rig.cpu.cycle(), Cycle::FaultExec);
    match rig.cpu.step() {
        Err(HostStop::Unexpected(why)) => assert!(why.contains("trouble"), "{why}"),
        other => panic!("expected the engine to stop, got {other:?}"),
    }
}

#[test]
fn test_trouble_fault_cascade_continues_under_test_suite() {
    let mut rig = Rig::new(Tweaks {
        isolts_mode: true,
        ..test_tweaks()
    });
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.poke(trap_pair(FaultCode::DRL), &[inst(DRL, 0), inst(opcodes::NOP, 0)]);
    rig.poke(trap_pair(FaultCode::TRB), &[inst(DRL, 0), inst(opcodes::NOP, 0)]);
    rig.steps(6);
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::TRB), 2);
}

#[test]
fn test_lock_released_on_fault() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(STAC, 0o1700)]);
    rig.step();
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert!(!rig.cpu.memory().holds_lock());
    assert!(!rig.resources.memory.is_locked(0o1700));
}

#[test]
fn test_illegal_opcode_faults() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(Opcode::basic(Word9::truncating(0o123)), 0)]);
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::IPR), 1);
}

#[test]
fn test_halt_on_unimplemented() {
    let mut rig = Rig::new(Tweaks {
        halt_on_unimplemented: true,
        ..test_tweaks()
    });
    rig.poke(PROGRAM, &[inst(Opcode::basic(Word9::truncating(0o123)), 0)]);
    rig.step();
    assert!(matches!(rig.cpu.step(), Err(HostStop::Unexpected(_))));
}

#[test]
fn test_drl_fatal() {
    let mut rig = Rig::new(Tweaks {
        drl_fatal: true,
        ..test_tweaks()
    });
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.step();
    assert!(matches!(rig.cpu.step(), Err(HostStop::Unexpected(_))));
}

#[test]
fn test_lockup_fault_in_tight_loop() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::TRA, PROGRAM)]);
    rig.unprivileged();
    rig.cpu.regs.lockup_time = LockupTime::Ms2;
    let mut n = 0;
    while rig.cpu.cycle() != Cycle::Fault {
        rig.step();
        n += 1;
        assert!(n < 5000, "no lockup fault after {n} cycles");
    }
    assert!(n > 2000);
    assert_eq!(rig.cpu.fault_count(FaultCode::LUF), 1);
}

#[test]
fn test_lockup_hard_limit_applies_when_privileged() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::TRA, PROGRAM)]);
    rig.cpu.regs.lockup_time = LockupTime::Ms2;
    assert!(rig.cpu.regs.is_privileged());
    let mut n = 0;
    while rig.cpu.cycle() != Cycle::Fault {
        rig.step();
        n += 1;
        assert!(n < 40000, "no lockup fault after {n} cycles");
    }
    assert!(n > 30000);
    assert_eq!(rig.cpu.fault_count(FaultCode::LUF), 1);
}

#[test]
fn test_restart_at() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(0o40, &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)]);
    rig.cpu.restart_at(Word24::truncating(0o40));
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::FaultExec);
    assert_eq!(
        rig.cpu.cu.safe_store.as_ref().map(|s| s.resume_advance),
        Some(false)
    );
    rig.steps(2);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.ic(), PROGRAM);
}

#[test]
fn test_reenter() {
    let mut rig = Rig::new(test_tweaks());
    assert_eq!(rig.cpu.reenter("exec"), Ok(()));
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
    assert!(matches!(
        rig.cpu.reenter("elsewhere"),
        Err(HostStop::Unexpected(_))
    ));
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
}

#[test]
fn test_breakpoint_stops_once() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::NOP, 0)]);
    rig.resources.host.set_breakpoint(Word18::truncating(PROGRAM));
    assert_eq!(rig.cpu.step(), Err(HostStop::Breakpoint));
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Exec);
}

#[test]
fn test_operator_stop_and_cycle_limit() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(opcodes::TRA, PROGRAM)]);
    rig.cpu.set_cycle_limit(Some(2));
    rig.steps(2);
    assert_eq!(rig.cpu.step(), Err(HostStop::CycleLimit));
    rig.cpu.set_cycle_limit(None);
    rig.resources.host.request_stop();
    assert_eq!(rig.cpu.step(), Err(HostStop::OperatorStop));
}

#[test]
fn test_executor_stop_completes_instruction() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(STOP, 0)]);
    rig.step();
    assert_eq!(rig.cpu.step(), Err(HostStop::ExecutorStop(7)));
    assert_eq!(rig.ic(), PROGRAM + 1);
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
}

#[test]
fn test_executor_error_handling() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(CONFUSED, 0)]);
    rig.steps(2);
    assert_eq!(rig.ic(), PROGRAM + 1);

    let mut rig = Rig::new(Tweaks {
        halt_on_host_error: true,
        ..test_tweaks()
    });
    rig.poke(PROGRAM, &[inst(CONFUSED, 0)]);
    rig.step();
    assert!(matches!(rig.cpu.step(), Err(HostStop::Unexpected(_))));
}

#[test]
fn test_reset_discards_state() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(PROGRAM, &[inst(DRL, 0)]);
    rig.steps(2);
    assert_eq!(rig.cpu.fault_count(FaultCode::DRL), 1);
    rig.cpu.reset();
    assert_eq!(rig.cpu.cycle(), Cycle::Fetch);
    assert_eq!(rig.cpu.fault_count(FaultCode::DRL), 0);
    assert_eq!(rig.ic(), 0);
    assert_eq!(rig.cpu.cycles(), 0);
    assert!(rig.cpu.regs.is_privileged());
}

#[test]
fn test_unmapped_fetch_faults() {
    let mut rig = Rig::new(test_tweaks());
    rig.poke(
        trap_pair(FaultCode::STR),
        &[inst(opcodes::NOP, 0), inst(opcodes::NOP, 0)],
    );
    // Only the first bank is configured.
    rig.cpu.regs.ppr.ic = Word18::truncating(0o100000);
    rig.step();
    assert_eq!(rig.cpu.cycle(), Cycle::Fault);
    assert_eq!(rig.cpu.fault_count(FaultCode::STR), 1);
}
