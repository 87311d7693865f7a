//! A very small instruction set, enough to exercise the cycle engine
//! from the command line.  Anything else is an illegal procedure
//! fault.
//!
//! There is no operating system to derail to, so `drl` stops the
//! emulator, using its address field as the reason code.
use base::prelude::*;
use cpu::{opcodes, DecodedInstruction, ExecutionContext, Executor, Fault, FaultCode, Outcome};

const DRL: Opcode = Opcode::basic(Word9::truncating(0o002));
const LDT: Opcode = Opcode::basic(Word9::truncating(0o637));

#[derive(Debug, Default)]
pub struct MinimalExecutor;

fn transfer_if(ctx: &mut ExecutionContext<'_>, condition: bool, to: Word18) -> Outcome {
    if condition {
        ctx.regs.ppr.ic = to;
        Outcome::Transfer
    } else {
        Outcome::Continue
    }
}

impl Executor for MinimalExecutor {
    fn execute(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        inst: &DecodedInstruction,
    ) -> Result<Outcome, Fault> {
        let y = inst.word.address();
        match inst.opcode {
            opcodes::NOP => Ok(Outcome::Continue),
            opcodes::TRA => Ok(transfer_if(ctx, true, y)),
            opcodes::TZE => {
                let zero = ctx.regs.ir.zero;
                Ok(transfer_if(ctx, zero, y))
            }
            opcodes::TNZ => {
                let zero = ctx.regs.ir.zero;
                Ok(transfer_if(ctx, !zero, y))
            }
            opcodes::DIS => Ok(Outcome::Delay),
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
            opcodes::LDA => {
                let value = ctx.read_operand(y)?;
                ctx.regs.a = value;
                ctx.regs.ir.zero = value.is_zero();
                ctx.regs.ir.negative = value.bits() >> 35 != 0;
                Ok(Outcome::Continue)
            }
            opcodes::STA => {
                let a = ctx.regs.a;
                ctx.write_operand(y, a)?;
                Ok(Outcome::Continue)
            }
            LDT => {
                let value = ctx.read_operand(y)?;
                ctx.regs.tr.load(Word27::truncating((value.bits() >> 9) as u32));
                ctx.cu.group7.clear_code(FaultCode::TRO);
                Ok(Outcome::Continue)
            }
            DRL => Ok(Outcome::HostStop(y.bits())),
            _ => Err(Fault::illegal_opcode(inst.opcode)),
        }
    }
}
