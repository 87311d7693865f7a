//! This crate implements the instruction cycle of a 36-bit
//! multiprocessor mainframe: the cycle state machine, fault and
//! interrupt arbitration, the shared memory and its word locks, and
//! the scheduling of several processors on the host.
//!
//! Instruction semantics are not here; they are supplied through the
//! [`Executor`] trait.
#![crate_name = "cpu"]

mod addressing;
mod arbiter;
mod config;
mod control;
mod diagnostics;
mod executor;
mod fault;
mod memory;
mod memorymap;
mod registers;
mod scheduler;
mod scu;
mod signal;
mod stall;
mod stop;
mod system;
mod timer;

pub use addressing::{AddressMode, AddressTranslator, BaseAddressRegister, FlatTranslator};
pub use arbiter::{sampling_allowed, Group7, SamplingInputs};
pub use config::{
    ConfigError, PortSwitches, ProcessorConfig, Switches, SystemConfig, Tweaks, Variant,
    MAX_CONTROLLERS, MAX_PORTS, MAX_PROCESSORS,
};
pub use control::{Activity, Cycle, Processor, ProcessorParts, SystemResources, UnknownCycle};
pub use diagnostics::CurrentInstructionDiagnostics;
pub use executor::{
    opcodes, DecodedInstruction, Decoder, ExecutionContext, Executor, InstructionFlags, IoPoll,
    OpcodeClass, Outcome, StandardDecoder,
};
pub use fault::{Fault, FaultCode, FaultGroup, FaultSubtype, N_FAULTS};
pub use memory::{ImageOutOfRange, LockStats, MemoryAccess, SharedMemory, WordLocking};
pub use memorymap::{BankEntry, BankMap, BANK_COUNT, BANK_WORDS};
pub use registers::{ControlUnit, Indicators, ProcedurePointer, Registers, SafeStore};
pub use scheduler::SchedulingModel;
pub use scu::{Controllers, InterruptMask, PortLink, SystemController, N_CELLS};
pub use signal::{Signal, Signals};
pub use stall::{HostControls, NoSuchStallPoint, StallPoint, N_STALL_POINTS};
pub use stop::HostStop;
pub use system::{StopHandle, System};
pub use timer::{LockupCheck, LockupMonitor, LockupTime, TimerRegister, TimerUpdate};
