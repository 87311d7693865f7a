/// Diagnostic information for log messages.
use std::fmt::{Display, Formatter};

use base::prelude::*;

use crate::control::Cycle;

/// CurrentInstructionDiagnostics is only for generating debug
/// information.  They must not be used for control/execution
/// purposes.
///
/// This is built whenever a fault is delivered, so a clone of this
/// struct needs to remain cheap.
#[derive(Debug, Clone, Copy)]
pub struct CurrentInstructionDiagnostics {
    pub cpu: usize,
    pub cycle: Cycle,
    pub segment: Word15,
    pub ic: Word18,
    pub instruction: InstructionWord,
}

impl Display for CurrentInstructionDiagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "cpu {} in {} cycle at {:05o}|{:06o}, instruction {:012o} (opcode {})",
            self.cpu,
            self.cycle,
            self.segment,
            self.ic,
            self.instruction.word(),
            self.instruction.opcode()
        )
    }
}

#[test]
fn test_diagnostics_display() {
    let d = CurrentInstructionDiagnostics {
        cpu: 1,
        cycle: Cycle::Exec,
        segment: Word15::truncating(0o12),
        ic: Word18::truncating(0o100),
        instruction: InstructionWord::from(Word36::truncating(0o000_100_710_000)),
    };
    assert_eq!(
        d.to_string(),
        "cpu 1 in EXEC cycle at 00012|000100, instruction 000100710000 (opcode 710)"
    );
}
