//! Reasons for the engine to stop.
//!
//! Faults are the guest's business and never stop the engine.  A
//! `HostStop` is the host's business: the operator asked for it, a
//! breakpoint was reached, or the emulator found itself in a state it
//! cannot continue from.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStop {
    /// An instruction-counter breakpoint was reached.
    Breakpoint,
    /// The operator (or the embedding program) asked the engine to stop.
    OperatorStop,
    /// A bounded run used up its cycle allowance.
    CycleLimit,
    /// The instruction executor asked for a stop with this reason code.
    ExecutorStop(u32),
    /// An unexpected internal condition.
    Unexpected(String),
}

impl HostStop {
    /// True for stops that indicate the emulator itself is at fault.
    pub fn is_internal_error(&self) -> bool {
        matches!(self, HostStop::Unexpected(_))
    }
}

impl Display for HostStop {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            HostStop::Breakpoint => f.write_str("breakpoint"),
            HostStop::OperatorStop => f.write_str("operator stop"),
            HostStop::CycleLimit => f.write_str("cycle limit reached"),
            HostStop::ExecutorStop(code) => write!(f, "stopped by instruction executor (code {code})"),
            HostStop::Unexpected(why) => write!(f, "unexpected internal condition: {why}"),
        }
    }
}

impl Error for HostStop {}

#[test]
fn test_internal_error_classification() {
    assert!(HostStop::Unexpected("x".to_string()).is_internal_error());
    assert!(!HostStop::Breakpoint.is_internal_error());
    assert_eq!(
        HostStop::ExecutorStop(3).to_string(),
        "stopped by instruction executor (code 3)"
    );
}
