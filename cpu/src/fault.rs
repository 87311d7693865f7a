//! Processor faults.
//!
//! A fault is the processor's synchronous trap.  Faults are the
//! mechanism by which the emulated operating system learns that
//! something went wrong (a store outside the BAR bounds, an illegal
//! opcode, a timer runout), so they never escape the cycle state
//! machine; they are turned into a FAULT cycle which fetches the
//! corresponding trap pair.
//!
//! The fault numbers, groups and priorities follow the processor
//! manual's fault table.  Group 1 has the highest priority and group
//! 7 the lowest.  Group 7 faults are special in that they are not
//! raised by an instruction but are sampled along with interrupts.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use base::prelude::*;

/// The number of fault codes (including the unassigned ones).
pub const N_FAULTS: usize = 32;

/// These acronyms are upper case to follow the mnemonics in the
/// processor documentation.  The long names are given by
/// [`FaultCode::name`].
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum FaultCode {
    SDF = 0,
    STR = 1,
    MME = 2,
    F1 = 3,
    TRO = 4,
    CMD = 5,
    DRL = 6,
    LUF = 7,
    CON = 8,
    PAR = 9,
    IPR = 10,
    ONC = 11,
    SUF = 12,
    OFL = 13,
    DIV = 14,
    EXF = 15,
    DF0 = 16,
    DF1 = 17,
    DF2 = 18,
    DF3 = 19,
    ACV = 20,
    MME2 = 21,
    MME3 = 22,
    MME4 = 23,
    F2 = 24,
    F3 = 25,
    UN1 = 26,
    UN2 = 27,
    UN3 = 28,
    UN4 = 29,
    UN5 = 30,
    TRB = 31,
}

/// Fault groups, from 1 (highest priority) to 7.  Group 7 faults are
/// sampled at the same points as interrupts.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize)]
pub struct FaultGroup(u8);

impl FaultGroup {
    pub const SEVEN: FaultGroup = FaultGroup(7);

    pub fn number(&self) -> u8 {
        self.0
    }
}

impl Display for FaultGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "group {}", self.0)
    }
}

impl FaultCode {
    #[must_use]
    pub const fn all_fault_codes() -> [FaultCode; N_FAULTS] {
        use FaultCode::*;
        [
            SDF, STR, MME, F1, TRO, CMD, DRL, LUF, CON, PAR, IPR, ONC, SUF, OFL, DIV, EXF, DF0,
            DF1, DF2, DF3, ACV, MME2, MME3, MME4, F2, F3, UN1, UN2, UN3, UN4, UN5, TRB,
        ]
    }

    pub const fn number(&self) -> u8 {
        *self as u8
    }

    /// Convert a fault number to a fault code.  Numbers outside the
    /// table are reported as a trouble fault, which is what the
    /// hardware would deliver for a fault it could not identify.
    pub fn from_number_or_trouble(n: u32) -> FaultCode {
        u8::try_from(n)
            .ok()
            .and_then(|n| FaultCode::try_from(n).ok())
            .unwrap_or(FaultCode::TRB)
    }

    /// Bit for this fault in a pending-fault mask.
    pub const fn mask_bit(&self) -> u32 {
        1_u32 << (*self as u8)
    }

    /// The lower-case mnemonic used by the processor documentation.
    pub const fn mnemonic(&self) -> &'static str {
        use FaultCode::*;
        match self {
            SDF => "sdf",
            STR => "str",
            MME => "mme",
            F1 => "f1",
            TRO => "tro",
            CMD => "cmd",
            DRL => "drl",
            LUF => "luf",
            CON => "con",
            PAR => "par",
            IPR => "ipr",
            ONC => "onc",
            SUF => "suf",
            OFL => "ofl",
            DIV => "div",
            EXF => "exf",
            DF0 => "df0",
            DF1 => "df1",
            DF2 => "df2",
            DF3 => "df3",
            ACV => "acv",
            MME2 => "mme2",
            MME3 => "mme3",
            MME4 => "mme4",
            F2 => "f2",
            F3 => "f3",
            UN1 => "un1",
            UN2 => "un2",
            UN3 => "un3",
            UN4 => "un4",
            UN5 => "un5",
            TRB => "trb",
        }
    }

    pub const fn name(&self) -> &'static str {
        use FaultCode::*;
        match self {
            SDF => "Shutdown",
            STR => "Store",
            MME => "Master mode entry 1",
            F1 => "Fault tag 1",
            TRO => "Timer runout",
            CMD => "Command",
            DRL => "Derail",
            LUF => "Lockup",
            CON => "Connect",
            PAR => "Parity",
            IPR => "Illegal procedure",
            ONC => "Operation not complete",
            SUF => "Startup",
            OFL => "Overflow",
            DIV => "Divide check",
            EXF => "Execute",
            DF0 => "Directed fault 0",
            DF1 => "Directed fault 1",
            DF2 => "Directed fault 2",
            DF3 => "Directed fault 3",
            ACV => "Access violation",
            MME2 => "Master mode entry 2",
            MME3 => "Master mode entry 3",
            MME4 => "Master mode entry 4",
            F2 => "Fault tag 2",
            F3 => "Fault tag 3",
            UN1 | UN2 | UN3 | UN4 | UN5 => "Unassigned",
            TRB => "Trouble",
        }
    }

    /// The fault group, or `None` for the unassigned codes.
    pub fn group(&self) -> Option<FaultGroup> {
        use FaultCode::*;
        let g = match self {
            SUF | EXF => 1,
            TRB | ONC => 2,
            OFL | DIV => 3,
            STR | CMD | LUF | PAR => 4,
            MME | F1 | DRL | IPR | MME2 | MME3 | MME4 | F2 | F3 => 5,
            DF0 | DF1 | DF2 | DF3 | ACV => 6,
            SDF | TRO | CON => 7,
            UN1 | UN2 | UN3 | UN4 | UN5 => return None,
        };
        Some(FaultGroup(g))
    }

    /// Priority within the whole table; 1 is the most urgent.
    pub fn priority(&self) -> Option<u8> {
        use FaultCode::*;
        let p = match self {
            SUF => 1,
            EXF => 2,
            TRB => 3,
            ONC => 4,
            LUF => 5,
            DIV => 6,
            OFL => 7,
            PAR => 8,
            CMD => 9,
            STR => 10,
            MME => 11,
            MME2 => 12,
            MME3 => 13,
            MME4 => 14,
            DRL => 15,
            IPR => 16,
            F1 => 17,
            F2 => 18,
            F3 => 19,
            DF0 => 20,
            DF1 => 21,
            DF2 => 22,
            DF3 => 23,
            ACV => 24,
            CON => 25,
            TRO => 26,
            SDF => 27,
            UN1 | UN2 | UN3 | UN4 | UN5 => return None,
        };
        Some(p)
    }

    pub fn is_group7(&self) -> bool {
        self.group() == Some(FaultGroup::SEVEN)
    }

    /// Absolute address of the trap pair for this fault.  The fault
    /// base switches supply the top seven bits of a twelve-bit
    /// address.
    pub fn trap_pair_address(&self, fault_base: u8) -> Word24 {
        let base = (u32::from(fault_base) << 5) & 0o7740;
        Word24::truncating(base + 2 * u32::from(self.number()))
    }
}

impl Display for FaultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug)]
pub struct UnknownFaultName(String);

impl Display for UnknownFaultName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "unknown fault name '{}'", self.0)
    }
}

impl Error for UnknownFaultName {}

impl TryFrom<&str> for FaultCode {
    type Error = UnknownFaultName;
    fn try_from(s: &str) -> Result<FaultCode, UnknownFaultName> {
        FaultCode::all_fault_codes()
            .into_iter()
            .find(|code| code.mnemonic().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownFaultName(s.to_owned()))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FaultNumberOutOfRange(pub u8);

impl Display for FaultNumberOutOfRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "fault number {} is out of range", self.0)
    }
}

impl Error for FaultNumberOutOfRange {}

impl TryFrom<u8> for FaultCode {
    type Error = FaultNumberOutOfRange;
    fn try_from(n: u8) -> Result<FaultCode, FaultNumberOutOfRange> {
        FaultCode::all_fault_codes()
            .get(usize::from(n))
            .copied()
            .ok_or(FaultNumberOutOfRange(n))
    }
}

/// Additional information about the reason for a fault.  The
/// hardware reports some of this in the fault register; the rest
/// helps whoever is reading the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSubtype {
    None,
    /// Store fault: address outside the BAR bound.
    StoreOutOfBounds,
    /// Store fault: no memory is configured at the address.
    StoreNonexistentAddress,
    IllegalOpcode,
    IllegalModifier,
    IllegalProcedure,
    IllegalDigit,
    /// Access-violation bits as reported in the fault register.
    AccessViolation(u16),
    CommandNotControl,
    CommandLoadPointerRegister,
    /// A connect arrived on the indicated processor port.
    ConnectFromPort(u8),
}

impl Display for FaultSubtype {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            FaultSubtype::None => f.write_str("none"),
            FaultSubtype::StoreOutOfBounds => f.write_str("out of bounds"),
            FaultSubtype::StoreNonexistentAddress => f.write_str("nonexistent address"),
            FaultSubtype::IllegalOpcode => f.write_str("illegal opcode"),
            FaultSubtype::IllegalModifier => f.write_str("illegal modifier"),
            FaultSubtype::IllegalProcedure => f.write_str("illegal procedure"),
            FaultSubtype::IllegalDigit => f.write_str("illegal digit"),
            FaultSubtype::AccessViolation(bits) => write!(f, "access violation {bits:06o}"),
            FaultSubtype::CommandNotControl => f.write_str("not control"),
            FaultSubtype::CommandLoadPointerRegister => f.write_str("lprpn"),
            FaultSubtype::ConnectFromPort(port) => write!(f, "connect on port {port}"),
        }
    }
}

/// A fault in flight.  At most one of these exists per processor at
/// any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    pub subtype: FaultSubtype,
    pub cause: String,
}

impl Fault {
    pub fn new<S: Into<String>>(code: FaultCode, subtype: FaultSubtype, cause: S) -> Fault {
        Fault {
            code,
            subtype,
            cause: cause.into(),
        }
    }

    pub fn store_out_of_bounds(address: Word18) -> Fault {
        Fault::new(
            FaultCode::STR,
            FaultSubtype::StoreOutOfBounds,
            format!("BAR store fault; address {address:06o} out of bounds"),
        )
    }

    pub fn nonexistent_address(address: Word24) -> Fault {
        Fault::new(
            FaultCode::STR,
            FaultSubtype::StoreNonexistentAddress,
            format!("no memory configured at address {address:08o}"),
        )
    }

    pub fn illegal_opcode(opcode: Opcode) -> Fault {
        Fault::new(
            FaultCode::IPR,
            FaultSubtype::IllegalOpcode,
            format!("illegal opcode {opcode}"),
        )
    }
}

impl Display for Fault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self.subtype {
            FaultSubtype::None => write!(f, "{} fault: {}", self.code.name(), self.cause),
            sub => write!(f, "{} fault ({}): {}", self.code.name(), sub, self.cause),
        }
    }
}

impl Error for Fault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_name_round_trip() {
        for code in FaultCode::all_fault_codes() {
            let name = code.to_string();
            match FaultCode::try_from(name.as_str()) {
                Ok(c) => assert_eq!(c, code),
                Err(_) => panic!("unable to round-trip fault code {code:?}"),
            }
        }
        assert!(FaultCode::try_from("this is not a fault name").is_err());
        assert_eq!(FaultCode::try_from("TRO").ok(), Some(FaultCode::TRO));
    }

    #[test]
    fn test_fault_numbers_are_table_positions() {
        for (i, code) in FaultCode::all_fault_codes().iter().enumerate() {
            assert_eq!(usize::from(code.number()), i);
            assert_eq!(FaultCode::try_from(code.number()).ok(), Some(*code));
        }
        assert_eq!(FaultCode::try_from(32_u8), Err(FaultNumberOutOfRange(32)));
        assert_eq!(FaultCode::from_number_or_trouble(99), FaultCode::TRB);
        assert_eq!(FaultCode::from_number_or_trouble(7), FaultCode::LUF);
    }

    #[test]
    fn test_group_seven() {
        let g7: Vec<FaultCode> = FaultCode::all_fault_codes()
            .into_iter()
            .filter(FaultCode::is_group7)
            .collect();
        assert_eq!(g7, vec![FaultCode::SDF, FaultCode::TRO, FaultCode::CON]);
    }

    #[test]
    fn test_priorities_are_distinct() {
        let mut seen: Vec<u8> = FaultCode::all_fault_codes()
            .iter()
            .filter_map(FaultCode::priority)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=27).collect::<Vec<u8>>());
        // Group order and priority order agree.
        assert!(FaultCode::SUF.priority() < FaultCode::TRB.priority());
        assert!(FaultCode::CON.priority() < FaultCode::SDF.priority());
    }

    #[test]
    fn test_trap_pair_address() {
        assert_eq!(FaultCode::SDF.trap_pair_address(0), Word24::ZERO);
        assert_eq!(
            FaultCode::TRB.trap_pair_address(0),
            Word24::truncating(0o76)
        );
        // Fault base 2 places the vectors at 0100.
        assert_eq!(
            FaultCode::LUF.trap_pair_address(2),
            Word24::truncating(0o100 + 0o16)
        );
        // Only seven bits of the fault base are used.
        assert_eq!(
            FaultCode::SDF.trap_pair_address(0o377),
            Word24::truncating(0o7740)
        );
    }

    #[test]
    fn test_display() {
        let f = Fault::store_out_of_bounds(Word18::truncating(0o1000));
        assert_eq!(
            f.to_string(),
            "Store fault (out of bounds): BAR store fault; address 001000 out of bounds"
        );
    }
}
