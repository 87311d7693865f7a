//! Switch and tweak settings.
//!
//! On the real machine most of these are physical switches on the
//! processor's configuration panel: the fault base, the port
//! enables, which memory each port addresses and how much of it.
//! The tweaks have no hardware counterpart; they adjust the
//! emulator's behaviour.
//!
//! The settings are consumed when a processor is reset.  Changing
//! them while a processor is running has no effect until the next
//! reset.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::scheduler::SchedulingModel;
use crate::timer::LockupTime;

pub const MAX_PROCESSORS: usize = 8;
pub const MAX_CONTROLLERS: usize = 8;
pub const MAX_PORTS: usize = 8;

/// The two hardware variants of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Dps8M,
    L68,
}

const DPS8M_STORE_SIZES: [usize; 8] = [
    32768, 65536, 4194304, 131072, 8388608, 262144, 16777216, 524288,
];
const L68_STORE_SIZES: [usize; 8] = [
    32768, 65536, 131072, 262144, 524288, 1048576, 2097152, 4194304,
];

impl Variant {
    pub fn port_count(&self) -> usize {
        match self {
            Variant::Dps8M => 4,
            Variant::L68 => 8,
        }
    }

    /// Translate a store-size switch setting into a number of words.
    /// The encodings differ between the variants.
    pub fn store_size_words(&self, setting: u8) -> Option<usize> {
        let table = match self {
            Variant::Dps8M => &DPS8M_STORE_SIZES,
            Variant::L68 => &L68_STORE_SIZES,
        };
        table.get(usize::from(setting)).copied()
    }
}

/// Switches for one processor port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSwitches {
    pub enabled: bool,
    /// Which multiple of the store size this port's memory starts at.
    pub assignment: u8,
    /// Store-size switch setting; see [`Variant::store_size_words`].
    pub store_size: u8,
    /// Index of the system controller cabled to this port.
    pub controller: Option<usize>,
    /// The controller port this processor port is cabled to.  The
    /// controller's interrupt masks are assigned to its ports.
    pub controller_port: u8,
}

impl Default for PortSwitches {
    fn default() -> PortSwitches {
        PortSwitches {
            enabled: false,
            assignment: 0,
            store_size: 2,
            controller: None,
            controller_port: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Switches {
    pub cpu_number: u8,
    /// The fault base; the top seven bits of the twelve-bit fault
    /// vector address.
    pub fault_base: u8,
    /// Power-on setting of the lockup timer.
    pub lockup_time: LockupTime,
    pub ports: Vec<PortSwitches>,
}

impl Default for Switches {
    fn default() -> Switches {
        Switches {
            cpu_number: 0,
            fault_base: 0,
            lockup_time: LockupTime::default(),
            ports: vec![PortSwitches {
                enabled: true,
                controller: Some(0),
                ..PortSwitches::default()
            }],
        }
    }
}

impl Switches {
    /// Disable any port whose settings cannot be honoured, logging
    /// why.  A bad port setting is a configuration error, not a
    /// reason to refuse to run.
    pub fn sanitize(&mut self, variant: Variant, controllers: usize) {
        let port_count = variant.port_count();
        if self.ports.len() > port_count {
            event!(
                Level::WARN,
                "cpu {}: {} ports configured but a {:?} processor has only {}; ignoring the rest",
                self.cpu_number,
                self.ports.len(),
                variant,
                port_count
            );
            self.ports.truncate(port_count);
        }
        let cpu = self.cpu_number;
        for (n, port) in self.ports.iter_mut().enumerate() {
            if !port.enabled {
                continue;
            }
            let problem = if port.assignment > 7 {
                Some(format!("invalid assignment {}", port.assignment))
            } else if variant.store_size_words(port.store_size).is_none() {
                Some(format!("invalid store size setting {}", port.store_size))
            } else {
                match port.controller {
                    None => Some("no controller is cabled".to_string()),
                    Some(c) if c >= controllers => {
                        Some(format!("controller {c} does not exist"))
                    }
                    Some(_) => None,
                }
            };
            if let Some(why) = problem {
                event!(
                    Level::WARN,
                    "cpu {} port {}: {}; disabling the port",
                    cpu,
                    n,
                    why
                );
                port.enabled = false;
            }
        }
    }
}

/// Emulator behaviour adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tweaks {
    /// Timer runout faults are generated.
    pub tro_enable: bool,
    /// The processor is configured to run the hardware test suite.
    /// Fault cascades which would otherwise stop the engine are
    /// delivered to the guest instead.
    pub isolts_mode: bool,
    /// Start in a FETCH cycle rather than executing a DIS instruction.
    pub nodis: bool,
    /// The DIS instruction waits for an interrupt.  If this is off,
    /// DIS completes immediately.
    pub dis_enable: bool,
    /// Stop the engine on an unimplemented instruction instead of
    /// delivering an illegal procedure fault.
    pub halt_on_unimplemented: bool,
    /// Stop the engine on a host-level error (lock discipline
    /// violation, unknown executor outcome) instead of repairing and
    /// continuing.
    pub halt_on_host_error: bool,
    /// Stop the engine when a derail fault is delivered.
    pub drl_fatal: bool,
    /// Log every fault at INFO rather than DEBUG.
    pub report_faults: bool,
    /// Translate addresses through the bank map.  Without it, absolute
    /// addresses index the shared memory array directly.
    pub use_map: bool,
    /// Timer register decrement per cycle.
    pub timer_rate: u32,
}

impl Default for Tweaks {
    fn default() -> Tweaks {
        Tweaks {
            tro_enable: true,
            isolts_mode: false,
            nodis: false,
            dis_enable: true,
            halt_on_unimplemented: false,
            halt_on_host_error: false,
            drl_fatal: false,
            report_faults: false,
            use_map: true,
            timer_rate: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub variant: Variant,
    pub switches: Switches,
    pub tweaks: Tweaks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub processors: Vec<ProcessorConfig>,
    pub controllers: usize,
    /// Size of the memory owned by each system controller.
    pub words_per_controller: usize,
    pub scheduling: SchedulingModel,
    /// Upper bound on a DIS sleep, so that I/O polling still happens.
    pub poll_interval_ms: u64,
    /// Processor 0 calls the I/O poll callback every this many cycles.
    pub poll_every_cycles: u64,
}

impl Default for SystemConfig {
    fn default() -> SystemConfig {
        SystemConfig {
            processors: vec![ProcessorConfig::default()],
            controllers: 1,
            words_per_controller: 4 * 1024 * 1024,
            scheduling: SchedulingModel::default(),
            poll_interval_ms: 10,
            poll_every_cycles: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NoProcessors,
    TooManyProcessors(usize),
    NoControllers,
    TooManyControllers(usize),
    ControllerSizeNotBankMultiple(usize),
    ZeroPollCadence,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigError::NoProcessors => f.write_str("no processors are configured"),
            ConfigError::TooManyProcessors(n) => {
                write!(f, "{n} processors configured, at most {MAX_PROCESSORS} are supported")
            }
            ConfigError::NoControllers => f.write_str("no system controllers are configured"),
            ConfigError::TooManyControllers(n) => {
                write!(f, "{n} controllers configured, at most {MAX_CONTROLLERS} are supported")
            }
            ConfigError::ControllerSizeNotBankMultiple(n) => {
                write!(f, "controller size {n} is not a whole number of memory banks")
            }
            ConfigError::ZeroPollCadence => f.write_str("poll_every_cycles must be non-zero"),
        }
    }
}

impl Error for ConfigError {}

impl SystemConfig {
    /// Check the structural settings which we cannot repair.  Port
    /// problems are repaired later, by [`Switches::sanitize`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processors.is_empty() {
            return Err(ConfigError::NoProcessors);
        }
        if self.processors.len() > MAX_PROCESSORS {
            return Err(ConfigError::TooManyProcessors(self.processors.len()));
        }
        if self.controllers == 0 {
            return Err(ConfigError::NoControllers);
        }
        if self.controllers > MAX_CONTROLLERS {
            return Err(ConfigError::TooManyControllers(self.controllers));
        }
        if self.words_per_controller == 0
            || self.words_per_controller % crate::memorymap::BANK_WORDS != 0
        {
            return Err(ConfigError::ControllerSizeNotBankMultiple(
                self.words_per_controller,
            ));
        }
        if self.poll_every_cycles == 0 {
            return Err(ConfigError::ZeroPollCadence);
        }
        Ok(())
    }
}
