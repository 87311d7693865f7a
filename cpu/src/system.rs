//! A complete configuration: processors, system controllers and the
//! memory they share.
use std::sync::Arc;
use std::time::Duration;

use tracing::{event, Level};

use crate::config::{ConfigError, SystemConfig};
use crate::control::{Processor, ProcessorParts, SystemResources};
use crate::executor::IoPoll;
use crate::memory::SharedMemory;
use crate::scheduler::{self, SchedulingModel};
use crate::scu::Controllers;
use crate::stall::HostControls;
use crate::stop::HostStop;

/// Stops a running system from another thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    host: Arc<HostControls>,
    controllers: Arc<Controllers>,
}

impl StopHandle {
    pub fn stop(&self) {
        event!(Level::DEBUG, "stop requested");
        self.host.request_stop();
        self.controllers.signals().wake_all();
    }
}

pub struct System {
    scheduling: SchedulingModel,
    resources: SystemResources,
    processors: Vec<Processor>,
}

impl System {
    /// Build the system.  `parts_for` is called once for each
    /// processor, with its index.
    pub fn new<F>(config: SystemConfig, mut parts_for: F) -> Result<System, ConfigError>
    where
        F: FnMut(usize) -> ProcessorParts,
    {
        config.validate()?;
        let words = config.controllers * config.words_per_controller;
        let resources = SystemResources {
            memory: Arc::new(SharedMemory::new(words)),
            controllers: Arc::new(Controllers::new(
                config.controllers,
                config.processors.len(),
            )),
            host: Arc::new(HostControls::default()),
            locking: config.scheduling.word_locking(),
            words_per_controller: config.words_per_controller,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_every_cycles: config.poll_every_cycles,
        };
        let processors: Vec<Processor> = config
            .processors
            .iter()
            .enumerate()
            .map(|(index, pc)| Processor::new(index, pc.clone(), &resources, parts_for(index)))
            .collect();
        event!(
            Level::INFO,
            "{} processors, {} system controllers of {} words, {:?} scheduling",
            processors.len(),
            config.controllers,
            config.words_per_controller,
            config.scheduling
        );
        Ok(System {
            scheduling: config.scheduling,
            resources,
            processors,
        })
    }

    pub fn memory(&self) -> &Arc<SharedMemory> {
        &self.resources.memory
    }

    pub fn controllers(&self) -> &Arc<Controllers> {
        &self.resources.controllers
    }

    pub fn host(&self) -> &Arc<HostControls> {
        &self.resources.host
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            host: Arc::clone(&self.resources.host),
            controllers: Arc::clone(&self.resources.controllers),
        }
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    pub fn processor_mut(&mut self, index: usize) -> Option<&mut Processor> {
        self.processors.get_mut(index)
    }

    /// Install the I/O poll callback.  Processor 0 calls it.
    pub fn set_poller(&mut self, poller: Box<dyn IoPoll>) {
        if let Some(cpu) = self.processors.first_mut() {
            cpu.set_poller(poller);
        }
    }

    pub fn reset(&mut self) {
        for cpu in self.processors.iter_mut() {
            cpu.reset();
        }
    }

    /// Run until something stops the system.  With `max_cycles`, each
    /// processor stops after that many more cycles.
    pub fn run(&mut self, max_cycles: Option<u64>) -> HostStop {
        for cpu in self.processors.iter_mut() {
            let limit = max_cycles.map(|n| cpu.cycles().saturating_add(n));
            cpu.set_cycle_limit(limit);
        }
        let stop = match self.scheduling {
            SchedulingModel::RoundRobin => {
                scheduler::run_round_robin(&mut self.processors, &self.resources.controllers)
            }
            SchedulingModel::ThreadPerProcessor => scheduler::run_threaded(
                &mut self.processors,
                &self.resources.controllers,
                &self.resources.host,
            ),
        };
        for cpu in self.processors.iter_mut() {
            cpu.memory_mut().unlock_all();
            cpu.set_cycle_limit(None);
        }
        // The request has been honoured.
        self.resources.host.clear_stop();
        if stop.is_internal_error() {
            event!(Level::ERROR, "system stopped: {stop}");
        } else {
            event!(Level::INFO, "system stopped: {stop}");
        }
        stop
    }
}
