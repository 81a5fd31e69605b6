use crate::simulation::Simulation;
use std::error::Error;
use std::time::Instant;
use tracing::info;

pub type ObserverError = Box<dyn Error + Send + Sync>;

/// Lifecycle points at which [`Simulation::run`] notifies its observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Initialized,
    NewGeneration,
    PostTimestep,
    GenerationComplete,
    Finished,
    /// Liveness check, sent every burn-in timestep.
    Watchdog,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

pub trait Observer {
    fn notify(&mut self, sim: &Simulation, event: Event) -> Result<Control, ObserverError>;
}

/// Observers notified in registration order; the first `Stop` ends the round.
#[derive(Default)]
pub struct ObserverChain {
    observers: Vec<Box<dyn Observer>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn with(mut self, observer: impl Observer + 'static) -> Self {
        self.push(Box::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Observer for ObserverChain {
    fn notify(&mut self, sim: &Simulation, event: Event) -> Result<Control, ObserverError> {
        for observer in &mut self.observers {
            if observer.notify(sim, event)? == Control::Stop {
                return Ok(Control::Stop);
            }
        }
        Ok(Control::Continue)
    }
}

/// Never stops the run.
impl Observer for () {
    fn notify(&mut self, _sim: &Simulation, _event: Event) -> Result<Control, ObserverError> {
        Ok(Control::Continue)
    }
}

/// Logs one line per generation.
pub struct ConsoleObserver {
    started: Instant,
    generation_started: Instant,
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            generation_started: Instant::now(),
        }
    }
}

impl Observer for ConsoleObserver {
    fn notify(&mut self, sim: &Simulation, event: Event) -> Result<Control, ObserverError> {
        match event {
            Event::Initialized => {
                self.started = Instant::now();
                info!(
                    agents = sim.population().len(),
                    controller = sim.population().controller().descriptor(),
                    generations = sim.config().generations,
                    "simulation initialized"
                );
            }
            Event::NewGeneration => self.generation_started = Instant::now(),
            Event::GenerationComplete => {
                if let Some(s) = sim.analysis().last() {
                    let marker = if sim.is_fixed() { "*" } else { "" };
                    info!(
                        "{}{} ave_fitness={:.4} repro_ind={} lineages={} complexity={:.4} conflicts={} ({} ms)",
                        sim.generation(),
                        marker,
                        s.ave_fitness,
                        s.repro_ind,
                        s.lineages,
                        s.complexity,
                        s.conflicts,
                        self.generation_started.elapsed().as_millis()
                    );
                }
            }
            Event::Finished => {
                info!(
                    elapsed_s = self.started.elapsed().as_secs_f64(),
                    "simulation finished"
                );
            }
            Event::PostTimestep | Event::Watchdog => {}
        }
        Ok(Control::Continue)
    }
}
