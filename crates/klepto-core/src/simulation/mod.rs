mod contention;
mod generation;
mod timestep;

pub use timestep::StepTimings;

use crate::analysis::Analysis;
use crate::archive::{self, ArchiveError, IArchive};
use crate::config::{ConfigError, ResumeConfig, SimConfig};
use crate::controller::ControllerError;
use crate::kernel::Kernel;
use crate::landscape::{Coordinate, Landscape, Layer};
use crate::observer::{Control, Event, Observer, ObserverError};
use crate::population::Population;
use crate::rng::{create_rng, PassSeed};
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::{error::Error, fmt, io};
use tracing::{debug, info, warn};

pub struct Simulation {
    pub(crate) config: SimConfig,
    pub(crate) landscape: Landscape,
    pub(crate) kernel: Kernel,
    pub(crate) population: Population,
    pub(crate) analysis: Analysis,
    pub(crate) pool: ThreadPool,
    /// Serial stream: regrowth, contests, foraging order and ancestor sampling.
    pub(crate) rng: ChaCha12Rng,
    /// Counter from which every parallel pass derives its chunk streams.
    pub(crate) pass: u64,
    pub(crate) generation: usize,
    pub(crate) timestep: usize,
    pub(crate) timesteps: usize,
    pub(crate) fixed: bool,
}

#[derive(Debug)]
pub enum SimulationError {
    Config(ConfigError),
    Controller(ControllerError),
    Archive(ArchiveError),
    Io(io::Error),
    ThreadPool(ThreadPoolBuildError),
    ResumeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    EmptyArchive,
    Observer(ObserverError),
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::Config(e) => write!(f, "{e}"),
            SimulationError::Controller(e) => write!(f, "{e}"),
            SimulationError::Archive(e) => write!(f, "{e}"),
            SimulationError::Io(e) => write!(f, "{e}"),
            SimulationError::ThreadPool(e) => write!(f, "can't build worker pool: {e}"),
            SimulationError::ResumeMismatch {
                what,
                expected,
                actual,
            } => write!(
                f,
                "resume archive {what} ({actual}) doesn't match the population ({expected})"
            ),
            SimulationError::EmptyArchive => write!(f, "resume archive holds no generations"),
            SimulationError::Observer(e) => write!(f, "observer failed: {e}"),
        }
    }
}

impl Error for SimulationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SimulationError::Config(e) => Some(e),
            SimulationError::Controller(e) => Some(e),
            SimulationError::Archive(e) => Some(e),
            SimulationError::Io(e) => Some(e),
            SimulationError::ThreadPool(e) => Some(e),
            SimulationError::Observer(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(err: ConfigError) -> Self {
        SimulationError::Config(err)
    }
}

impl From<ControllerError> for SimulationError {
    fn from(err: ControllerError) -> Self {
        SimulationError::Controller(err)
    }
}

impl From<ArchiveError> for SimulationError {
    fn from(err: ArchiveError) -> Self {
        SimulationError::Archive(err)
    }
}

impl From<io::Error> for SimulationError {
    fn from(err: io::Error) -> Self {
        SimulationError::Io(err)
    }
}

impl From<ThreadPoolBuildError> for SimulationError {
    fn from(err: ThreadPoolBuildError) -> Self {
        SimulationError::ThreadPool(err)
    }
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let lc = &config.landscape;
        let kernel = Kernel::new(lc.kernel, lc.kernel_size)
            .ok_or(ConfigError::InvalidKernelSize(lc.kernel_size))?;
        let mut landscape = Landscape::new(lc.dim)?;
        let capacity = lc.load_capacity()?;
        landscape.layer_mut(Layer::Capacity).copy_from_slice(&capacity);

        let agents = &config.agents;
        let mut population = Population::new(agents.size, &agents.controller, agents.window)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build()?;

        let mut rng = create_rng(config.seed);
        let dim = lc.dim as i16;
        for ind in &mut population.current.individuals {
            let pos = Coordinate::new(rng.random_range(0..dim), rng.random_range(0..dim));
            ind.sprout(pos, 0);
        }
        landscape.update_occupancy(&population.current.individuals, &kernel);

        let mut sim = Self {
            timesteps: config.timesteps,
            config,
            landscape,
            kernel,
            population,
            analysis: Analysis::default(),
            pool,
            rng,
            pass: 0,
            generation: 0,
            timestep: 0,
            fixed: false,
        };
        if let Some(resume) = sim.config.resume.clone() {
            sim.load_controllers(&resume)?;
        }
        info!(
            dim = sim.landscape.dim(),
            agents = sim.population.len(),
            controller = sim.population.controller().descriptor(),
            window = sim.config.agents.window,
            workers = sim.pool.current_num_threads(),
            seed = sim.config.seed,
            "simulation ready"
        );
        Ok(sim)
    }

    /// Seed the current controllers from a previous run's weight archive.
    fn load_controllers(&mut self, resume: &ResumeConfig) -> Result<(), SimulationError> {
        let mut archive = IArchive::open(&resume.archive)?;
        if archive.is_empty() {
            return Err(SimulationError::EmptyArchive);
        }
        let last = archive.len() - 1;
        let requested = resume.generation.unwrap_or(last);
        let generation = requested.min(last);
        if generation != requested {
            warn!(requested, available = last, "resume generation clamped to last archived");
        }
        let blob = archive.extract(generation)?;

        let controller = self.population.current.controller.as_mut();
        if blob.element_count != controller.n() {
            return Err(SimulationError::ResumeMismatch {
                what: "controller count",
                expected: controller.n(),
                actual: blob.element_count,
            });
        }
        let state_bytes = controller.state_size() * std::mem::size_of::<f32>();
        if blob.element_size != state_bytes {
            return Err(SimulationError::ResumeMismatch {
                what: "controller state size",
                expected: state_bytes,
                actual: blob.element_size,
            });
        }
        let stride = controller.type_size();
        archive::uncompress(&blob, controller.arena_mut().as_bytes_mut(), stride)?;
        info!(
            archive = %resume.archive.display(),
            generation,
            header = archive.header(),
            "controllers resumed"
        );
        Ok(())
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn landscape(&self) -> &Landscape {
        &self.landscape
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Current generation of the recorded run.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Whether the current generation runs with frozen weights.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub(crate) fn next_pass(&mut self) -> PassSeed {
        self.pass += 1;
        PassSeed {
            seed: self.config.seed,
            pass: self.pass,
        }
    }

    fn notify(&self, observer: &mut dyn Observer, event: Event) -> Result<bool, SimulationError> {
        let control = observer
            .notify(self, event)
            .map_err(SimulationError::Observer)?;
        Ok(control == Control::Continue)
    }

    /// Burn-in followed by the recorded generations.
    ///
    /// Returns `Ok(false)` if an observer stopped the run early.
    pub fn run(&mut self, observer: &mut dyn Observer) -> Result<bool, SimulationError> {
        if !self.notify(observer, Event::Initialized)? {
            return Ok(false);
        }

        let burnin = self.config.burnin_generations;
        if burnin > 0 {
            info!(generations = burnin, "burn-in");
        }
        self.fixed = false;
        self.timesteps = self.config.timesteps;
        for _ in 0..burnin {
            for t in 0..self.timesteps {
                self.timestep = t;
                self.step();
                if !self.notify(observer, Event::Watchdog)? {
                    return Ok(false);
                }
            }
            self.assess_fitness();
            self.reproduce();
        }

        for g in 0..self.config.generations {
            self.generation = g;
            self.fixed = self.config.is_fixed(g);
            self.timesteps = self.config.timesteps_for(g);
            if !self.notify(observer, Event::NewGeneration)? {
                return Ok(false);
            }
            for t in 0..self.timesteps {
                self.timestep = t;
                self.step();
                if !self.notify(observer, Event::PostTimestep)? {
                    return Ok(false);
                }
            }
            self.assess_fitness();
            self.analysis.generation(
                &self.population,
                &self.landscape,
                &self.config.agents.input_layers,
            );
            if let Some(s) = self.analysis.last() {
                debug!(
                    generation = g,
                    fixed = self.fixed,
                    ave_fitness = s.ave_fitness,
                    repro_ind = s.repro_ind,
                    conflicts = s.conflicts,
                    "generation complete"
                );
            }
            if !self.notify(observer, Event::GenerationComplete)? {
                return Ok(false);
            }
            self.reproduce();
        }

        if !self.notify(observer, Event::Finished)? {
            return Ok(false);
        }
        info!(generations = self.config.generations, "run finished");
        Ok(true)
    }
}
