use crate::ann::INPUTS;
use crate::kernel::KernelKind;
use crate::landscape::{Landscape, Layer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::{error::Error, fmt};

/// Largest sensory window side a controller may use.
pub const MAX_WINDOW: usize = 33;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Deterministic seed for reproducible simulation runs.
    pub seed: u64,
    /// Generations simulated before the recorded run; no analysis, no observers.
    pub burnin_generations: usize,
    /// Recorded generations.
    pub generations: usize,
    /// Timesteps per generation.
    pub timesteps: usize,
    /// Generations after this one are "fixed": weights are no longer mutated.
    pub fixation_generation: Option<usize>,
    /// Timesteps per fixed generation. Defaults to `timesteps`.
    pub fixed_timesteps: Option<usize>,
    /// Size of the worker pool (0 = one per core).
    pub worker_threads: usize,
    /// Where the recorder writes archives and summaries.
    pub output_dir: Option<PathBuf>,
    /// Seed controller weights from a previous run's archive.
    pub resume: Option<ResumeConfig>,
    pub agents: PopulationConfig,
    pub landscape: LandscapeConfig,
    pub contest: ContestConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            burnin_generations: 0,
            generations: 100,
            timesteps: 100,
            fixation_generation: None,
            fixed_timesteps: None,
            worker_threads: 0,
            output_dir: None,
            resume: None,
            agents: PopulationConfig::default(),
            landscape: LandscapeConfig::default(),
            contest: ContestConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Number of agents N.
    pub size: usize,
    /// Side L of the sensory window and of the movement neighborhood.
    pub window: usize,
    /// Controller topology name.
    pub controller: String,
    /// Take the strategy score from a second, zero-input evaluation.
    pub obligate: bool,
    /// Force every agent to forage.
    pub forage: bool,
    pub sprout_radius: i32,
    pub flee_radius: i32,
    /// Timesteps needed to consume a caught item.
    pub handling_time: i32,
    /// Per-weight probability of a Cauchy perturbation.
    pub mutation_prob: f64,
    /// Scale of the Cauchy perturbation.
    pub mutation_step: f32,
    /// Per-weight probability of being zeroed.
    pub mutation_knockout: f64,
    /// Sensory noise: every input is scaled by a draw from `[1 - sigma, 1 + sigma]`.
    pub noise_sigma: f32,
    /// Fitness cost per unit of controller complexity.
    pub complexity_penalty: f32,
    pub input_layers: [Layer; INPUTS],
    pub input_mask: [f32; INPUTS],
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: 1000,
            window: 3,
            controller: "SmartAnn".to_string(),
            obligate: false,
            forage: false,
            sprout_radius: 10_000,
            flee_radius: 10,
            handling_time: 5,
            mutation_prob: 0.001,
            mutation_step: 0.001,
            mutation_knockout: 0.001,
            noise_sigma: 0.1,
            complexity_penalty: 0.01,
            input_layers: [Layer::Items, Layer::Nonhandlers, Layer::Handlers],
            input_mask: [1.0; INPUTS],
        }
    }
}

/// Source of the per-cell item capacity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CapacityInit {
    Uniform { value: f32 },
    /// Raw little-endian `f32` grid of `dim * dim` cells, row-major.
    Raw { path: PathBuf },
}

impl Default for CapacityInit {
    fn default() -> Self {
        CapacityInit::Uniform { value: 2.0 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    /// Side length; a power of two.
    pub dim: usize,
    pub capacity: CapacityInit,
    /// Upper bound of the capacity layer.
    pub max_item_capacity: f32,
    /// Per-timestep regrowth rate at full capacity.
    pub item_growth: f32,
    /// Probability that a foraging agent finds one given item.
    pub detection_rate: f64,
    pub kernel: KernelKind,
    pub kernel_size: usize,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            dim: 128,
            capacity: CapacityInit::default(),
            max_item_capacity: 5.0,
            item_growth: 0.01,
            detection_rate: 0.1,
            kernel: KernelKind::Gauss,
            kernel_size: 3,
        }
    }
}

/// Contest hooks. Both default to 1: every contest is fought and the attacker wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContestConfig {
    pub fight_probability: f64,
    pub attacker_win_probability: f64,
}

impl Default for ContestConfig {
    fn default() -> Self {
        Self {
            fight_probability: 1.0,
            attacker_win_probability: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Controller archive of a previous run.
    pub archive: PathBuf,
    /// Generation to load; the last available one if absent or past the end.
    #[serde(default)]
    pub generation: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    DimensionNotPowerOfTwo(usize),
    DimensionTooSmall { min: usize, actual: usize },
    DimensionTooLarge { max: usize, actual: usize },
    InvalidPopulationSize,
    InvalidWindow(usize),
    InvalidKernelSize(usize),
    InvalidTimesteps,
    InvalidProbability(&'static str),
    InvalidMutationStep,
    InvalidNoiseSigma,
    InvalidInputMask,
    InvalidRadius(&'static str),
    InvalidHandlingTime,
    InvalidGrowth,
    InvalidMaxItemCapacity,
    InvalidCapacity,
    CapacitySizeMismatch { expected: usize, actual: usize },
    CapacityUnreadable(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DimensionNotPowerOfTwo(dim) => {
                write!(f, "landscape dimension ({dim}) must be a power of two")
            }
            ConfigError::DimensionTooSmall { min, actual } => {
                write!(f, "landscape dimension ({actual}) is below the minimum ({min})")
            }
            ConfigError::DimensionTooLarge { max, actual } => {
                write!(f, "landscape dimension ({actual}) exceeds supported maximum ({max})")
            }
            ConfigError::InvalidPopulationSize => write!(f, "agents.size must be positive"),
            ConfigError::InvalidWindow(l) => {
                write!(f, "agents.window ({l}) must be odd and at most {MAX_WINDOW}")
            }
            ConfigError::InvalidKernelSize(k) => write!(
                f,
                "landscape.kernel_size ({k}) must be odd and not exceed the landscape dimension"
            ),
            ConfigError::InvalidTimesteps => write!(f, "timesteps must be positive"),
            ConfigError::InvalidProbability(name) => {
                write!(f, "{name} must be finite and within [0,1]")
            }
            ConfigError::InvalidMutationStep => {
                write!(f, "agents.mutation_step must be finite and non-negative")
            }
            ConfigError::InvalidNoiseSigma => {
                write!(f, "agents.noise_sigma must be finite and within [0,1]")
            }
            ConfigError::InvalidInputMask => write!(f, "agents.input_mask must be finite"),
            ConfigError::InvalidRadius(name) => write!(f, "{name} must be non-negative"),
            ConfigError::InvalidHandlingTime => write!(f, "agents.handling_time must be positive"),
            ConfigError::InvalidGrowth => {
                write!(f, "landscape.item_growth must be finite and non-negative")
            }
            ConfigError::InvalidMaxItemCapacity => {
                write!(f, "landscape.max_item_capacity must be finite and positive")
            }
            ConfigError::InvalidCapacity => {
                write!(f, "capacity values must be finite and non-negative")
            }
            ConfigError::CapacitySizeMismatch { expected, actual } => write!(
                f,
                "capacity grid has {actual} cells, landscape needs {expected}"
            ),
            ConfigError::CapacityUnreadable(msg) => write!(f, "can't read capacity grid: {msg}"),
        }
    }
}

impl Error for ConfigError {}

fn check_probability(p: f64, name: &'static str) -> Result<(), ConfigError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProbability(name))
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timesteps == 0 || self.fixed_timesteps == Some(0) {
            return Err(ConfigError::InvalidTimesteps);
        }
        self.agents.validate()?;
        self.landscape.validate()?;
        check_probability(self.contest.fight_probability, "contest.fight_probability")?;
        check_probability(
            self.contest.attacker_win_probability,
            "contest.attacker_win_probability",
        )?;
        Ok(())
    }

    /// Whether weight mutation is switched off in `generation`.
    pub fn is_fixed(&self, generation: usize) -> bool {
        self.fixation_generation
            .is_some_and(|fixation| generation > fixation)
    }

    pub fn timesteps_for(&self, generation: usize) -> usize {
        if self.is_fixed(generation) {
            self.fixed_timesteps.unwrap_or(self.timesteps)
        } else {
            self.timesteps
        }
    }
}

impl PopulationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 || self.size > u32::MAX as usize {
            return Err(ConfigError::InvalidPopulationSize);
        }
        if self.window % 2 == 0 || self.window > MAX_WINDOW {
            return Err(ConfigError::InvalidWindow(self.window));
        }
        check_probability(self.mutation_prob, "agents.mutation_prob")?;
        check_probability(self.mutation_knockout, "agents.mutation_knockout")?;
        if !(self.mutation_step.is_finite() && self.mutation_step >= 0.0) {
            return Err(ConfigError::InvalidMutationStep);
        }
        if !(self.noise_sigma.is_finite() && (0.0..=1.0).contains(&self.noise_sigma)) {
            return Err(ConfigError::InvalidNoiseSigma);
        }
        if !self.input_mask.iter().all(|m| m.is_finite()) {
            return Err(ConfigError::InvalidInputMask);
        }
        if self.sprout_radius < 0 {
            return Err(ConfigError::InvalidRadius("agents.sprout_radius"));
        }
        if self.flee_radius < 0 {
            return Err(ConfigError::InvalidRadius("agents.flee_radius"));
        }
        if self.handling_time <= 0 {
            return Err(ConfigError::InvalidHandlingTime);
        }
        Ok(())
    }
}

impl LandscapeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Landscape::check_dim(self.dim)?;
        if self.kernel_size % 2 == 0 || self.kernel_size > self.dim {
            return Err(ConfigError::InvalidKernelSize(self.kernel_size));
        }
        if !(self.max_item_capacity.is_finite() && self.max_item_capacity > 0.0) {
            return Err(ConfigError::InvalidMaxItemCapacity);
        }
        if !(self.item_growth.is_finite() && self.item_growth >= 0.0) {
            return Err(ConfigError::InvalidGrowth);
        }
        check_probability(self.detection_rate, "landscape.detection_rate")?;
        if let CapacityInit::Uniform { value } = self.capacity {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidCapacity);
            }
        }
        Ok(())
    }

    /// Per-cell capacity, clamped to `[0, max_item_capacity]`.
    pub fn load_capacity(&self) -> Result<Vec<f32>, ConfigError> {
        let cells = self.dim * self.dim;
        let raw = match &self.capacity {
            CapacityInit::Uniform { value } => vec![*value; cells],
            CapacityInit::Raw { path } => {
                let bytes = std::fs::read(path)
                    .map_err(|e| ConfigError::CapacityUnreadable(format!("{}: {e}", path.display())))?;
                if bytes.len() % 4 != 0 || bytes.len() / 4 != cells {
                    return Err(ConfigError::CapacitySizeMismatch {
                        expected: cells,
                        actual: bytes.len() / 4,
                    });
                }
                bytes
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            }
        };
        if !raw.iter().all(|v| v.is_finite() && *v >= 0.0) {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(raw
            .into_iter()
            .map(|v| v.min(self.max_item_capacity))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_default() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_power_of_two_dimension() {
        let mut config = SimConfig::default();
        config.landscape.dim = 100;
        assert_eq!(
            config.validate(),
            Err(ConfigError::DimensionNotPowerOfTwo(100))
        );
        config.landscape.dim = 16;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DimensionTooSmall { min: 32, actual: 16 })
        ));
    }

    #[test]
    fn validate_rejects_even_window() {
        let mut config = SimConfig::default();
        config.agents.window = 4;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWindow(4)));
    }

    #[test]
    fn validate_rejects_bad_probabilities() {
        let mut config = SimConfig::default();
        config.agents.mutation_prob = 1.5;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidProbability("agents.mutation_prob"))
        );
        let mut config = SimConfig::default();
        config.landscape.detection_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fixation_switches_timesteps() {
        let config = SimConfig {
            timesteps: 50,
            fixed_timesteps: Some(10),
            fixation_generation: Some(3),
            ..SimConfig::default()
        };
        assert!(!config.is_fixed(3));
        assert!(config.is_fixed(4));
        assert_eq!(config.timesteps_for(2), 50);
        assert_eq!(config.timesteps_for(4), 10);
        assert!(!SimConfig::default().is_fixed(usize::MAX));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "generations": 5,
            "agents": { "size": 10, "controller": "SimpleAnn", "input_layers": ["items", "foragers", "klepts"] },
            "landscape": { "dim": 64, "capacity": { "kind": "uniform", "value": 1.0 } }
        }"#;
        let cfg: SimConfig = serde_json::from_str(json).expect("config should parse");
        assert_eq!(cfg.generations, 5);
        assert_eq!(cfg.agents.size, 10);
        assert_eq!(cfg.agents.window, 3);
        assert_eq!(cfg.agents.input_layers[1], Layer::Foragers);
        assert_eq!(cfg.landscape.dim, 64);
        assert_eq!(cfg.contest.fight_probability, 1.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn raw_capacity_must_match_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capacity.f32");
        let bytes: Vec<u8> = (0..10).flat_map(|_| 1.0f32.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();
        let landscape = LandscapeConfig {
            dim: 32,
            capacity: CapacityInit::Raw { path },
            ..LandscapeConfig::default()
        };
        assert_eq!(
            landscape.load_capacity(),
            Err(ConfigError::CapacitySizeMismatch {
                expected: 1024,
                actual: 10
            })
        );
    }

    #[test]
    fn capacity_is_clamped_to_maximum() {
        let landscape = LandscapeConfig {
            dim: 32,
            capacity: CapacityInit::Uniform { value: 9.0 },
            max_item_capacity: 4.0,
            ..LandscapeConfig::default()
        };
        let cap = landscape.load_capacity().unwrap();
        assert_eq!(cap.len(), 1024);
        assert!(cap.iter().all(|&c| c == 4.0));
    }
}
