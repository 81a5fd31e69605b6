//! Runtime-selected controllers over a shared weight arena.
//!
//! The simulation only sees `Box<dyn Controller>`; the topology is picked
//! once from its descriptor string in [`make_controller`].

use crate::ann::{forward, DumbAnn, SimpleAnn, SimpleAnnFB, SmartAnn, Topology, INPUTS};
use crate::arena::SlotArena;
use crate::config::{PopulationConfig, MAX_WINDOW};
use crate::individual::Individual;
use crate::landscape::Landscape;
use crate::rng::{PassSeed, AGENT_CHUNK};
use rand::Rng;
use rand_distr::{Cauchy, Distribution};
use rayon::prelude::*;
use std::marker::PhantomData;
use std::{error::Error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    UnknownTopology(String),
    UnsupportedWindow(usize),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::UnknownTopology(name) => write!(
                f,
                "unknown controller '{name}' (expected one of {})",
                TOPOLOGIES.join(", ")
            ),
            ControllerError::UnsupportedWindow(l) => {
                write!(f, "window {l} must be odd and at most {MAX_WINDOW}")
            }
        }
    }
}

impl Error for ControllerError {}

pub const TOPOLOGIES: [&str; 4] = [DumbAnn::NAME, SimpleAnn::NAME, SimpleAnnFB::NAME, SmartAnn::NAME];

pub trait Controller: Send + Sync {
    /// Topology name this controller was built from.
    fn descriptor(&self) -> &'static str;
    /// Side of the sensory window and movement neighborhood.
    fn window(&self) -> usize;
    fn arena(&self) -> &SlotArena;
    fn arena_mut(&mut self) -> &mut SlotArena;
    /// Number of heritable weights at the front of each slot.
    fn total_weights(&self) -> usize;

    /// `1 - zeros / weights` over the heritable weights of slot `idx`.
    fn complexity(&self, idx: usize) -> f32;

    /// Relocate every live, non-handling agent to its best-scoring neighbor
    /// cell and set its foraging strategy.
    fn move_agents(
        &mut self,
        landscape: &Landscape,
        agents: &mut [Individual],
        params: &PopulationConfig,
        seed: PassSeed,
    );

    /// Perturb weights (unless `fixed`) and clear the feedback scratch of every slot.
    fn mutate(&mut self, params: &PopulationConfig, fixed: bool, seed: PassSeed);

    fn n(&self) -> usize {
        self.arena().len()
    }

    fn state_size(&self) -> usize {
        self.arena().state_size()
    }

    fn stride(&self) -> usize {
        self.arena().stride()
    }

    fn type_size(&self) -> usize {
        self.arena().type_size()
    }

    fn weights(&self, idx: usize) -> &[f32] {
        self.arena().slot(idx)
    }

    fn weights_mut(&mut self, idx: usize) -> &mut [f32] {
        self.arena_mut().slot_mut(idx)
    }

    /// Copy slot `src_idx` of `src` into slot `dst_idx` of `self`.
    fn assign(&mut self, src: &dyn Controller, src_idx: usize, dst_idx: usize) {
        self.arena_mut().assign(src.arena(), src_idx, dst_idx);
    }
}

/// Build `n` zeroed controllers of the topology named by `descriptor`.
pub fn make_controller(
    descriptor: &str,
    window: usize,
    n: usize,
) -> Result<Box<dyn Controller>, ControllerError> {
    if window % 2 == 0 || window > MAX_WINDOW {
        return Err(ControllerError::UnsupportedWindow(window));
    }
    let controller: Box<dyn Controller> = match descriptor {
        DumbAnn::NAME => Box::new(ConcreteAnn::<DumbAnn>::new(window, n)),
        SimpleAnn::NAME => Box::new(ConcreteAnn::<SimpleAnn>::new(window, n)),
        SimpleAnnFB::NAME => Box::new(ConcreteAnn::<SimpleAnnFB>::new(window, n)),
        SmartAnn::NAME => Box::new(ConcreteAnn::<SmartAnn>::new(window, n)),
        other => return Err(ControllerError::UnknownTopology(other.to_string())),
    };
    Ok(controller)
}

pub struct ConcreteAnn<T: Topology> {
    window: usize,
    arena: SlotArena,
    _topology: PhantomData<T>,
}

impl<T: Topology> ConcreteAnn<T> {
    pub fn new(window: usize, n: usize) -> Self {
        Self {
            window,
            arena: SlotArena::new(n, T::STATE_SIZE),
            _topology: PhantomData,
        }
    }
}

/// Index of a uniformly chosen maximum of `scores`; NaN scores never win.
///
/// Returns `None` when no score is comparable.
pub(crate) fn pick_best<R: Rng + ?Sized>(scores: &[f32], rng: &mut R) -> Option<usize> {
    let max = scores
        .iter()
        .copied()
        .filter(|s| !s.is_nan())
        .reduce(f32::max)?;
    let ties = scores.iter().filter(|&&s| s == max).count();
    let pick = if ties > 1 { rng.random_range(0..ties) } else { 0 };
    scores
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s == max)
        .nth(pick)
        .map(|(i, _)| i)
}

/// `step` is `None` for a zero mutation step; the draw is skipped.
fn mutate_weights<R: Rng + ?Sized>(
    weights: &mut [f32],
    params: &PopulationConfig,
    step: Option<&Cauchy<f32>>,
    rng: &mut R,
) {
    for w in weights {
        if rng.random_bool(params.mutation_prob) {
            if let Some(step) = step {
                *w += step.sample(rng);
            }
        }
        if rng.random_bool(params.mutation_knockout) {
            *w = 0.0;
        }
    }
}

impl<T: Topology> Controller for ConcreteAnn<T> {
    fn descriptor(&self) -> &'static str {
        T::NAME
    }

    fn window(&self) -> usize {
        self.window
    }

    fn arena(&self) -> &SlotArena {
        &self.arena
    }

    fn arena_mut(&mut self) -> &mut SlotArena {
        &mut self.arena
    }

    fn total_weights(&self) -> usize {
        T::TOTAL_WEIGHTS
    }

    fn complexity(&self, idx: usize) -> f32 {
        if T::TOTAL_WEIGHTS == 0 {
            return 0.0;
        }
        let weights = &self.arena.slot(idx)[..T::TOTAL_WEIGHTS];
        let zeros = weights.iter().filter(|&&w| w == 0.0).count();
        1.0 - zeros as f32 / T::TOTAL_WEIGHTS as f32
    }

    fn move_agents(
        &mut self,
        landscape: &Landscape,
        agents: &mut [Individual],
        params: &PopulationConfig,
        seed: PassSeed,
    ) {
        debug_assert_eq!(agents.len(), self.arena.len());
        let side = self.window;
        let cells = side * side;
        let half = (side / 2) as i32;
        let stride = self.arena.stride();
        let sigma = params.noise_sigma;

        agents
            .par_chunks_mut(AGENT_CHUNK)
            .zip(self.arena.as_mut_slice().par_chunks_mut(AGENT_CHUNK * stride))
            .enumerate()
            .for_each(|(chunk, (inds, states))| {
                let mut rng = seed.stream(chunk);
                let mut windows = vec![vec![0.0f32; cells]; INPUTS];
                let mut scores = vec![0.0f32; cells];
                let mut strategies = vec![0.0f32; cells];

                for (ind, slot) in inds.iter_mut().zip(states.chunks_mut(stride)) {
                    if !ind.is_alive() || ind.handling {
                        continue;
                    }
                    let state = &mut slot[..T::STATE_SIZE];
                    for (window, layer) in windows.iter_mut().zip(params.input_layers) {
                        landscape.gather(layer, ind.pos, side, window);
                    }
                    for c in 0..cells {
                        let mut input = [0.0f32; INPUTS];
                        for (k, x) in input.iter_mut().enumerate() {
                            let noise = rng.random_range(1.0 - sigma..=1.0 + sigma);
                            *x = windows[k][c] * params.input_mask[k] * noise;
                        }
                        let out = forward::<T>(state, &input);
                        scores[c] = out[0];
                        strategies[c] = if params.obligate {
                            forward::<T>(state, &[0.0; INPUTS])[1]
                        } else {
                            out[1]
                        };
                    }
                    let choice = pick_best(&scores, &mut rng).unwrap_or(cells / 2);
                    let dx = (choice % side) as i32 - half;
                    let dy = (choice / side) as i32 - half;
                    ind.pos = landscape.offset(ind.pos, dx, dy);
                    ind.forage = params.forage || strategies[choice] >= 0.0;
                }
            });
    }

    fn mutate(&mut self, params: &PopulationConfig, fixed: bool, seed: PassSeed) {
        let stride = self.arena.stride();
        let step = Cauchy::new(0.0, params.mutation_step).ok();
        self.arena
            .as_mut_slice()
            .par_chunks_mut(AGENT_CHUNK * stride)
            .enumerate()
            .for_each(|(chunk, states)| {
                let mut rng = seed.stream(chunk);
                for slot in states.chunks_mut(stride) {
                    if !fixed {
                        mutate_weights(&mut slot[..T::TOTAL_WEIGHTS], params, step.as_ref(), &mut rng);
                    }
                    slot[T::SCRATCH_BEGIN..T::STATE_SIZE].fill(0.0);
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landscape::{Coordinate, Layer};
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn quiet_params() -> PopulationConfig {
        PopulationConfig {
            noise_sigma: 0.0,
            input_layers: [Layer::Items, Layer::Handlers, Layer::Klepts],
            ..PopulationConfig::default()
        }
    }

    #[test]
    fn unknown_descriptor_is_rejected() {
        assert_eq!(
            make_controller("HugeAnn", 3, 10).err(),
            Some(ControllerError::UnknownTopology("HugeAnn".into()))
        );
        assert_eq!(
            make_controller("SmartAnn", 4, 10).err(),
            Some(ControllerError::UnsupportedWindow(4))
        );
        for name in TOPOLOGIES {
            let c = make_controller(name, 5, 3).unwrap();
            assert_eq!(c.descriptor(), name);
            assert_eq!(c.n(), 3);
            assert!(c.stride() >= c.state_size());
            assert_eq!(c.type_size(), c.stride() * 4);
        }
    }

    #[test]
    fn tie_break_is_uniform_over_maxima() {
        let scores = [1.0, 3.0, 0.5, 3.0, 3.0, f32::NAN, 2.0, 3.0, -1.0];
        let tied = [1usize, 3, 4, 7];
        let mut counts = [0usize; 9];
        let trials = 8000;
        for seed in 0..trials {
            let mut rng = ChaCha12Rng::seed_from_u64(seed);
            counts[pick_best(&scores, &mut rng).unwrap()] += 1;
        }
        for (i, &count) in counts.iter().enumerate() {
            if tied.contains(&i) {
                let expected = trials as f64 / tied.len() as f64;
                assert!(
                    (count as f64 - expected).abs() < expected * 0.1,
                    "cell {i}: {count}"
                );
            } else {
                assert_eq!(count, 0, "cell {i} is not a maximum");
            }
        }
    }

    #[test]
    fn all_nan_scores_pick_nothing() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        assert_eq!(pick_best(&[f32::NAN; 4], &mut rng), None);
        assert_eq!(pick_best(&[], &mut rng), None);
    }

    #[test]
    fn zero_rates_leave_weights_untouched_and_clear_scratch() {
        let mut c = make_controller("SimpleAnnFB", 3, 300).unwrap();
        let weights = c.total_weights();
        for i in 0..c.n() {
            for (k, w) in c.weights_mut(i).iter_mut().enumerate() {
                *w = (i * 31 + k) as f32 * 0.25 - 3.0;
            }
        }
        let before: Vec<Vec<f32>> = (0..c.n()).map(|i| c.weights(i)[..weights].to_vec()).collect();
        let params = PopulationConfig {
            mutation_prob: 0.0,
            mutation_knockout: 0.0,
            ..PopulationConfig::default()
        };
        c.mutate(&params, false, PassSeed { seed: 5, pass: 1 });
        for i in 0..c.n() {
            assert_eq!(&c.weights(i)[..weights], before[i].as_slice());
            assert!(c.weights(i)[weights..].iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn fixed_mutation_only_clears_scratch() {
        let mut c = make_controller("SimpleAnnFB", 3, 4).unwrap();
        for i in 0..4 {
            c.weights_mut(i).fill(1.0);
        }
        let params = PopulationConfig {
            mutation_prob: 1.0,
            mutation_knockout: 1.0,
            ..PopulationConfig::default()
        };
        c.mutate(&params, true, PassSeed { seed: 0, pass: 0 });
        let weights = c.total_weights();
        for i in 0..4 {
            assert!(c.weights(i)[..weights].iter().all(|&w| w == 1.0));
            assert!(c.weights(i)[weights..].iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn cauchy_steps_perturb_every_weight_when_certain() {
        let mut c = make_controller("SimpleAnn", 3, 200).unwrap();
        let weights = c.total_weights();
        let params = PopulationConfig {
            mutation_prob: 1.0,
            mutation_step: 0.5,
            mutation_knockout: 0.0,
            ..PopulationConfig::default()
        };
        c.mutate(&params, false, PassSeed { seed: 11, pass: 2 });
        let steps: Vec<f32> = (0..c.n())
            .flat_map(|i| c.weights(i)[..weights].to_vec())
            .collect();
        assert!(steps.iter().all(|&w| w != 0.0 && w.is_finite()));
        // median of |X| for Cauchy(0, s) is s
        let below = steps.iter().filter(|w| w.abs() < 0.5).count() as f32;
        let share = below / steps.len() as f32;
        assert!((share - 0.5).abs() < 0.05, "share below scale {share}");

        let mut again = make_controller("SimpleAnn", 3, 200).unwrap();
        again.mutate(&params, false, PassSeed { seed: 11, pass: 2 });
        assert_eq!(again.arena(), c.arena());
    }

    #[test]
    fn zero_step_mutation_keeps_weights() {
        let mut c = make_controller("SimpleAnn", 3, 8).unwrap();
        c.weights_mut(3).fill(0.25);
        let params = PopulationConfig {
            mutation_prob: 1.0,
            mutation_step: 0.0,
            mutation_knockout: 0.0,
            ..PopulationConfig::default()
        };
        c.mutate(&params, false, PassSeed { seed: 4, pass: 1 });
        let weights = c.total_weights();
        assert!(c.weights(3)[..weights].iter().all(|&w| w == 0.25));
        assert!(c.weights(0)[..weights].iter().all(|&w| w == 0.0));
    }

    #[test]
    fn knockout_drives_complexity_to_zero() {
        let mut c = make_controller("SmartAnn", 3, 2).unwrap();
        c.weights_mut(0).fill(0.5);
        assert_eq!(c.complexity(0), 1.0);
        assert_eq!(c.complexity(1), 0.0);
        c.weights_mut(0)[..5].fill(0.0);
        assert!((c.complexity(0) - 0.75).abs() < 1e-6);

        let params = PopulationConfig {
            mutation_prob: 0.0,
            mutation_knockout: 1.0,
            ..PopulationConfig::default()
        };
        c.mutate(&params, false, PassSeed { seed: 3, pass: 0 });
        assert_eq!(c.complexity(0), 0.0);
    }

    #[test]
    fn agents_climb_toward_items() {
        let mut land = Landscape::new(32).unwrap();
        land.set(Layer::Items, Coordinate::new(11, 9), 4.0);
        let mut c = make_controller("SimpleAnn", 3, 1).unwrap();
        // output 0 = items, output 1 = bias +1 (forage)
        c.weights_mut(0)[0] = 1.0;
        c.weights_mut(0)[7] = 1.0;
        let mut agents = vec![Individual {
            pos: Coordinate::new(10, 10),
            ..Individual::default()
        }];
        c.move_agents(&land, &mut agents, &quiet_params(), PassSeed { seed: 1, pass: 0 });
        assert_eq!(agents[0].pos, Coordinate::new(11, 9));
        assert!(agents[0].forage);
    }

    #[test]
    fn handlers_and_dead_agents_stay_put() {
        let mut land = Landscape::new(32).unwrap();
        land.set(Layer::Items, Coordinate::new(1, 1), 4.0);
        let mut c = make_controller("SimpleAnn", 3, 2).unwrap();
        c.weights_mut(0)[0] = 1.0;
        c.weights_mut(1)[0] = 1.0;
        let mut agents = vec![Individual::default(), Individual::default()];
        agents[0].pick_item(3);
        agents[1].die();
        c.move_agents(&land, &mut agents, &quiet_params(), PassSeed { seed: 1, pass: 0 });
        assert_eq!(agents[0].pos, Coordinate::new(0, 0));
        assert_eq!(agents[1].pos, Coordinate::new(0, 0));
    }

    #[test]
    fn forage_override_and_obligate_strategy() {
        let land = Landscape::new(32).unwrap();
        let mut c = make_controller("SimpleAnn", 3, 1).unwrap();
        // strategy neuron: bias -1 => kleptoparasite unless forced
        c.weights_mut(0)[7] = -1.0;
        let mut agents = vec![Individual::default()];
        c.move_agents(&land, &mut agents, &quiet_params(), PassSeed { seed: 2, pass: 0 });
        assert!(!agents[0].forage);

        let forced = PopulationConfig {
            forage: true,
            ..quiet_params()
        };
        c.move_agents(&land, &mut agents, &forced, PassSeed { seed: 2, pass: 1 });
        assert!(agents[0].forage);

        // with obligate, only the bias matters; input weights are ignored
        c.weights_mut(0)[4] = 100.0;
        let obligate = PopulationConfig {
            obligate: true,
            ..quiet_params()
        };
        let mut land = land;
        land.layer_mut(Layer::Items).fill(1.0);
        c.move_agents(&land, &mut agents, &obligate, PassSeed { seed: 2, pass: 2 });
        assert!(!agents[0].forage);
    }

    #[test]
    fn movement_does_not_depend_on_worker_count() {
        let mut land = Landscape::new(64).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        for v in land.layer_mut(Layer::Items) {
            *v = rng.random_range(0..4) as f32;
        }
        let params = PopulationConfig::default();
        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            let mut c = make_controller("SmartAnn", 5, 500).unwrap();
            let mut rng = ChaCha12Rng::seed_from_u64(4);
            for i in 0..c.n() {
                for w in c.weights_mut(i) {
                    *w = rng.random_range(-1.0..1.0);
                }
            }
            let mut agents: Vec<Individual> = (0..500)
                .map(|i| Individual {
                    pos: Coordinate::new((i % 64) as i16, (i / 64) as i16),
                    ..Individual::default()
                })
                .collect();
            pool.install(|| {
                c.move_agents(&land, &mut agents, &params, PassSeed { seed: 9, pass: 3 })
            });
            agents
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn assign_copies_between_controllers() {
        let mut src = make_controller("SmartAnn", 3, 3).unwrap();
        let mut dst = make_controller("SmartAnn", 3, 3).unwrap();
        src.weights_mut(2).fill(0.125);
        dst.assign(src.as_ref(), 2, 0);
        assert_eq!(dst.weights(0), src.weights(2));
        assert!(dst.weights(1).iter().all(|&w| w == 0.0));
    }
}
