use crate::controller::{make_controller, Controller, ControllerError};
use crate::individual::Individual;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;

/// Individuals plus their controllers for one generation.
///
/// Index `i` of `individuals` and slot `i` of `controller` describe the same agent.
pub struct GenerationBuffer {
    pub individuals: Vec<Individual>,
    pub controller: Box<dyn Controller>,
}

impl GenerationBuffer {
    pub fn new(n: usize, descriptor: &str, window: usize) -> Result<Self, ControllerError> {
        Ok(Self {
            individuals: vec![Individual::default(); n],
            controller: make_controller(descriptor, window, n)?,
        })
    }
}

/// Fitness-proportional ancestor sampling.
///
/// Falls back to uniform sampling when no weight is positive.
#[derive(Clone, Debug, Default)]
pub struct FitnessDistribution {
    n: usize,
    weighted: Option<WeightedIndex<f32>>,
}

impl FitnessDistribution {
    pub fn rebuild(&mut self, fitness: &[f32]) {
        self.n = fitness.len();
        self.weighted = WeightedIndex::new(fitness.iter().copied()).ok();
    }

    pub fn is_uniform(&self) -> bool {
        self.weighted.is_none()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match &self.weighted {
            Some(weighted) => weighted.sample(rng),
            None => rng.random_range(0..self.n),
        }
    }
}

pub struct Population {
    pub(crate) current: GenerationBuffer,
    /// Next generation while reproducing; the previous one otherwise.
    pub(crate) staging: GenerationBuffer,
    pub(crate) fitness: Vec<f32>,
    pub(crate) foraged: Vec<f32>,
    pub(crate) handled: Vec<f32>,
    pub(crate) conflicts: u64,
    pub(crate) distribution: FitnessDistribution,
}

impl Population {
    pub fn new(n: usize, descriptor: &str, window: usize) -> Result<Self, ControllerError> {
        Ok(Self {
            current: GenerationBuffer::new(n, descriptor, window)?,
            staging: GenerationBuffer::new(n, descriptor, window)?,
            fitness: vec![0.0; n],
            foraged: vec![0.0; n],
            handled: vec![0.0; n],
            conflicts: 0,
            distribution: FitnessDistribution::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.current.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.individuals.is_empty()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.current.individuals
    }

    pub fn controller(&self) -> &dyn Controller {
        self.current.controller.as_ref()
    }

    /// Controllers of the previous generation, indexed by [`Individual::ancestor`].
    pub fn ancestors(&self) -> &dyn Controller {
        self.staging.controller.as_ref()
    }

    pub fn fitness(&self) -> &[f32] {
        &self.fitness
    }

    pub fn foraged(&self) -> &[f32] {
        &self.foraged
    }

    pub fn handled(&self) -> &[f32] {
        &self.handled
    }

    /// Contests resolved in the current generation.
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }

    /// Hand the staged generation over to `current`.
    pub(crate) fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.current, &mut self.staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn all_zero_fitness_samples_uniformly() {
        let mut dist = FitnessDistribution::default();
        dist.rebuild(&[0.0; 4]);
        assert!(dist.is_uniform());
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let mut counts = [0usize; 4];
        for _ in 0..4000 {
            counts[dist.sample(&mut rng)] += 1;
        }
        assert!(counts.iter().all(|&c| (800..1200).contains(&c)), "{counts:?}");
    }

    #[test]
    fn dominant_fitness_dominates_sampling() {
        let mut fitness = vec![0.01f32; 100];
        fitness[42] = 100.0;
        let mut dist = FitnessDistribution::default();
        dist.rebuild(&fitness);
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let hits = (0..10_000).filter(|_| dist.sample(&mut rng) == 42).count();
        assert!(hits > 9800, "{hits}");
    }

    #[test]
    fn zero_fitness_agents_are_never_sampled() {
        let mut dist = FitnessDistribution::default();
        dist.rebuild(&[0.0, 1.0, 0.0, 3.0]);
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        for _ in 0..1000 {
            let i = dist.sample(&mut rng);
            assert!(i == 1 || i == 3);
        }
    }

    #[test]
    fn swap_exchanges_generations() {
        let mut pop = Population::new(3, "SimpleAnn", 3).unwrap();
        pop.staging.individuals[1].ancestor = 7;
        pop.staging.controller.weights_mut(1)[0] = 2.5;
        pop.swap_buffers();
        assert_eq!(pop.individuals()[1].ancestor, 7);
        assert_eq!(pop.controller().weights(1)[0], 2.5);
        assert_eq!(pop.ancestors().weights(1)[0], 0.0);
    }
}
