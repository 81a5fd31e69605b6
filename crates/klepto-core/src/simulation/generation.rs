use super::Simulation;
use crate::landscape::Layer;
use rand::Rng;
use rayon::prelude::*;

/// Layers accumulated over one generation and reset at turnover.
const GENERATION_RECORDS: [Layer; 5] = [
    Layer::ItemsRec,
    Layer::ForagersRec,
    Layer::KleptsRec,
    Layer::ForagersIntake,
    Layer::KleptsIntake,
];

impl Simulation {
    /// `max(0, food - complexity * penalty)` for live agents, 0 for dead ones.
    pub(crate) fn assess_fitness(&mut self) {
        let penalty = self.config.agents.complexity_penalty;
        let pop = &mut self.population;
        let controller = pop.current.controller.as_ref();
        let individuals = &pop.current.individuals;
        let fitness = &mut pop.fitness;
        self.pool.install(|| {
            fitness
                .par_iter_mut()
                .zip(individuals.par_iter())
                .enumerate()
                .for_each(|(i, (f, ind))| {
                    *f = if ind.is_alive() {
                        (ind.food - controller.complexity(i) * penalty).max(0.0)
                    } else {
                        0.0
                    };
                });
        });
        for ((foraged, handled), ind) in pop
            .foraged
            .iter_mut()
            .zip(pop.handled.iter_mut())
            .zip(individuals)
        {
            *foraged = ind.foraged as f32;
            *handled = ind.handled as f32;
        }
        pop.distribution.rebuild(&pop.fitness);
    }

    /// Fitness-proportional resampling into the staging buffer, mutation,
    /// then the buffer swap.
    pub(crate) fn reproduce(&mut self) {
        let radius = self.config.agents.sprout_radius;
        let pop = &mut self.population;
        let rng = &mut self.rng;
        for i in 0..pop.len() {
            let ancestor = pop.distribution.sample(rng);
            let parent = pop.current.individuals[ancestor].pos;
            let pos = self.landscape.offset(
                parent,
                rng.random_range(-radius..=radius),
                rng.random_range(-radius..=radius),
            );
            pop.staging.individuals[i].sprout(pos, ancestor as u32);
            pop.staging
                .controller
                .assign(pop.current.controller.as_ref(), ancestor, i);
        }

        let seed = self.next_pass();
        let fixed = self.fixed;
        let params = &self.config.agents;
        let staging = &mut self.population.staging;
        self.pool
            .install(|| staging.controller.mutate(params, fixed, seed));

        self.population.swap_buffers();
        self.population.conflicts = 0;
        for layer in GENERATION_RECORDS {
            self.landscape.clear(layer);
        }
        self.step_occupancy_phase();
    }
}
