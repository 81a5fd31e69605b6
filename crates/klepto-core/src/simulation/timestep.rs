use super::Simulation;
use crate::landscape::Layer;
use rand::Rng;
use std::time::Instant;

#[derive(Clone, Debug, Default)]
pub struct StepTimings {
    pub regrowth_us: u64,
    pub move_us: u64,
    pub occupancy_us: u64,
    pub contention_us: u64,
    pub total_us: u64,
}

impl Simulation {
    /// Every cell gains one item with probability `capacity * growth / max_capacity`,
    /// capped at its floored capacity.
    pub(crate) fn step_regrowth_phase(&mut self) {
        let lc = &self.config.landscape;
        let rate = lc.item_growth / lc.max_item_capacity;
        if rate <= 0.0 {
            return;
        }
        let rng = &mut self.rng;
        let (capacity, items) = self.landscape.split_layers(Layer::Capacity, Layer::Items);
        for (item, &cap) in items.iter_mut().zip(capacity) {
            let p = (cap * rate).clamp(0.0, 1.0) as f64;
            if p > 0.0 && rng.random_bool(p) {
                *item = (*item + 1.0).min(cap.floor());
            }
        }
    }

    fn step_move_phase(&mut self) {
        let seed = self.next_pass();
        let params = &self.config.agents;
        let landscape = &self.landscape;
        let current = &mut self.population.current;
        self.pool.install(|| {
            current
                .controller
                .move_agents(landscape, &mut current.individuals, params, seed)
        });
    }

    pub(crate) fn step_occupancy_phase(&mut self) {
        self.landscape
            .update_occupancy(&self.population.current.individuals, &self.kernel);
    }

    /// Running spatial records over the second half of the generation.
    fn step_record_phase(&mut self) {
        if self.timestep < self.timesteps / 2 {
            return;
        }
        self.landscape.accumulate(Layer::Items, Layer::ItemsRec);
        self.landscape
            .accumulate(Layer::ForagersCount, Layer::ForagersRec);
        self.landscape.accumulate(Layer::KleptsCount, Layer::KleptsRec);
    }

    /// Advance the world by one timestep.
    pub fn step(&mut self) -> StepTimings {
        let start = Instant::now();
        self.step_regrowth_phase();
        let t_regrowth = start.elapsed().as_micros() as u64;

        let t0 = Instant::now();
        self.step_move_phase();
        let t_move = t0.elapsed().as_micros() as u64;

        let t0 = Instant::now();
        self.step_occupancy_phase();
        let mut t_occupancy = t0.elapsed().as_micros() as u64;

        let t0 = Instant::now();
        self.step_contention_phase();
        self.step_foraging_phase();
        let t_contention = t0.elapsed().as_micros() as u64;

        let t0 = Instant::now();
        self.step_occupancy_phase();
        t_occupancy += t0.elapsed().as_micros() as u64;

        self.step_record_phase();

        StepTimings {
            regrowth_us: t_regrowth,
            move_us: t_move,
            occupancy_us: t_occupancy,
            contention_us: t_contention,
            total_us: start.elapsed().as_micros() as u64,
        }
    }
}
