use super::Simulation;
use crate::landscape::{Coordinate, Landscape, Layer};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

fn flee_target<R: Rng + ?Sized>(
    landscape: &Landscape,
    from: Coordinate,
    radius: i32,
    rng: &mut R,
) -> Coordinate {
    landscape.offset(
        from,
        rng.random_range(-radius..=radius),
        rng.random_range(-radius..=radius),
    )
}

impl Simulation {
    /// Pair every eligible kleptoparasite with a random handler on its cell
    /// and resolve the contests in random order.
    ///
    /// Returns the `(attacker, victim)` pairs as recorded before shuffling.
    pub(crate) fn step_contention_phase(&mut self) -> Vec<(usize, usize)> {
        let landscape = &self.landscape;
        let agents = &mut self.population.current.individuals;
        let rng = &mut self.rng;

        let mut handlers: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, a) in agents.iter().enumerate() {
            if a.is_alive() && a.handling {
                handlers
                    .entry(landscape.cell_index(a.pos))
                    .or_default()
                    .push(i);
            }
        }

        let mut pairs = Vec::new();
        if !handlers.is_empty() {
            let handler_count = landscape.layer(Layer::HandlersCount);
            for (i, a) in agents.iter().enumerate() {
                if !a.is_alive() || a.handling || a.forage {
                    continue;
                }
                let cell = landscape.cell_index(a.pos);
                if handler_count[cell] < 1.0 {
                    continue;
                }
                let Some(victims) = handlers.get(&cell) else {
                    continue;
                };
                let victim = victims[rng.random_range(0..victims.len())];
                pairs.push((i, victim));
            }
        }
        let recorded = pairs.clone();
        pairs.shuffle(rng);

        let contest = &self.config.contest;
        let flee_radius = self.config.agents.flee_radius;
        let mut resolved = 0u64;
        for (attacker, victim) in pairs {
            if !agents[victim].handling {
                continue;
            }
            if !rng.random_bool(contest.fight_probability) {
                continue;
            }
            resolved += 1;
            if rng.random_bool(contest.attacker_win_probability) {
                let loser = agents[victim];
                agents[attacker].inherit_item(&loser);
                agents[victim].flee_to(flee_target(landscape, loser.pos, flee_radius, rng));
            } else {
                let from = agents[attacker].pos;
                agents[attacker].flee_to(flee_target(landscape, from, flee_radius, rng));
            }
        }
        self.population.conflicts += resolved;
        recorded
    }

    /// Handlers advance their countdown, foragers search; visited in random order.
    pub(crate) fn step_foraging_phase(&mut self) {
        let landscape = &mut self.landscape;
        let agents = &mut self.population.current.individuals;
        let rng = &mut self.rng;
        let detection = self.config.landscape.detection_rate;
        let handling_time = self.config.agents.handling_time;

        let mut order: Vec<usize> = (0..agents.len()).collect();
        order.shuffle(rng);
        for i in order {
            let a = &mut agents[i];
            if !a.is_alive() {
                continue;
            }
            if a.handling {
                a.handled += 1;
                if a.tick_handling() {
                    let intake = if a.forage {
                        Layer::ForagersIntake
                    } else {
                        Layer::KleptsIntake
                    };
                    landscape.add(intake, a.pos, 1.0);
                }
            } else if a.forage && !a.just_lost {
                a.foraged += 1;
                let items = landscape.get(Layer::Items, a.pos).floor();
                if items >= 1.0 {
                    let p = 1.0 - (1.0 - detection).powf(items as f64);
                    if rng.random_bool(p.clamp(0.0, 1.0)) {
                        a.pick_item(handling_time);
                        landscape.add(Layer::Items, a.pos, -1.0);
                    }
                }
            }
        }
        for a in agents.iter_mut() {
            a.just_lost = false;
        }
    }
}
