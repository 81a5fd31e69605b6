use crate::ann::INPUTS;
use crate::landscape::{Landscape, Layer};
use crate::population::Population;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io::{self, Write};

/// Distribution of one landscape layer over all cells.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct InputStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    /// Population standard deviation.
    pub std: f32,
    /// Mean absolute deviation around the mean.
    pub mad: f32,
}

impl InputStats {
    pub const FIELDS: usize = 5;

    pub fn reduce(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0f64;
        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        let mean = sum / n;
        let (mut var, mut mad) = (0.0f64, 0.0f64);
        for &v in values {
            let d = v as f64 - mean;
            var += d * d;
            mad += d.abs();
        }
        Self {
            min,
            max,
            mean: mean as f32,
            std: (var / n).sqrt() as f32,
            mad: (mad / n) as f32,
        }
    }

    fn fields(&self) -> [f64; Self::FIELDS] {
        [
            self.min as f64,
            self.max as f64,
            self.mean as f64,
            self.std as f64,
            self.mad as f64,
        ]
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationSummary {
    pub ave_fitness: f32,
    /// Agents with positive fitness.
    pub repro_ind: u32,
    /// Distinct parent controllers of the current generation.
    pub lineages: u32,
    /// Mean complexity over those distinct parent controllers.
    pub complexity: f32,
    pub foraged: f32,
    pub handled: f32,
    pub conflicts: u64,
    pub forager_intake: f32,
    pub klept_intake: f32,
}

impl GenerationSummary {
    /// Fields written per generation to `summary.bin`.
    pub const BINARY_FIELDS: usize = 7;

    pub fn assess(population: &Population, landscape: &Landscape) -> Self {
        let fitness = population.fitness();
        let n = fitness.len().max(1) as f64;
        let ave_fitness = fitness.iter().map(|&f| f as f64).sum::<f64>() / n;
        let repro_ind = fitness.iter().filter(|&&f| f > 0.0).count() as u32;

        let parents = population.ancestors();
        let weights = parents.total_weights();
        let unique_ancestors: BTreeSet<u32> =
            population.individuals().iter().map(|i| i.ancestor).collect();
        let mut unique_controllers: HashSet<Vec<u32>> = HashSet::new();
        let mut complexity = 0.0f64;
        for &anc in &unique_ancestors {
            let key: Vec<u32> = parents.weights(anc as usize)[..weights]
                .iter()
                .map(|w| w.to_bits())
                .collect();
            if unique_controllers.insert(key) {
                complexity += parents.complexity(anc as usize) as f64;
            }
        }
        let lineages = unique_controllers.len() as u32;

        Self {
            ave_fitness: ave_fitness as f32,
            repro_ind,
            lineages,
            complexity: if lineages > 0 {
                (complexity / lineages as f64) as f32
            } else {
                0.0
            },
            foraged: population.foraged().iter().sum(),
            handled: population.handled().iter().sum(),
            conflicts: population.conflicts(),
            forager_intake: landscape.layer(Layer::ForagersIntake).iter().sum(),
            klept_intake: landscape.layer(Layer::KleptsIntake).iter().sum(),
        }
    }

    fn binary_fields(&self) -> [f64; Self::BINARY_FIELDS] {
        [
            self.ave_fitness as f64,
            self.repro_ind as f64,
            self.lineages as f64,
            self.complexity as f64,
            self.foraged as f64,
            self.handled as f64,
            self.conflicts as f64,
        ]
    }
}

/// Per-generation summaries accumulated over a run.
#[derive(Clone, Debug, Default)]
pub struct Analysis {
    summaries: Vec<GenerationSummary>,
    inputs: Vec<[InputStats; INPUTS]>,
}

impl Analysis {
    pub fn generation(
        &mut self,
        population: &Population,
        landscape: &Landscape,
        input_layers: &[Layer; INPUTS],
    ) {
        self.inputs
            .push(input_layers.map(|layer| InputStats::reduce(landscape.layer(layer))));
        self.summaries
            .push(GenerationSummary::assess(population, landscape));
    }

    pub fn summaries(&self) -> &[GenerationSummary] {
        &self.summaries
    }

    pub fn inputs(&self) -> &[[InputStats; INPUTS]] {
        &self.inputs
    }

    pub fn last(&self) -> Option<&GenerationSummary> {
        self.summaries.last()
    }

    /// [`GenerationSummary::BINARY_FIELDS`] little-endian `f64` per generation.
    pub fn write_summary_bin<W: Write>(&self, mut w: W) -> io::Result<()> {
        for s in &self.summaries {
            for v in s.binary_fields() {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        w.flush()
    }

    /// `INPUTS x` [`InputStats::FIELDS`] little-endian `f64` per generation.
    pub fn write_input_bin<W: Write>(&self, mut w: W) -> io::Result<()> {
        for generation in &self.inputs {
            for stats in generation {
                for v in stats.fields() {
                    w.write_all(&v.to_le_bytes())?;
                }
            }
        }
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_matches_hand_computation() {
        let s = InputStats::reduce(&[1.0, 2.0, 3.0, 6.0]);
        assert_eq!((s.min, s.max, s.mean), (1.0, 6.0, 3.0));
        // deviations -2, -1, 0, 3
        assert!((s.std - (14.0f32 / 4.0).sqrt()).abs() < 1e-6);
        assert!((s.mad - 1.5).abs() < 1e-6);
    }

    #[test]
    fn constant_layer_has_zero_spread() {
        let s = InputStats::reduce(&[2.5; 64]);
        assert_eq!(s.std, 0.0);
        assert_eq!(s.mad, 0.0);
        assert_eq!(InputStats::reduce(&[]), InputStats::default());
    }

    #[test]
    fn summary_counts_distinct_parent_controllers() {
        let mut pop = Population::new(4, "SimpleAnn", 3).unwrap();
        let land = Landscape::new(32).unwrap();
        // parents 0 and 1 are identical, parent 2 differs
        for idx in 0..3 {
            pop.staging.controller.weights_mut(idx)[0] = if idx == 2 { 1.0 } else { 0.5 };
        }
        for (i, anc) in [0u32, 1, 2, 2].into_iter().enumerate() {
            pop.current.individuals[i].ancestor = anc;
        }
        pop.fitness = vec![0.0, 2.0, 1.0, 0.0];
        pop.foraged = vec![1.0, 1.0, 0.0, 2.0];
        pop.conflicts = 3;

        let s = GenerationSummary::assess(&pop, &land);
        assert_eq!(s.ave_fitness, 0.75);
        assert_eq!(s.repro_ind, 2);
        assert_eq!(s.lineages, 2);
        assert!((s.complexity - 1.0 / 8.0).abs() < 1e-6);
        assert_eq!(s.foraged, 4.0);
        assert_eq!(s.conflicts, 3);
    }

    #[test]
    fn binary_records_have_fixed_width() {
        let pop = Population::new(2, "DumbAnn", 3).unwrap();
        let land = Landscape::new(32).unwrap();
        let mut analysis = Analysis::default();
        for _ in 0..3 {
            analysis.generation(&pop, &land, &[Layer::Items, Layer::Foragers, Layer::Klepts]);
        }
        let mut summary = Vec::new();
        analysis.write_summary_bin(&mut summary).unwrap();
        assert_eq!(summary.len(), 3 * GenerationSummary::BINARY_FIELDS * 8);
        let mut inputs = Vec::new();
        analysis.write_input_bin(&mut inputs).unwrap();
        assert_eq!(inputs.len(), 3 * INPUTS * InputStats::FIELDS * 8);
    }
}
