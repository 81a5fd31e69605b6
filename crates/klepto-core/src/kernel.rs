use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    Box,
    #[default]
    Gauss,
}

/// Square convolution kernel with odd side length, normalized to sum 1.
///
/// Weights are stored row-major; entry `i` sits at offset
/// `(i % side - side / 2, i / side - side / 2)` from the stamped cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    side: usize,
    weights: Vec<f32>,
}

impl Kernel {
    /// Returns `None` if `side` is even or zero.
    pub fn new(kind: KernelKind, side: usize) -> Option<Self> {
        if side == 0 || side % 2 == 0 {
            return None;
        }
        let radius = (side / 2) as i32;
        let mut weights = Vec::with_capacity(side * side);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let w = match kind {
                    KernelKind::Box => 1.0,
                    KernelKind::Gauss => (-0.5 * (dx * dx + dy * dy) as f32).exp(),
                };
                weights.push(w);
            }
        }
        let sum: f32 = weights.iter().sum();
        for w in &mut weights {
            *w /= sum;
        }
        Some(Self { side, weights })
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Weight at the kernel center.
    pub fn peak(&self) -> f32 {
        self.weights[self.weights.len() / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_are_normalized() {
        for kind in [KernelKind::Box, KernelKind::Gauss] {
            for side in [1, 3, 5, 7] {
                let k = Kernel::new(kind, side).unwrap();
                let sum: f32 = k.weights().iter().sum();
                assert!((sum - 1.0).abs() < 1e-5, "{kind:?}/{side}: sum {sum}");
            }
        }
    }

    #[test]
    fn gauss_peaks_at_center_and_is_symmetric() {
        let k = Kernel::new(KernelKind::Gauss, 5).unwrap();
        let w = k.weights();
        assert!(w.iter().all(|&x| x <= k.peak()));
        for i in 0..w.len() {
            assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-7);
        }
    }

    #[test]
    fn even_side_is_rejected() {
        assert!(Kernel::new(KernelKind::Box, 4).is_none());
        assert!(Kernel::new(KernelKind::Gauss, 0).is_none());
    }
}
