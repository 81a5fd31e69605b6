//! Small fixed-topology networks evaluated in place on a flat weight block.
//!
//! Every network takes [`INPUTS`] sensory values and yields [`OUTPUTS`]
//! scores: output 0 ranks a candidate cell, output 1 picks the foraging
//! strategy. Networks with a single output neuron report 0 for output 1.
//!
//! State layout, layer after layer and neuron after neuron:
//! `fan_in` input weights, one bias, and one self-feedback weight if the
//! layer has feedback. All weights come first; the feedback scratch (the
//! previous output of every feedback neuron) follows at
//! [`Topology::SCRATCH_BEGIN`] and is not heritable.

pub const INPUTS: usize = 3;
pub const OUTPUTS: usize = 2;

/// Widest layer any topology may declare.
pub const MAX_WIDTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Always 0; used for null-model controllers.
    Zero,
    Identity,
    /// Rectified linear threshold unit.
    Rtlu,
    Tanh,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Zero => 0.0,
            Activation::Identity => x,
            Activation::Rtlu => x.max(0.0),
            Activation::Tanh => x.tanh(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayerSpec {
    pub neurons: usize,
    pub activation: Activation,
    pub feedback: bool,
}

impl LayerSpec {
    pub const fn new(neurons: usize, activation: Activation) -> Self {
        Self {
            neurons,
            activation,
            feedback: false,
        }
    }

    pub const fn with_feedback(neurons: usize, activation: Activation) -> Self {
        Self {
            neurons,
            activation,
            feedback: true,
        }
    }

    const fn weights_per_neuron(&self, fan_in: usize) -> usize {
        fan_in + 1 + if self.feedback { 1 } else { 0 }
    }
}

const fn count_weights(layers: &[LayerSpec]) -> usize {
    let mut total = 0;
    let mut fan_in = INPUTS;
    let mut i = 0;
    while i < layers.len() {
        total += layers[i].neurons * layers[i].weights_per_neuron(fan_in);
        fan_in = layers[i].neurons;
        i += 1;
    }
    total
}

const fn count_scratch(layers: &[LayerSpec]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < layers.len() {
        if layers[i].feedback {
            total += layers[i].neurons;
        }
        i += 1;
    }
    total
}

/// A concrete network shape, fixed at compile time.
pub trait Topology: Send + Sync + 'static {
    const NAME: &'static str;
    const LAYERS: &'static [LayerSpec];

    /// Heritable weights.
    const TOTAL_WEIGHTS: usize = count_weights(Self::LAYERS);
    const SCRATCH_BEGIN: usize = Self::TOTAL_WEIGHTS;
    const STATE_SIZE: usize = Self::TOTAL_WEIGHTS + count_scratch(Self::LAYERS);
}

/// Evaluate the network stored in `state` on `input`.
///
/// Feedback neurons read their previous output from the scratch region and
/// overwrite it with the new one.
pub fn forward<T: Topology>(state: &mut [f32], input: &[f32; INPUTS]) -> [f32; OUTPUTS] {
    debug_assert!(state.len() >= T::STATE_SIZE);
    let mut current = [0.0f32; MAX_WIDTH];
    current[..INPUTS].copy_from_slice(input);
    let mut fan_in = INPUTS;
    let mut w = 0;
    let mut scratch = T::SCRATCH_BEGIN;

    for layer in T::LAYERS {
        let mut next = [0.0f32; MAX_WIDTH];
        for out in next.iter_mut().take(layer.neurons) {
            let mut acc = 0.0f32;
            for &x in &current[..fan_in] {
                acc += state[w] * x;
                w += 1;
            }
            acc += state[w];
            w += 1;
            if layer.feedback {
                acc += state[w] * state[scratch];
                w += 1;
            }
            let y = layer.activation.apply(acc);
            if layer.feedback {
                state[scratch] = y;
                scratch += 1;
            }
            *out = y;
        }
        current = next;
        fan_in = layer.neurons;
    }

    let mut output = [0.0f32; OUTPUTS];
    let n = fan_in.min(OUTPUTS);
    output[..n].copy_from_slice(&current[..n]);
    output
}

/// Single zero-activation neuron: every cell scores 0.
pub struct DumbAnn;

impl Topology for DumbAnn {
    const NAME: &'static str = "DumbAnn";
    const LAYERS: &'static [LayerSpec] = &[LayerSpec::new(1, Activation::Zero)];
}

/// Two linear output neurons.
pub struct SimpleAnn;

impl Topology for SimpleAnn {
    const NAME: &'static str = "SimpleAnn";
    const LAYERS: &'static [LayerSpec] = &[LayerSpec::new(2, Activation::Identity)];
}

/// [`SimpleAnn`] with direct self-feedback on both neurons.
pub struct SimpleAnnFB;

impl Topology for SimpleAnnFB {
    const NAME: &'static str = "SimpleAnnFB";
    const LAYERS: &'static [LayerSpec] =
        &[LayerSpec::with_feedback(2, Activation::Identity)];
}

/// Three rectified hidden neurons feeding two linear outputs.
pub struct SmartAnn;

impl Topology for SmartAnn {
    const NAME: &'static str = "SmartAnn";
    const LAYERS: &'static [LayerSpec] = &[
        LayerSpec::new(3, Activation::Rtlu),
        LayerSpec::new(2, Activation::Identity),
    ];
}
