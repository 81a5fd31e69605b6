use crate::arena::AlignedBuf;
use crate::config::ConfigError;
use crate::individual::{Individual, Role};
use crate::kernel::Kernel;
use serde::{Deserialize, Serialize};

/// Grid cell address. Components are kept as `i16` so a position packs into 32 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub x: i16,
    pub y: i16,
}

impl Coordinate {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// Named scalar fields of the landscape.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Convolved forager density.
    Foragers,
    /// Convolved kleptoparasite density.
    Klepts,
    /// Convolved handler density.
    Handlers,
    /// Food items available per cell.
    Items,
    /// Per-cell item capacity.
    Capacity,
    ForagersCount,
    KleptsCount,
    HandlersCount,
    /// Convolved density of every agent that is not handling.
    Nonhandlers,
    ItemsRec,
    ForagersRec,
    KleptsRec,
    ForagersIntake,
    KleptsIntake,
    Temp,
}

impl Layer {
    pub const COUNT: usize = 15;

    pub const ALL: [Layer; Layer::COUNT] = [
        Layer::Foragers,
        Layer::Klepts,
        Layer::Handlers,
        Layer::Items,
        Layer::Capacity,
        Layer::ForagersCount,
        Layer::KleptsCount,
        Layer::HandlersCount,
        Layer::Nonhandlers,
        Layer::ItemsRec,
        Layer::ForagersRec,
        Layer::KleptsRec,
        Layer::ForagersIntake,
        Layer::KleptsIntake,
        Layer::Temp,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Layers written by [`Landscape::update_occupancy`].
    pub const OCCUPANCY: [Layer; 7] = [
        Layer::Foragers,
        Layer::Klepts,
        Layer::Handlers,
        Layer::ForagersCount,
        Layer::KleptsCount,
        Layer::HandlersCount,
        Layer::Nonhandlers,
    ];
}

/// Square toroidal grid of [`Layer::COUNT`] layers in one aligned allocation.
///
/// The side length is a power of two so every coordinate wraps with
/// `c & (dim - 1)`, negative offsets included.
#[derive(Clone, Debug)]
pub struct Landscape {
    dim: usize,
    mask: i32,
    data: AlignedBuf,
}

impl Landscape {
    pub const MIN_DIM: usize = 32;
    /// Largest side whose coordinates still fit into `i16`.
    pub const MAX_DIM: usize = 1 << 14;

    pub fn new(dim: usize) -> Result<Self, ConfigError> {
        Self::check_dim(dim)?;
        Ok(Self {
            dim,
            mask: dim as i32 - 1,
            data: AlignedBuf::zeroed(Layer::COUNT * dim * dim),
        })
    }

    pub fn check_dim(dim: usize) -> Result<(), ConfigError> {
        if !dim.is_power_of_two() {
            return Err(ConfigError::DimensionNotPowerOfTwo(dim));
        }
        if dim < Self::MIN_DIM {
            return Err(ConfigError::DimensionTooSmall {
                min: Self::MIN_DIM,
                actual: dim,
            });
        }
        if dim > Self::MAX_DIM {
            return Err(ConfigError::DimensionTooLarge {
                max: Self::MAX_DIM,
                actual: dim,
            });
        }
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Cells per layer.
    pub fn cells(&self) -> usize {
        self.dim * self.dim
    }

    pub fn wrap(&self, c: Coordinate) -> Coordinate {
        Coordinate::new(
            (c.x as i32 & self.mask) as i16,
            (c.y as i32 & self.mask) as i16,
        )
    }

    /// `c + (dx, dy)`, wrapped.
    pub fn offset(&self, c: Coordinate, dx: i32, dy: i32) -> Coordinate {
        Coordinate::new(
            ((c.x as i32 + dx) & self.mask) as i16,
            ((c.y as i32 + dy) & self.mask) as i16,
        )
    }

    /// Row-major cell index of the wrapped coordinate.
    pub fn cell_index(&self, c: Coordinate) -> usize {
        let x = (c.x as i32 & self.mask) as usize;
        let y = (c.y as i32 & self.mask) as usize;
        y * self.dim + x
    }

    pub fn coordinate_of(&self, cell: usize) -> Coordinate {
        Coordinate::new((cell % self.dim) as i16, (cell / self.dim) as i16)
    }

    fn base(&self, layer: Layer) -> usize {
        layer.index() * self.cells()
    }

    pub fn layer(&self, layer: Layer) -> &[f32] {
        let base = self.base(layer);
        &self.data.as_slice()[base..base + self.cells()]
    }

    pub fn layer_mut(&mut self, layer: Layer) -> &mut [f32] {
        let base = self.base(layer);
        let cells = self.cells();
        &mut self.data.as_mut_slice()[base..base + cells]
    }

    pub fn get(&self, layer: Layer, c: Coordinate) -> f32 {
        self.data.as_slice()[self.base(layer) + self.cell_index(c)]
    }

    pub fn set(&mut self, layer: Layer, c: Coordinate, value: f32) {
        let idx = self.base(layer) + self.cell_index(c);
        self.data.as_mut_slice()[idx] = value;
    }

    pub fn add(&mut self, layer: Layer, c: Coordinate, delta: f32) {
        let idx = self.base(layer) + self.cell_index(c);
        self.data.as_mut_slice()[idx] += delta;
    }

    pub fn clear(&mut self, layer: Layer) {
        self.layer_mut(layer).fill(0.0);
    }

    /// Borrow `src` for reading and `dst` for writing at the same time.
    ///
    /// # Panics
    /// If `src == dst`.
    pub fn split_layers(&mut self, src: Layer, dst: Layer) -> (&[f32], &mut [f32]) {
        assert_ne!(src, dst, "split_layers needs two distinct layers");
        let cells = self.cells();
        let (s, d) = (self.base(src), self.base(dst));
        let data = self.data.as_mut_slice();
        if s < d {
            let (lo, hi) = data.split_at_mut(d);
            (&lo[s..s + cells], &mut hi[..cells])
        } else {
            let (lo, hi) = data.split_at_mut(s);
            (&hi[..cells], &mut lo[d..d + cells])
        }
    }

    /// Element-wise `dst += src`.
    pub fn accumulate(&mut self, src: Layer, dst: Layer) {
        let (src, dst) = self.split_layers(src, dst);
        for (d, s) in dst.iter_mut().zip(src) {
            *d += s;
        }
    }

    /// Read the `side x side` window of `layer` centered on `center` into `out`.
    pub fn gather(&self, layer: Layer, center: Coordinate, side: usize, out: &mut [f32]) {
        debug_assert_eq!(out.len(), side * side);
        let half = (side / 2) as i32;
        let src = self.layer(layer);
        for (i, v) in out.iter_mut().enumerate() {
            let dx = (i % side) as i32 - half;
            let dy = (i / side) as i32 - half;
            *v = src[self.cell_index(self.offset(center, dx, dy))];
        }
    }

    /// Add `kernel` onto `layer` centered on `center`.
    pub fn stamp_kernel(&mut self, layer: Layer, center: Coordinate, kernel: &Kernel) {
        let side = kernel.side();
        let half = (side / 2) as i32;
        let base = self.base(layer);
        for (i, &w) in kernel.weights().iter().enumerate() {
            let dx = (i % side) as i32 - half;
            let dy = (i / side) as i32 - half;
            let idx = base + self.cell_index(self.offset(center, dx, dy));
            self.data.as_mut_slice()[idx] += w;
        }
    }

    /// Rebuild the count and density layers from agent positions.
    ///
    /// Each live agent lands in exactly one of handlers / foragers /
    /// kleptoparasites. Non-handlers are also stamped into [`Layer::Nonhandlers`].
    pub fn update_occupancy(&mut self, agents: &[Individual], kernel: &Kernel) {
        for layer in Layer::OCCUPANCY {
            self.clear(layer);
        }
        for agent in agents {
            let Some(role) = agent.role() else {
                continue;
            };
            let (count, density) = match role {
                Role::Handler => (Layer::HandlersCount, Layer::Handlers),
                Role::Forager => (Layer::ForagersCount, Layer::Foragers),
                Role::Kleptoparasite => (Layer::KleptsCount, Layer::Klepts),
            };
            self.add(count, agent.pos, 1.0);
            self.stamp_kernel(density, agent.pos, kernel);
            if role != Role::Handler {
                self.stamp_kernel(Layer::Nonhandlers, agent.pos, kernel);
            }
        }
    }
}
