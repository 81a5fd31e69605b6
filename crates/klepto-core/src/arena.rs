//! Fixed-stride, 32-byte aligned float storage.
//!
//! Both the landscape layers and the controller weight blocks live in
//! [`Lane`]-backed buffers, so every layer and every controller slot starts
//! on a lane boundary. A slot's `state_size` counts the floats actually used;
//! its `stride` is that count padded to whole lanes.

use bytemuck::{Pod, Zeroable};

/// Number of floats per lane.
pub const LANE_WIDTH: usize = 8;

/// One 32-byte aligned group of floats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C, align(32))]
pub struct Lane(pub [f32; LANE_WIDTH]);

/// Round `floats` up to a whole number of lanes.
pub const fn lanes_for(floats: usize) -> usize {
    floats.div_ceil(LANE_WIDTH)
}

/// Zero-initialized aligned float buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedBuf {
    lanes: Vec<Lane>,
    len: usize,
}

impl AlignedBuf {
    pub fn zeroed(len: usize) -> Self {
        Self {
            lanes: vec![Lane::zeroed(); lanes_for(len)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[f32] {
        &bytemuck::cast_slice::<Lane, f32>(&self.lanes)[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<Lane, f32>(&mut self.lanes)[..len]
    }
}

/// `n` equally sized slots of `state_size` floats, each padded to `stride`.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotArena {
    n: usize,
    state_size: usize,
    stride: usize,
    buf: AlignedBuf,
}

impl SlotArena {
    pub fn new(n: usize, state_size: usize) -> Self {
        let stride = lanes_for(state_size) * LANE_WIDTH;
        Self {
            n,
            state_size,
            stride,
            buf: AlignedBuf::zeroed(n * stride),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Floats in use per slot.
    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Floats reserved per slot; always `>= state_size` and a multiple of [`LANE_WIDTH`].
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes reserved per slot.
    pub fn type_size(&self) -> usize {
        self.stride * std::mem::size_of::<f32>()
    }

    pub fn slot(&self, idx: usize) -> &[f32] {
        let start = idx * self.stride;
        &self.buf.as_slice()[start..start + self.state_size]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut [f32] {
        let start = idx * self.stride;
        let end = start + self.state_size;
        &mut self.buf.as_mut_slice()[start..end]
    }

    /// Copy slot `src_idx` of `src` into slot `dst_idx` of `self`.
    pub fn assign(&mut self, src: &SlotArena, src_idx: usize, dst_idx: usize) {
        debug_assert_eq!(self.state_size, src.state_size);
        let from = src.slot(src_idx);
        self.slot_mut(dst_idx).copy_from_slice(from);
    }

    /// The whole strided buffer, padding included.
    pub fn as_slice(&self) -> &[f32] {
        self.buf.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.buf.as_mut_slice()
    }

    /// Raw bytes of the strided buffer, for archival.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.buf.as_slice())
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.buf.as_mut_slice())
    }
}
