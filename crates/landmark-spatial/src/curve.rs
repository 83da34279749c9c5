//! Hilbert curve indexer.
//!
//! Coordinates are quantized onto a `2^bits` grid per axis over the cube
//! `[min, max]^3` and mapped to a Hilbert index using Skilling's transpose
//! algorithm ("Programming the Hilbert curve", AIP Conf. Proc. 707, 2004).
//! Consecutive keys are always face-adjacent grid cells, so nearby
//! coordinates get nearby keys in expectation.

use landmark_types::{Bounds, Coord, IndexParams, OutOfBoundsPolicy, PROJECTED_DIMS};

use crate::error::IndexError;

/// Grid cell on each axis.
pub type Cell = [u32; PROJECTED_DIMS];

/// Curve key plus whether the coordinate had to be clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linearized {
    pub key: u64,
    pub clamped: bool,
}

/// Maps projected coordinates to sortable curve keys.
#[derive(Debug, Clone, Copy)]
pub struct CurveIndexer {
    bounds: Bounds,
    bits: u8,
    policy: OutOfBoundsPolicy,
}

impl CurveIndexer {
    pub fn new(params: &IndexParams) -> Result<Self, IndexError> {
        params.validate().map_err(IndexError::InvalidParams)?;
        Ok(Self {
            bounds: params.bounds,
            bits: params.resolution_bits,
            policy: params.out_of_bounds,
        })
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn resolution_bits(&self) -> u8 {
        self.bits
    }

    pub fn policy(&self) -> OutOfBoundsPolicy {
        self.policy
    }

    /// Curve key for a coordinate, honoring the out-of-bounds policy.
    pub fn linearize(&self, coord: &Coord) -> Result<u64, IndexError> {
        self.encode(coord).map(|l| l.key)
    }

    /// Like [`linearize`](Self::linearize), also reporting clamping.
    pub fn encode(&self, coord: &Coord) -> Result<Linearized, IndexError> {
        check_finite(coord)?;
        let inside = self.bounds.contains(coord);
        if !inside && self.policy == OutOfBoundsPolicy::Reject {
            return Err(IndexError::OutOfBounds {
                coord: *coord,
                bounds: self.bounds,
            });
        }
        Ok(Linearized {
            key: hilbert_key(self.quantize(coord), self.bits),
            clamped: !inside,
        })
    }

    /// Always clamp, regardless of policy.
    ///
    /// Used when re-keying entries that were already accepted.
    pub fn encode_lossy(&self, coord: &Coord) -> Result<Linearized, IndexError> {
        check_finite(coord)?;
        Ok(Linearized {
            key: hilbert_key(self.quantize(coord), self.bits),
            clamped: !self.bounds.contains(coord),
        })
    }

    /// Grid cell of a coordinate, clamped into the domain.
    pub fn quantize(&self, coord: &Coord) -> Cell {
        let cells = 1u64 << self.bits;
        let span = self.bounds.span() as f64;
        let mut cell = [0u32; PROJECTED_DIMS];
        for (q, c) in cell.iter_mut().zip(coord) {
            let t = ((*c as f64 - self.bounds.min as f64) / span).clamp(0.0, 1.0);
            *q = ((t * cells as f64) as u64).min(cells - 1) as u32;
        }
        cell
    }

    /// Grid cell addressed by a key.
    pub fn delinearize(&self, key: u64) -> Cell {
        hilbert_cell(key, self.bits)
    }
}

fn check_finite(coord: &Coord) -> Result<(), IndexError> {
    if coord.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(IndexError::InvalidCoordinate(*coord))
    }
}

/// Hilbert index of a grid cell with `bits` bits per axis.
pub fn hilbert_key(cell: Cell, bits: u8) -> u64 {
    let mut x = cell;
    axes_to_transpose(&mut x, bits as u32);
    interleave(&x, bits as u32)
}

/// Grid cell at a Hilbert index; inverse of [`hilbert_key`].
pub fn hilbert_cell(key: u64, bits: u8) -> Cell {
    let mut x = deinterleave(key, bits as u32);
    transpose_to_axes(&mut x, bits as u32);
    x
}

fn axes_to_transpose(x: &mut Cell, bits: u32) {
    let n = PROJECTED_DIMS;
    let m = 1u32 << (bits - 1);

    // Inverse undo
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    let mut q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for v in x.iter_mut() {
        *v ^= t;
    }
}

fn transpose_to_axes(x: &mut Cell, bits: u32) {
    let n = PROJECTED_DIMS;
    let limit = 2u32 << (bits - 1);

    // Gray decode
    let t = x[n - 1] >> 1;
    for i in (1..n).rev() {
        x[i] ^= x[i - 1];
    }
    x[0] ^= t;

    // Undo excess work
    let mut q = 2;
    while q != limit {
        let p = q - 1;
        for i in (0..n).rev() {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q <<= 1;
    }
}

/// Most significant bit first, axis 0 first within each bit plane.
fn interleave(x: &Cell, bits: u32) -> u64 {
    let mut key = 0u64;
    for b in (0..bits).rev() {
        for v in x {
            key = (key << 1) | ((*v >> b) & 1) as u64;
        }
    }
    key
}

fn deinterleave(key: u64, bits: u32) -> Cell {
    let mut x = [0u32; PROJECTED_DIMS];
    let total = bits * PROJECTED_DIMS as u32;
    for pos in 0..total {
        let bit = ((key >> (total - 1 - pos)) & 1) as u32;
        let axis = (pos as usize) % PROJECTED_DIMS;
        let plane = bits - 1 - pos / PROJECTED_DIMS as u32;
        x[axis] |= bit << plane;
    }
    x
}
