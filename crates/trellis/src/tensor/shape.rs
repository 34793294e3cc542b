//! Capped-rank tensor shapes and dimension bookkeeping.
//!
//! A [`Shape`] stores up to [`RANK_CAP`] positive dimension sizes. Dimension 0
//! is the fastest-varying axis; any axis beyond the stored rank reads as 1,
//! so a shape of `[3, 2]` and a shape of `[3, 2, 1, 1]` describe the same
//! tensor extent. Shapes are immutable once constructed.

use std::fmt;

use smallvec::SmallVec;
use thiserror::Error;

/// Maximum number of dimensions a shape may carry.
pub const RANK_CAP: usize = 8;

/// Size of a single dimension.
pub type DimT = u16;

/// Flattened element index/count. Eight 16-bit dimensions never overflow u64.
pub type NElemT = u64;

type Dims = SmallVec<[DimT; RANK_CAP]>;

/// Violations of the shape construction contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("shape rank {got} exceeds the rank cap {RANK_CAP}")]
    RankOverflow { got: usize },
    #[error("shape dimensions must be positive, got {dims:?}")]
    ZeroDimension { dims: Vec<DimT> },
    #[error("axis {axis} appears more than once")]
    RepeatedAxis { axis: usize },
}

/// An ordered list of positive dimension sizes, at most [`RANK_CAP`] long.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Dims,
}

impl Shape {
    /// The scalar shape: rank 0, one element.
    pub fn scalar() -> Self {
        Shape { dims: Dims::new() }
    }

    /// Builds a shape from explicit dimensions.
    ///
    /// Fails if more than [`RANK_CAP`] dimensions are supplied or any
    /// dimension is zero; a failed construction produces no shape.
    pub fn new(dims: &[DimT]) -> Result<Self, ShapeError> {
        if dims.len() > RANK_CAP {
            return Err(ShapeError::RankOverflow { got: dims.len() });
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(ShapeError::ZeroDimension {
                dims: dims.to_vec(),
            });
        }
        Ok(Shape {
            dims: dims.iter().copied().collect(),
        })
    }

    /// Number of stored dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Dimension at `idx`; axes beyond the stored rank read as 1.
    pub fn at(&self, idx: usize) -> DimT {
        self.dims.get(idx).copied().unwrap_or(1)
    }

    /// The stored dimension slice.
    pub fn dims(&self) -> &[DimT] {
        &self.dims
    }

    /// Total number of elements described by the shape.
    pub fn n_elems(&self) -> NElemT {
        self.dims.iter().map(|&d| NElemT::from(d)).product()
    }

    /// Dimension list padded with trailing ones out to [`RANK_CAP`].
    pub fn to_list(&self) -> Vec<DimT> {
        let mut out: Vec<DimT> = self.dims.to_vec();
        out.resize(RANK_CAP, 1);
        out
    }

    /// Dimension list with trailing ones stripped.
    pub fn trimmed(&self) -> Vec<DimT> {
        let mut out: Vec<DimT> = self.dims.to_vec();
        while out.last() == Some(&1) {
            out.pop();
        }
        out
    }

    /// True when `self[0:idx)` matches `other[0:idx)` over the shared rank,
    /// treating a size of 1 on either side as compatible (broadcast).
    pub fn compatible_before(&self, other: &Shape, idx: usize) -> bool {
        let n = idx.min(self.rank()).min(other.rank());
        (0..n).all(|i| {
            let (a, b) = (self.at(i), other.at(i));
            a == 1 || b == 1 || a == b
        })
    }

    /// True when `self[idx:)` matches `other[idx:)`, requiring every axis
    /// past either stored rank to be 1 on both sides. `idx == 0` compares the
    /// entire shapes.
    pub fn compatible_after(&self, other: &Shape, idx: usize) -> bool {
        (idx..RANK_CAP).all(|i| self.at(i) == other.at(i))
    }
}

impl Default for Shape {
    fn default() -> Self {
        Shape::scalar()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
