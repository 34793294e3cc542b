//! Affine coordinate transforms between tensor shapes.
//!
//! A [`CoordMap`] is a square homogeneous matrix one row/column wider than
//! the rank cap. Applying it maps an input coordinate (or a whole shape) to
//! an output coordinate; composing two maps is matrix multiplication under a
//! row-vector convention, so `a.compose(&b)` applied to a shape equals `b`
//! applied to the result of `a`. The constructors cover the transforms a
//! functor argument may carry: identity, prefix reduction, trailing
//! extension, and permutation. Maps are immutable and shared by reference —
//! many functors reuse the same transform.

use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::warn;

use super::shape::{DimT, Shape, ShapeError, RANK_CAP};

/// Matrix edge length: one homogeneous row/column beyond the rank cap.
pub const MAT_DIM: usize = RANK_CAP + 1;

type Matrix = [[f64; MAT_DIM]; MAT_DIM];

static IDENTITY: Lazy<Arc<CoordMap>> = Lazy::new(|| {
    let mut fwd = [[0.0; MAT_DIM]; MAT_DIM];
    for (i, row) in fwd.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    Arc::new(CoordMap { fwd })
});

/// Homogeneous affine transform over capped-rank coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordMap {
    fwd: Matrix,
}

impl CoordMap {
    /// The shared identity transform.
    pub fn identity() -> Arc<CoordMap> {
        Arc::clone(&IDENTITY)
    }

    /// Transform that drops the first `dim` coordinates, shifting the rest
    /// down. `dim == 0` is legal but useless and only warned about.
    pub fn reduce(dim: usize) -> Result<Arc<CoordMap>, ShapeError> {
        if dim > RANK_CAP {
            return Err(ShapeError::RankOverflow { got: dim });
        }
        if dim == 0 {
            warn!("reduction over zero dimensions does nothing");
            return Ok(Self::identity());
        }
        let mut fwd = [[0.0; MAT_DIM]; MAT_DIM];
        for i in 0..(RANK_CAP - dim) {
            fwd[dim + i][i] = 1.0;
        }
        fwd[MAT_DIM - 1][MAT_DIM - 1] = 1.0;
        Ok(Arc::new(CoordMap { fwd }))
    }

    /// Transform that multiplies the coordinates starting at `rank` by the
    /// given broadcast factors. An empty factor list is legal but useless.
    pub fn extend(rank: usize, factors: &[DimT]) -> Result<Arc<CoordMap>, ShapeError> {
        if factors.iter().any(|&f| f == 0) {
            return Err(ShapeError::ZeroDimension {
                dims: factors.to_vec(),
            });
        }
        if rank + factors.len() > RANK_CAP {
            return Err(ShapeError::RankOverflow {
                got: rank + factors.len(),
            });
        }
        if factors.is_empty() {
            warn!("extension with an empty factor list does nothing");
            return Ok(Self::identity());
        }
        let mut fwd = [[0.0; MAT_DIM]; MAT_DIM];
        for (i, row) in fwd.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        for (i, &f) in factors.iter().enumerate() {
            fwd[rank + i][rank + i] = f64::from(f);
        }
        Ok(Arc::new(CoordMap { fwd }))
    }

    /// Transform that reorders coordinates. Unmentioned axes keep their
    /// relative order after the mentioned ones; repeated entries are
    /// rejected. An empty order is legal but useless.
    pub fn permute(order: &[usize]) -> Result<Arc<CoordMap>, ShapeError> {
        if order.is_empty() {
            warn!("permutation with an empty order does nothing");
            return Ok(Self::identity());
        }
        let mut visited = [false; RANK_CAP];
        let mut full: Vec<usize> = Vec::with_capacity(RANK_CAP);
        for &axis in order {
            if axis >= RANK_CAP {
                return Err(ShapeError::RankOverflow { got: axis });
            }
            if visited[axis] {
                return Err(ShapeError::RepeatedAxis { axis });
            }
            visited[axis] = true;
            full.push(axis);
        }
        for (axis, seen) in visited.iter().enumerate() {
            if !seen {
                full.push(axis);
            }
        }
        let mut fwd = [[0.0; MAT_DIM]; MAT_DIM];
        for (i, &axis) in full.iter().enumerate() {
            fwd[axis][i] = 1.0;
        }
        fwd[MAT_DIM - 1][MAT_DIM - 1] = 1.0;
        Ok(Arc::new(CoordMap { fwd }))
    }

    /// Matrix product under the row-vector convention: applying the result
    /// equals applying `self` first, then `other`.
    pub fn compose(&self, other: &CoordMap) -> CoordMap {
        let mut fwd = [[0.0; MAT_DIM]; MAT_DIM];
        for i in 0..MAT_DIM {
            for j in 0..MAT_DIM {
                let mut acc = 0.0;
                for (k, row) in other.fwd.iter().enumerate() {
                    acc += self.fwd[i][k] * row[j];
                }
                fwd[i][j] = acc;
            }
        }
        CoordMap { fwd }
    }

    /// Applies the transform to a shape, producing the mapped shape.
    ///
    /// Coordinates fold through the homogeneous column; negative intermediate
    /// values reflect to their positive counterpart and every output
    /// dimension is rounded up and clamped to at least 1, so dropped
    /// coordinates collapse to broadcastable axes.
    pub fn convert(&self, shape: &Shape) -> Shape {
        let mut input = [1.0f64; MAT_DIM];
        for (i, slot) in input.iter_mut().enumerate().take(RANK_CAP) {
            *slot = f64::from(shape.at(i));
        }
        let mut out = [0.0f64; MAT_DIM];
        for (i, row) in self.fwd.iter().enumerate() {
            for (j, slot) in out.iter_mut().enumerate() {
                *slot += input[i] * row[j];
            }
        }
        let scale = if out[RANK_CAP] == 0.0 { 1.0 } else { out[RANK_CAP] };
        let mut dims = [1 as DimT; RANK_CAP];
        for (j, slot) in dims.iter_mut().enumerate() {
            let mut cd = out[j] / scale;
            if cd < 0.0 {
                cd = -cd - 1.0;
            }
            *slot = (cd.ceil() as i64).max(1) as DimT;
        }
        let mut list: Vec<DimT> = dims.to_vec();
        while list.last() == Some(&1) {
            list.pop();
        }
        Shape::new(&list).expect("converted coordinates stay within the rank cap")
    }

    /// True when the transform is the identity matrix.
    pub fn is_identity(&self) -> bool {
        self.fwd
            .iter()
            .enumerate()
            .all(|(i, row)| {
                row.iter()
                    .enumerate()
                    .all(|(j, &v)| v == if i == j { 1.0 } else { 0.0 })
            })
    }
}
