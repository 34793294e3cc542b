//! Static typing layer for tensors: shapes, coordinate maps, element tags.

pub mod coord;
pub mod dtype;
pub mod shape;

pub use coord::CoordMap;
pub use dtype::DType;
pub use shape::{DimT, NElemT, Shape, ShapeError, RANK_CAP};
