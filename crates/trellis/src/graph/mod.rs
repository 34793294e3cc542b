//! The DAG node model: leaves that own data, functors that cache results,
//! and the traveler machinery for walking shared graphs.

pub mod attrs;
pub mod functor;
pub mod leaf;
pub mod meta;
pub mod node;
pub mod traveler;

use thiserror::Error;

use crate::tensor::{Shape, ShapeError};

/// Violations of the graph construction contracts.
///
/// Every variant here is a programmer error by the severity table: a failed
/// construction never produces a node, and callers are expected to treat
/// these as fatal rather than retry.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("cannot {op} with {got} argument(s), expected {expected}")]
    BadArity {
        op: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("{op}: incompatible shapes {lhs} and {rhs}")]
    IncompatibleShapes {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },
    #[error("{op}: argument element types are not all the same")]
    TypeMismatch { op: &'static str },
    #[error("{op}: missing required attribute `{key}`")]
    MissingAttr { op: &'static str, key: &'static str },
    #[error("{op}: {detail}")]
    BadAttr { op: &'static str, detail: String },
    #[error("argument index {index} out of range for {len} argument(s)")]
    BadIndex { index: usize, len: usize },
    #[error("data length {got} does not match shape volume {expected}")]
    DataLength { expected: usize, got: usize },
    #[error("graph bookkeeping error: {0}")]
    Internal(String),
}
