//! Per-opcode output shape inference.
//!
//! These rules run once, at functor construction; the resulting shape is
//! cached immutably on the node and never recomputed. Contract violations
//! return an error so the functor is never built; useless-but-legal
//! constructions (reducing at dimension 0, extending by nothing, permuting
//! by nothing) build a functor and log a warning.

use tracing::warn;

use crate::graph::attrs::Attrs;
use crate::graph::functor::FuncArg;
use crate::graph::GraphError;
use crate::ops::opcode::{keys, OpKind, Opcode};
use crate::tensor::{DimT, Shape, RANK_CAP};

/// Infers the output shape for `op` applied to `args` with `attrs`.
pub fn infer_shape(op: Opcode, args: &[FuncArg], attrs: &Attrs) -> Result<Shape, GraphError> {
    match op.kind() {
        OpKind::Unary => unary(op, args),
        OpKind::Elementwise => elementwise(op, args),
        OpKind::Reduce => reduce(op, args, attrs),
        OpKind::Matmul => matmul(op, args, attrs),
        OpKind::Permute => permute(op, args, attrs),
        OpKind::Extend => extend(op, args, attrs),
        OpKind::Reshape => reshape(op, args, attrs),
    }
}

fn expect_arity(
    op: Opcode,
    args: &[FuncArg],
    want: usize,
    expected: &'static str,
) -> Result<(), GraphError> {
    if args.len() != want {
        return Err(GraphError::BadArity {
            op: op.name(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn unary(op: Opcode, args: &[FuncArg]) -> Result<Shape, GraphError> {
    expect_arity(op, args, 1, "1")?;
    Ok(args[0].node().shape().clone())
}

/// N-ary elementwise: the output is the argument with the largest element
/// count; every argument must be prefix-compatible with it over the shared
/// rank, except that single-element arguments broadcast freely.
fn elementwise(op: Opcode, args: &[FuncArg]) -> Result<Shape, GraphError> {
    if args.is_empty() {
        return Err(GraphError::BadArity {
            op: op.name(),
            expected: "at least 1",
            got: 0,
        });
    }
    let mut out = args[0].node().shape().clone();
    for arg in &args[1..] {
        let shape = arg.node().shape();
        if shape.n_elems() > out.n_elems() {
            out = shape.clone();
        }
    }
    for arg in args {
        let shape = arg.node().shape();
        if shape.n_elems() == 1 || out.n_elems() == 1 {
            continue;
        }
        let prefix = shape.rank().min(out.rank());
        if !shape.compatible_before(&out, prefix) {
            return Err(GraphError::IncompatibleShapes {
                op: op.name(),
                lhs: out.clone(),
                rhs: shape.clone(),
            });
        }
    }
    Ok(out)
}

/// Reduction folds away every dimension below the `dim` boundary. `dim == 0`
/// folds nothing — a useless node, allowed with a warning.
fn reduce(op: Opcode, args: &[FuncArg], attrs: &Attrs) -> Result<Shape, GraphError> {
    expect_arity(op, args, 1, "1")?;
    let dim = attrs.int(keys::DIM).ok_or(GraphError::MissingAttr {
        op: op.name(),
        key: keys::DIM,
    })?;
    if dim < 0 {
        return Err(GraphError::BadAttr {
            op: op.name(),
            detail: format!("reduction boundary must be non-negative, got {dim}"),
        });
    }
    let dim = dim as usize;
    let input = args[0].node().shape();
    if dim == 0 {
        warn!(op = op.name(), "reducing at dimension 0 does nothing");
        return Ok(input.clone());
    }
    let rank = input.rank();
    Ok(Shape::new(&input.dims()[dim.min(rank)..])?)
}

/// Grouped tensor contraction. With `agroup` uncontracted leading dimensions
/// on the left and `bgroup` contracted leading dimensions on the right, the
/// left's trailing dimensions must equal the right's leading ones; the
/// output is the right's uncontracted dimensions followed by the left's
/// uncontracted ones.
fn matmul(op: Opcode, args: &[FuncArg], attrs: &Attrs) -> Result<Shape, GraphError> {
    expect_arity(op, args, 2, "2")?;
    let agroup = attrs.int(keys::AGROUP).unwrap_or(1);
    let bgroup = attrs.int(keys::BGROUP).unwrap_or(1);
    if agroup <= 0 || bgroup <= 0 {
        return Err(GraphError::BadAttr {
            op: op.name(),
            detail: format!("group indices must be positive, got {agroup} and {bgroup}"),
        });
    }
    let (agroup, bgroup) = (agroup as usize, bgroup as usize);
    let a = args[0].node().shape();
    let b = args[1].node().shape();
    if agroup > a.rank() {
        return Err(GraphError::BadAttr {
            op: op.name(),
            detail: format!("agroup {agroup} exceeds left operand rank {}", a.rank()),
        });
    }
    if bgroup > b.rank() {
        return Err(GraphError::BadAttr {
            op: op.name(),
            detail: format!("bgroup {bgroup} exceeds right operand rank {}", b.rank()),
        });
    }
    let contracted_a = &a.dims()[agroup..];
    let contracted_b = &b.dims()[..bgroup];
    if contracted_a != contracted_b {
        return Err(GraphError::IncompatibleShapes {
            op: op.name(),
            lhs: a.clone(),
            rhs: b.clone(),
        });
    }
    let mut out: Vec<DimT> = b.dims()[bgroup..].to_vec();
    out.extend_from_slice(&a.dims()[..agroup]);
    Ok(Shape::new(&out)?)
}

/// Reorders dimensions per the `order` attribute; unmentioned dimensions
/// keep their relative order after the mentioned ones.
fn permute(op: Opcode, args: &[FuncArg], attrs: &Attrs) -> Result<Shape, GraphError> {
    expect_arity(op, args, 1, "1")?;
    let order = attrs.int_list(keys::ORDER).ok_or(GraphError::MissingAttr {
        op: op.name(),
        key: keys::ORDER,
    })?;
    let input = args[0].node().shape();
    if order.is_empty() {
        warn!(op = op.name(), "permuting with an empty order does nothing");
        return Ok(input.clone());
    }
    let mut visited = [false; RANK_CAP];
    let mut out: Vec<DimT> = Vec::with_capacity(RANK_CAP);
    for &axis in order {
        if axis < 0 || axis as usize >= RANK_CAP {
            return Err(GraphError::BadAttr {
                op: op.name(),
                detail: format!("permutation axis {axis} outside the rank cap"),
            });
        }
        let axis = axis as usize;
        if visited[axis] {
            return Err(GraphError::BadAttr {
                op: op.name(),
                detail: format!("permutation repeats axis {axis}"),
            });
        }
        visited[axis] = true;
        out.push(input.at(axis));
    }
    for (axis, seen) in visited.iter().enumerate().take(input.rank()) {
        if !seen {
            out.push(input.at(axis));
        }
    }
    while out.last() == Some(&1) && out.len() > input.rank() {
        out.pop();
    }
    Ok(Shape::new(&out)?)
}

/// Appends broadcast dimensions after the input's rank. An empty factor
/// list is a useless node, allowed with a warning.
fn extend(op: Opcode, args: &[FuncArg], attrs: &Attrs) -> Result<Shape, GraphError> {
    expect_arity(op, args, 1, "1")?;
    let factors = attrs
        .int_list(keys::FACTORS)
        .ok_or(GraphError::MissingAttr {
            op: op.name(),
            key: keys::FACTORS,
        })?;
    let input = args[0].node().shape();
    if factors.is_empty() {
        warn!(op = op.name(), "extending with an empty factor list does nothing");
        return Ok(input.clone());
    }
    if factors.iter().any(|&f| f <= 0) {
        return Err(GraphError::BadAttr {
            op: op.name(),
            detail: format!("extension factors must be positive, got {factors:?}"),
        });
    }
    let mut out: Vec<DimT> = input.dims().to_vec();
    out.extend(factors.iter().map(|&f| f as DimT));
    Ok(Shape::new(&out)?)
}

/// Reinterprets the buffer under new dimensions; the element count must be
/// preserved unless the input is a single-element broadcast source.
fn reshape(op: Opcode, args: &[FuncArg], attrs: &Attrs) -> Result<Shape, GraphError> {
    expect_arity(op, args, 1, "1")?;
    let dims = attrs.int_list(keys::SHAPE).ok_or(GraphError::MissingAttr {
        op: op.name(),
        key: keys::SHAPE,
    })?;
    if dims.iter().any(|&d| d <= 0) {
        return Err(GraphError::BadAttr {
            op: op.name(),
            detail: format!("reshape dimensions must be positive, got {dims:?}"),
        });
    }
    let list: Vec<DimT> = dims.iter().map(|&d| d as DimT).collect();
    let out = Shape::new(&list)?;
    let input = args[0].node().shape();
    if input.n_elems() > 1 && input.n_elems() != out.n_elems() {
        return Err(GraphError::IncompatibleShapes {
            op: op.name(),
            lhs: input.clone(),
            rhs: out,
        });
    }
    Ok(out)
}
