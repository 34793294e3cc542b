//! Construction API: `Result`-returning builders for every opcode.
//!
//! Builders validate through shape inference, attach the coordinate map the
//! operation implies, and hand back the functor as a shared node. Prefer
//! these over constructing [`Functor`]s by hand.

use crate::graph::attrs::{AttrValue, Attrs};
use crate::graph::functor::{FuncArg, Functor};
use crate::graph::leaf::Leaf;
use crate::graph::node::NodePtr;
use crate::graph::GraphError;
use crate::ops::opcode::{keys, Opcode};
use crate::tensor::{CoordMap, DimT, Shape};

fn build(op: Opcode, args: Vec<FuncArg>, attrs: Attrs) -> Result<NodePtr, GraphError> {
    let func: NodePtr = Functor::new(op, args, attrs)?;
    Ok(func)
}

fn nary(op: Opcode, nodes: &[NodePtr]) -> Result<NodePtr, GraphError> {
    let args = nodes.iter().cloned().map(FuncArg::new).collect();
    build(op, args, Attrs::new())
}

fn unary(op: Opcode, node: &NodePtr) -> Result<NodePtr, GraphError> {
    nary(op, std::slice::from_ref(node))
}

fn binary(op: Opcode, lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    nary(op, &[lhs.clone(), rhs.clone()])
}

pub fn abs(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Abs, x)
}

pub fn neg(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Neg, x)
}

pub fn sin(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Sin, x)
}

pub fn cos(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Cos, x)
}

pub fn tan(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Tan, x)
}

pub fn exp(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Exp, x)
}

pub fn log(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Log, x)
}

pub fn sqrt(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Sqrt, x)
}

pub fn round(x: &NodePtr) -> Result<NodePtr, GraphError> {
    unary(Opcode::Round, x)
}

pub fn add(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Add, lhs, rhs)
}

pub fn sub(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Sub, lhs, rhs)
}

pub fn mul(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Mul, lhs, rhs)
}

pub fn div(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Div, lhs, rhs)
}

pub fn pow(base: &NodePtr, exponent: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Pow, base, exponent)
}

/// N-ary elementwise sum.
pub fn add_n(nodes: &[NodePtr]) -> Result<NodePtr, GraphError> {
    nary(Opcode::Add, nodes)
}

/// N-ary elementwise product.
pub fn mul_n(nodes: &[NodePtr]) -> Result<NodePtr, GraphError> {
    nary(Opcode::Mul, nodes)
}

/// N-ary elementwise minimum.
pub fn min_n(nodes: &[NodePtr]) -> Result<NodePtr, GraphError> {
    nary(Opcode::Min, nodes)
}

/// N-ary elementwise maximum.
pub fn max_n(nodes: &[NodePtr]) -> Result<NodePtr, GraphError> {
    nary(Opcode::Max, nodes)
}

pub fn eq(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Eq, lhs, rhs)
}

pub fn ne(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Ne, lhs, rhs)
}

pub fn lt(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Lt, lhs, rhs)
}

pub fn gt(lhs: &NodePtr, rhs: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::Gt, lhs, rhs)
}

/// Elementwise uniform sample over `[low, high)`.
pub fn rand_unif(low: &NodePtr, high: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::RandUnif, low, high)
}

/// Elementwise normal sample with the given mean and standard deviation.
pub fn rand_norm(mean: &NodePtr, stddev: &NodePtr) -> Result<NodePtr, GraphError> {
    binary(Opcode::RandNorm, mean, stddev)
}

fn reduce(op: Opcode, x: &NodePtr, dim: usize) -> Result<NodePtr, GraphError> {
    let map = CoordMap::reduce(dim)?;
    let attrs = Attrs::new().with(keys::DIM, AttrValue::Int(dim as i64));
    build(op, vec![FuncArg::mapped(map, x.clone())], attrs)
}

/// Sums away every dimension below `dim`.
pub fn reduce_sum(x: &NodePtr, dim: usize) -> Result<NodePtr, GraphError> {
    reduce(Opcode::ReduceSum, x, dim)
}

pub fn reduce_prod(x: &NodePtr, dim: usize) -> Result<NodePtr, GraphError> {
    reduce(Opcode::ReduceProd, x, dim)
}

pub fn reduce_min(x: &NodePtr, dim: usize) -> Result<NodePtr, GraphError> {
    reduce(Opcode::ReduceMin, x, dim)
}

pub fn reduce_max(x: &NodePtr, dim: usize) -> Result<NodePtr, GraphError> {
    reduce(Opcode::ReduceMax, x, dim)
}

/// Contraction with one uncontracted leading dimension on each side.
pub fn matmul(a: &NodePtr, b: &NodePtr) -> Result<NodePtr, GraphError> {
    matmul_grouped(a, b, 1, 1)
}

/// Grouped contraction: `agroup` uncontracted leading dimensions on the
/// left, `bgroup` contracted leading dimensions on the right.
pub fn matmul_grouped(
    a: &NodePtr,
    b: &NodePtr,
    agroup: usize,
    bgroup: usize,
) -> Result<NodePtr, GraphError> {
    let attrs = Attrs::new()
        .with(keys::AGROUP, AttrValue::Int(agroup as i64))
        .with(keys::BGROUP, AttrValue::Int(bgroup as i64));
    build(
        Opcode::Matmul,
        vec![FuncArg::new(a.clone()), FuncArg::new(b.clone())],
        attrs,
    )
}

/// Reorders dimensions; unmentioned ones keep their relative order.
pub fn permute(x: &NodePtr, order: &[usize]) -> Result<NodePtr, GraphError> {
    let map = CoordMap::permute(order)?;
    let attrs = Attrs::new().with(
        keys::ORDER,
        AttrValue::IntList(order.iter().map(|&o| o as i64).collect()),
    );
    build(Opcode::Permute, vec![FuncArg::mapped(map, x.clone())], attrs)
}

/// Appends broadcast dimensions after the input's rank.
pub fn extend(x: &NodePtr, factors: &[DimT]) -> Result<NodePtr, GraphError> {
    let map = CoordMap::extend(x.shape().rank(), factors)?;
    let attrs = Attrs::new().with(
        keys::FACTORS,
        AttrValue::IntList(factors.iter().map(|&f| i64::from(f)).collect()),
    );
    build(Opcode::Extend, vec![FuncArg::mapped(map, x.clone())], attrs)
}

/// Reinterprets the buffer under new dimensions.
pub fn reshape(x: &NodePtr, dims: &[DimT]) -> Result<NodePtr, GraphError> {
    let attrs = Attrs::new().with(
        keys::SHAPE,
        AttrValue::IntList(dims.iter().map(|&d| i64::from(d)).collect()),
    );
    build(Opcode::Reshape, vec![FuncArg::new(x.clone())], attrs)
}

/// Scalar constant node.
pub fn scalar(value: f32) -> NodePtr {
    Leaf::filled(Shape::scalar(), value)
}

/// Constant of the given node's shape, filled with `value`.
pub fn filled_like(node: &NodePtr, value: f32) -> NodePtr {
    Leaf::filled(node.shape().clone(), value)
}

/// Constant ones shaped like `node`.
pub fn ones_like(node: &NodePtr) -> NodePtr {
    filled_like(node, 1.0)
}

/// Constant zeros shaped like `node`.
pub fn zeros_like(node: &NodePtr) -> NodePtr {
    filled_like(node, 0.0)
}
