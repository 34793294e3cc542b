//! Reverse-mode symbolic differentiation.
//!
//! `derive(root, target)` returns a new expression graph representing
//! `d root / d target` — no numeric values are produced. The walk paints the
//! paths from root to target, visits the painted functors in descending
//! height order, folds each functor's accumulated super-composition
//! gradients into one seed, and chains that seed through the functor's
//! per-opcode rule for every painted argument.

use std::collections::HashMap;

use crate::graph::functor::Functor;
use crate::graph::node::{node_key, NodePtr};
use crate::graph::traveler::{collect_owners, HeightStat, PathFinder};
use crate::graph::GraphError;
use crate::ops::functional as f;
use crate::ops::opcode::{keys, Opcode};
use crate::tensor::{DimT, Shape};

/// Derivative of `root` with respect to `target`, as a symbolic graph.
pub fn derive(root: &NodePtr, target: &NodePtr) -> Result<NodePtr, GraphError> {
    if node_key(root.as_ref()) == node_key(target.as_ref()) {
        return Ok(f::ones_like(target));
    }

    let mut finder = PathFinder::new(target.as_ref());
    root.accept(&mut finder);
    if finder.roadmap().is_empty() {
        return Ok(f::zeros_like(target));
    }

    let mut stat = HeightStat::default();
    root.accept(&mut stat);
    let owners = collect_owners(std::slice::from_ref(root));

    let mut parents: Vec<NodePtr> = finder
        .roadmap()
        .keys()
        .map(|addr| {
            owners
                .get(addr)
                .cloned()
                .ok_or_else(|| GraphError::Internal("path node missing an owner".into()))
        })
        .collect::<Result<_, _>>()?;
    parents.sort_by(|a, b| {
        let ha = stat.height_of(a.as_ref());
        let hb = stat.height_of(b.as_ref());
        hb.cmp(&ha).then_with(|| b.label().cmp(&a.label()))
    });

    // addr → accumulated dRoot/dNode contributions
    let mut grads: HashMap<usize, Vec<NodePtr>> = HashMap::new();
    grads.insert(node_key(root.as_ref()), vec![f::ones_like(root)]);

    for parent in &parents {
        let contributions = grads
            .remove(&node_key(parent.as_ref()))
            .ok_or_else(|| GraphError::Internal("path parent has no seed gradient".into()))?;
        let seed = fold_sum(&contributions)?;
        let func = parent
            .as_functor()
            .ok_or_else(|| GraphError::Internal("path parent is not a functor".into()))?;
        let mut indices = finder.roadmap()[&node_key(parent.as_ref())].clone();
        indices.sort_unstable();
        let args = func.args();
        for wrt in indices {
            let step = gradient_step(parent, func, seed.clone(), wrt)?;
            let child_key = node_key(args[wrt].node().as_ref());
            grads.entry(child_key).or_default().push(step);
        }
    }

    let contributions = grads
        .remove(&node_key(target.as_ref()))
        .ok_or_else(|| GraphError::Internal("target received no gradient".into()))?;
    fold_sum(&contributions)
}

fn fold_sum(nodes: &[NodePtr]) -> Result<NodePtr, GraphError> {
    match nodes {
        [] => Err(GraphError::Internal("empty gradient sum".into())),
        [single] => Ok(single.clone()),
        many => f::add_n(many),
    }
}

/// One chain-rule step: `d parent / d args[wrt]` combined with the incoming
/// seed (`d root / d parent`). Rules follow the standard identities; an
/// out-of-range index on an n-ary op yields a zero-shaped gradient;
/// comparisons and random sources have constant-zero gradients.
pub fn gradient_step(
    parent: &NodePtr,
    func: &Functor,
    seed: NodePtr,
    wrt: usize,
) -> Result<NodePtr, GraphError> {
    let op = func.opcode();
    let args = func.args();
    let nodes: Vec<NodePtr> = args.iter().map(|a| a.node().clone()).collect();

    if wrt >= nodes.len() {
        return Ok(scalar_zero());
    }
    if op.has_zero_grad() {
        return Ok(f::zeros_like(&nodes[wrt]));
    }

    let check = |want: usize, expected: &'static str| -> Result<(), GraphError> {
        if nodes.len() != want {
            return Err(GraphError::BadArity {
                op: op.name(),
                expected,
                got: nodes.len(),
            });
        }
        Ok(())
    };

    match op {
        // unary family
        Opcode::Abs => {
            check(1, "1")?;
            // d|f| = f/|f|
            f::mul(&seed, &f::div(&nodes[0], parent)?)
        }
        Opcode::Neg => {
            check(1, "1")?;
            f::neg(&seed)
        }
        Opcode::Sin => {
            check(1, "1")?;
            f::mul(&seed, &f::cos(&nodes[0])?)
        }
        Opcode::Cos => {
            check(1, "1")?;
            f::neg(&f::mul(&seed, &f::sin(&nodes[0])?)?)
        }
        Opcode::Tan => {
            check(1, "1")?;
            let cos = f::cos(&nodes[0])?;
            f::div(&f::div(&seed, &cos)?, &cos)
        }
        Opcode::Exp => {
            check(1, "1")?;
            f::mul(&seed, parent)
        }
        Opcode::Log => {
            check(1, "1")?;
            f::div(&seed, &nodes[0])
        }
        Opcode::Sqrt => {
            check(1, "1")?;
            f::div(&seed, &f::add(parent, parent)?)
        }
        // rounding passes the gradient straight through
        Opcode::Round => {
            check(1, "1")?;
            Ok(seed)
        }

        // n-ary elementwise
        Opcode::Add => Ok(seed),
        Opcode::Sub => {
            check(2, "2")?;
            if wrt == 0 {
                Ok(seed)
            } else {
                f::neg(&seed)
            }
        }
        Opcode::Mul => {
            let mut product = seed;
            for (i, node) in nodes.iter().enumerate() {
                if i != wrt {
                    product = f::mul(&product, node)?;
                }
            }
            Ok(product)
        }
        Opcode::Div => {
            check(2, "2")?;
            if wrt == 0 {
                // d(f/g)/df = 1/g
                f::div(&seed, &nodes[1])
            } else {
                // d(f/g)/dg = -f/g^2
                let g2 = f::mul(&nodes[1], &nodes[1])?;
                f::neg(&f::div(&f::mul(&seed, &nodes[0])?, &g2)?)
            }
        }
        Opcode::Pow => {
            check(2, "2")?;
            if wrt == 0 {
                // d(f^g)/df = g * f^(g-1)
                let gm1 = f::sub(&nodes[1], &f::scalar(1.0))?;
                let lowered = f::pow(&nodes[0], &gm1)?;
                f::mul(&seed, &f::mul(&nodes[1], &lowered)?)
            } else {
                // d(f^g)/dg = f^g * log(f)
                f::mul(&seed, &f::mul(parent, &f::log(&nodes[0])?)?)
            }
        }
        Opcode::Min | Opcode::Max => {
            // selected where the winning element came from this argument
            let mask = f::eq(&nodes[wrt], parent)?;
            f::mul(&seed, &mask)
        }

        // reductions
        Opcode::ReduceSum => {
            check(1, "1")?;
            expand_to(&seed, nodes[0].shape(), reduce_dim(func)?)
        }
        Opcode::ReduceProd => {
            check(1, "1")?;
            let dim = reduce_dim(func)?;
            let spread = expand_to(&seed, nodes[0].shape(), dim)?;
            let total = expand_to(parent, nodes[0].shape(), dim)?;
            f::mul(&spread, &f::div(&total, &nodes[0])?)
        }
        Opcode::ReduceMin | Opcode::ReduceMax => {
            check(1, "1")?;
            let dim = reduce_dim(func)?;
            let spread = expand_to(&seed, nodes[0].shape(), dim)?;
            let winner = expand_to(parent, nodes[0].shape(), dim)?;
            f::mul(&spread, &f::eq(&nodes[0], &winner)?)
        }

        // structural
        Opcode::Matmul => {
            check(2, "2")?;
            let agroup = func.attrs().int(keys::AGROUP).unwrap_or(1) as usize;
            let bgroup = func.attrs().int(keys::BGROUP).unwrap_or(1) as usize;
            let brank = nodes[1].shape().rank();
            if brank == bgroup {
                return Err(GraphError::BadAttr {
                    op: op.name(),
                    detail: "cannot differentiate a contraction with no \
                             uncontracted right dimensions"
                        .into(),
                });
            }
            if wrt == 0 {
                f::matmul_grouped(&nodes[1], &seed, bgroup, brank - bgroup)
            } else {
                f::matmul_grouped(&seed, &nodes[0], brank - bgroup, agroup)
            }
        }
        Opcode::Permute => {
            check(1, "1")?;
            let order = func
                .attrs()
                .int_list(keys::ORDER)
                .ok_or(GraphError::MissingAttr {
                    op: op.name(),
                    key: keys::ORDER,
                })?;
            f::permute(&seed, &inverse_order(order))
        }
        Opcode::Extend => {
            check(1, "1")?;
            let factors = func
                .attrs()
                .int_list(keys::FACTORS)
                .ok_or(GraphError::MissingAttr {
                    op: op.name(),
                    key: keys::FACTORS,
                })?;
            if factors.is_empty() {
                return Ok(seed);
            }
            let rank = nodes[0].shape().rank();
            // rotate the appended dimensions to the front, then fold them
            let order: Vec<usize> = (rank..rank + factors.len()).collect();
            let rotated = f::permute(&seed, &order)?;
            f::reduce_sum(&rotated, factors.len())
        }
        Opcode::Reshape => {
            check(1, "1")?;
            f::reshape(&seed, nodes[0].shape().dims())
        }

        Opcode::Eq
        | Opcode::Ne
        | Opcode::Lt
        | Opcode::Gt
        | Opcode::RandUnif
        | Opcode::RandNorm => Ok(f::zeros_like(&nodes[wrt])),
    }
}

fn scalar_zero() -> NodePtr {
    crate::graph::leaf::Leaf::filled(Shape::scalar(), 0.0)
}

fn reduce_dim(func: &Functor) -> Result<usize, GraphError> {
    func.attrs()
        .int(keys::DIM)
        .map(|d| d as usize)
        .ok_or(GraphError::MissingAttr {
            op: func.opcode().name(),
            key: keys::DIM,
        })
}

/// Broadcasts a reduced gradient back to the pre-reduction shape: extend by
/// the folded dimensions, then rotate them to the front where they came
/// from.
fn expand_to(seed: &NodePtr, input: &Shape, dim: usize) -> Result<NodePtr, GraphError> {
    let removed: Vec<DimT> = input.dims()[..dim.min(input.rank())].to_vec();
    if removed.is_empty() {
        return Ok(seed.clone());
    }
    let kept = input.rank() - removed.len();
    let extended = f::extend(seed, &removed)?;
    let order: Vec<usize> = (kept..kept + removed.len()).collect();
    f::permute(&extended, &order)
}

fn inverse_order(order: &[i64]) -> Vec<usize> {
    let mut full: Vec<usize> = Vec::with_capacity(crate::tensor::RANK_CAP);
    let mut seen = [false; crate::tensor::RANK_CAP];
    for &axis in order {
        let axis = axis as usize;
        if axis < crate::tensor::RANK_CAP && !seen[axis] {
            seen[axis] = true;
            full.push(axis);
        }
    }
    for (axis, taken) in seen.iter().enumerate() {
        if !taken {
            full.push(axis);
        }
    }
    let mut inverse = vec![0usize; full.len()];
    for (i, &axis) in full.iter().enumerate() {
        inverse[axis] = i;
    }
    inverse
}
