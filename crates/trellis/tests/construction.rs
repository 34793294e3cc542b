use anyhow::Result;
use trellis::graph::attrs::Attrs;
use trellis::graph::functor::{FuncArg, Functor};
use trellis::graph::leaf::Leaf;
use trellis::graph::node::{Node, NodePtr};
use trellis::graph::GraphError;
use trellis::ops::functional as f;
use trellis::ops::Opcode;
use trellis::tensor::Shape;

fn zeros(dims: &[u16]) -> Result<NodePtr> {
    let shape = Shape::new(dims)?;
    let n = shape.n_elems() as usize;
    let leaf: NodePtr = Leaf::variable("input", shape, vec![0.0; n])?;
    Ok(leaf)
}

#[test]
fn elementwise_broadcasts_to_largest_operand() -> Result<()> {
    let a = zeros(&[4, 6])?;
    let b = zeros(&[1, 6])?;
    let sum = f::add(&a, &b)?;
    assert_eq!(sum.shape().trimmed(), vec![4, 6]);
    Ok(())
}

#[test]
fn elementwise_rejects_incompatible_shapes() -> Result<()> {
    let a = zeros(&[4, 6])?;
    let b = zeros(&[5, 6])?;
    let err = f::add(&a, &b).unwrap_err();
    assert!(matches!(err, GraphError::IncompatibleShapes { .. }));
    Ok(())
}

#[test]
fn scalars_broadcast_into_anything() -> Result<()> {
    let a = zeros(&[4, 6])?;
    let s = f::scalar(2.0);
    assert_eq!(f::mul(&a, &s)?.shape().trimmed(), vec![4, 6]);
    Ok(())
}

#[test]
fn unary_ops_require_exactly_one_argument() -> Result<()> {
    let a = zeros(&[3])?;
    let b = zeros(&[3])?;
    let err = Functor::new(
        Opcode::Abs,
        vec![FuncArg::new(a.clone()), FuncArg::new(b)],
        Attrs::new(),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::BadArity { got: 2, .. }));

    assert_eq!(f::abs(&a)?.shape().trimmed(), vec![3]);
    Ok(())
}

#[test]
fn functors_require_arguments() {
    let err = Functor::new(Opcode::Add, vec![], Attrs::new()).unwrap_err();
    assert!(matches!(err, GraphError::BadArity { got: 0, .. }));
}

#[test]
fn reduction_truncates_below_the_boundary() -> Result<()> {
    let x = zeros(&[3, 4, 5])?;
    assert_eq!(f::reduce_sum(&x, 1)?.shape().trimmed(), vec![4, 5]);
    assert_eq!(f::reduce_sum(&x, 2)?.shape().trimmed(), vec![5]);
    Ok(())
}

#[test]
fn reduction_at_zero_is_a_warned_noop() -> Result<()> {
    let x = zeros(&[3, 4, 5])?;
    let useless = f::reduce_sum(&x, 0)?;
    assert_eq!(useless.shape().trimmed(), vec![3, 4, 5]);
    Ok(())
}

#[test]
fn matmul_contracts_matching_groups() -> Result<()> {
    let a = zeros(&[3, 4])?;
    let b = zeros(&[4, 5])?;
    let out = f::matmul(&a, &b)?;
    assert_eq!(out.shape().trimmed(), vec![5, 3]);
    Ok(())
}

#[test]
fn matmul_rejects_mismatched_contraction() -> Result<()> {
    let a = zeros(&[3, 4])?;
    let b = zeros(&[6, 5])?;
    let err = f::matmul(&a, &b).unwrap_err();
    assert!(matches!(err, GraphError::IncompatibleShapes { .. }));
    Ok(())
}

#[test]
fn matmul_rejects_bad_groups() -> Result<()> {
    let a = zeros(&[3, 4])?;
    let b = zeros(&[4, 5])?;
    assert!(matches!(
        f::matmul_grouped(&a, &b, 0, 1).unwrap_err(),
        GraphError::BadAttr { .. }
    ));
    assert!(matches!(
        f::matmul_grouped(&a, &b, 3, 1).unwrap_err(),
        GraphError::BadAttr { .. }
    ));
    Ok(())
}

#[test]
fn permute_appends_unmentioned_dimensions() -> Result<()> {
    let x = zeros(&[3, 4, 5])?;
    assert_eq!(f::permute(&x, &[1, 0, 2])?.shape().trimmed(), vec![4, 3, 5]);
    assert_eq!(f::permute(&x, &[2])?.shape().trimmed(), vec![5, 3, 4]);
    Ok(())
}

#[test]
fn permute_rejects_repeats() -> Result<()> {
    let x = zeros(&[3, 4])?;
    assert!(f::permute(&x, &[0, 0]).is_err());
    Ok(())
}

#[test]
fn extend_appends_broadcast_dimensions() -> Result<()> {
    let x = zeros(&[2, 3])?;
    assert_eq!(f::extend(&x, &[4])?.shape().trimmed(), vec![2, 3, 4]);

    // extending by nothing is useless but legal
    let same = f::extend(&x, &[])?;
    assert_eq!(same.shape().trimmed(), vec![2, 3]);
    Ok(())
}

#[test]
fn extend_cannot_exceed_the_rank_cap() -> Result<()> {
    let x = zeros(&[2, 2, 2, 2, 2, 2, 2, 2])?;
    assert!(f::extend(&x, &[2]).is_err());
    Ok(())
}

#[test]
fn reshape_preserves_element_count() -> Result<()> {
    let x = zeros(&[4, 3])?;
    assert_eq!(f::reshape(&x, &[2, 6])?.shape().trimmed(), vec![2, 6]);
    assert!(matches!(
        f::reshape(&x, &[5, 2]).unwrap_err(),
        GraphError::IncompatibleShapes { .. }
    ));

    // scalars reshape into anything
    let s = f::scalar(1.0);
    assert_eq!(f::reshape(&s, &[3, 3])?.shape().trimmed(), vec![3, 3]);
    Ok(())
}

#[test]
fn shape_is_fixed_at_construction() -> Result<()> {
    let a = zeros(&[2, 2])?;
    let b = zeros(&[2, 2])?;
    let sum = f::add(&a, &b)?;
    let before = sum.shape().clone();
    a.as_leaf().unwrap().assign(&[1.0, 2.0, 3.0, 4.0])?;
    assert_eq!(sum.shape(), &before);
    Ok(())
}

#[test]
fn leaf_assign_bumps_version_unconditionally() -> Result<()> {
    let leaf = Leaf::variable("v", Shape::new(&[2])?, vec![1.0, 2.0])?;
    let start = leaf.meta().version();
    leaf.assign(&[1.0, 2.0])?;
    leaf.assign(&[1.0, 2.0])?;
    assert_eq!(leaf.meta().version(), start + 2);

    assert!(matches!(
        leaf.assign(&[1.0]).unwrap_err(),
        GraphError::DataLength { .. }
    ));
    Ok(())
}
