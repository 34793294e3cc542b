//! Rewrite rules and the single-pass driver.
//!
//! A rule inspects the index and proposes `(old, new)` conversions; it never
//! mutates the graph itself. [`optimize`] applies each rule's conversions as
//! one batch and reports whether anything fired — callers decide whether to
//! run another pass, there is no built-in fixed-point loop.

use std::collections::HashMap;

use crate::graph::leaf::{Leaf, Usage};
use crate::graph::node::{node_key, Node, NodePtr};
use crate::graph::GraphError;
use crate::ops::opcode::Opcode;

use super::index::{GraphIndex, Query};

/// A structural match-and-replace rule.
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Conversions to apply, computed from the index snapshot.
    fn find(&self, index: &GraphIndex) -> Vec<(NodePtr, NodePtr)>;
}

/// Runs every rule once against the index. Returns whether any rule
/// produced conversions on this pass.
pub fn optimize(
    index: &mut GraphIndex,
    rules: &[Box<dyn RewriteRule>],
) -> Result<bool, GraphError> {
    let mut fired = false;
    for rule in rules {
        let conversions: Vec<(NodePtr, NodePtr)> = rule
            .find(index)
            .into_iter()
            .filter(|(old, new)| node_key(old.as_ref()) != node_key(new.as_ref()))
            .collect();
        if conversions.is_empty() {
            continue;
        }
        index.replace(&conversions)?;
        fired = true;
    }
    Ok(fired)
}

fn constant_filled(node: &dyn Node, value: f32) -> bool {
    match node.as_leaf() {
        Some(leaf) if leaf.usage() == Usage::Constant => {
            leaf.data().iter().all(|&v| v == value)
        }
        _ => false,
    }
}

/// Folds elementwise identities: `x + 0 → x`, `x * 1 → x`, `x * 0 → 0`.
///
/// Only fires when the surviving operand's shape equals the functor's output
/// shape, so folding never changes what downstream consumers see.
pub struct IdentityFold;

impl IdentityFold {
    fn fold_binary(
        index: &GraphIndex,
        op: Opcode,
        absorber: f32,
        out: &mut Vec<(NodePtr, NodePtr)>,
    ) {
        for node in index.find(&Query::labeled(op.name()).with_arity(2)) {
            let Some(func) = node.as_functor() else {
                continue;
            };
            let args = func.args();
            let (a, b) = (args[0].node().clone(), args[1].node().clone());
            let survivor = if constant_filled(a.as_ref(), absorber) {
                Some(b)
            } else if constant_filled(b.as_ref(), absorber) {
                Some(a)
            } else {
                None
            };
            let Some(survivor) = survivor else { continue };
            if survivor.shape() == node.shape() {
                out.push((node.clone(), survivor));
            }
        }
    }
}

impl RewriteRule for IdentityFold {
    fn name(&self) -> &'static str {
        "identity_fold"
    }

    fn find(&self, index: &GraphIndex) -> Vec<(NodePtr, NodePtr)> {
        let mut out = Vec::new();
        Self::fold_binary(index, Opcode::Add, 0.0, &mut out);
        Self::fold_binary(index, Opcode::Mul, 1.0, &mut out);
        // annihilation: any mul with an all-zero constant operand
        for node in index.find(&Query::labeled(Opcode::Mul.name()).with_arity(2)) {
            let Some(func) = node.as_functor() else {
                continue;
            };
            if func
                .args()
                .iter()
                .any(|arg| constant_filled(arg.node().as_ref(), 0.0))
            {
                let zero: NodePtr = Leaf::filled(node.shape().clone(), 0.0);
                out.push((node.clone(), zero));
            }
        }
        dedup_conversions(out)
    }
}

/// Structural common-subexpression elimination: functors with the same
/// opcode, the same argument identities, and the same attributes collapse to
/// the first occurrence. Non-idempotent ops (random sources) are never
/// merged — two samples are two samples.
pub struct DedupFunctors;

impl RewriteRule for DedupFunctors {
    fn name(&self) -> &'static str {
        "dedup_functors"
    }

    fn find(&self, index: &GraphIndex) -> Vec<(NodePtr, NodePtr)> {
        let mut seen: HashMap<String, NodePtr> = HashMap::new();
        let mut out = Vec::new();
        for node in index.find(&Query::default()) {
            let Some(func) = node.as_functor() else {
                continue;
            };
            if !func.opcode().is_idempotent() {
                continue;
            }
            let arg_ids: Vec<usize> = func
                .args()
                .iter()
                .map(|arg| node_key(arg.node().as_ref()))
                .collect();
            let fingerprint = format!(
                "{}|{:?}|{:?}",
                func.opcode().name(),
                arg_ids,
                func.attrs()
            );
            match seen.get(&fingerprint) {
                Some(first) => out.push((node.clone(), first.clone())),
                None => {
                    seen.insert(fingerprint, node.clone());
                }
            }
        }
        out
    }
}

fn dedup_conversions(conversions: Vec<(NodePtr, NodePtr)>) -> Vec<(NodePtr, NodePtr)> {
    let mut seen = std::collections::HashSet::new();
    conversions
        .into_iter()
        .filter(|(old, _)| seen.insert(node_key(old.as_ref())))
        .collect()
}
