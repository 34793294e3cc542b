//! The abstract tensor node capability surface.

use std::sync::Arc;

use crate::distrib::reference::RemoteRef;
use crate::graph::functor::Functor;
use crate::graph::leaf::Leaf;
use crate::graph::meta::Meta;
use crate::graph::traveler::Visitor;
use crate::tensor::Shape;

/// Base capability every graph node exposes: a shape fixed at construction,
/// metadata (element type + data version), a buffer snapshot when one is
/// materialized, and visitor dispatch. The downcast hooks identify the
/// concrete variant without `Any` machinery.
pub trait Node: Send + Sync + std::fmt::Debug {
    /// The node's output shape, immutable after construction.
    fn shape(&self) -> &Shape;

    /// Element type tag and data version.
    fn meta(&self) -> &Meta;

    /// Snapshot of the node's current buffer, if materialized.
    fn value(&self) -> Option<Vec<f32>>;

    /// Human-readable tag: opcode name for functors, the given name for
    /// leaves, `cluster/node` for remote references.
    fn label(&self) -> String;

    /// Visitor dispatch.
    fn accept(&self, visitor: &mut dyn Visitor);

    fn as_leaf(&self) -> Option<&Leaf> {
        None
    }

    fn as_functor(&self) -> Option<&Functor> {
        None
    }

    fn as_remote(&self) -> Option<&RemoteRef> {
        None
    }
}

/// Shared ownership handle for graph nodes. Parents own children through
/// these; nothing owns a parent, so the graph is cycle-free by construction.
pub type NodePtr = Arc<dyn Node>;

/// Address-based identity for keying shared nodes in maps and sets. Stable
/// for as long as any `Arc` to the node is alive.
pub fn node_key(node: &dyn Node) -> usize {
    node as *const dyn Node as *const () as usize
}
