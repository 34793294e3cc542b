//! A queryable index over every node reachable from a root set.
//!
//! The index owns nothing beyond shared handles: it is a view built at
//! optimization start, mutated by [`GraphIndex::replace`], and discarded once
//! rewriting converges. Nodes are bucketed by structural signature so
//! pattern queries cost O(matches), and a parent map makes subtree
//! replacement touch only the affected functors instead of rewalking the
//! graph per conversion.

use std::collections::HashMap;

use crate::graph::node::{node_key, Node, NodePtr};
use crate::graph::traveler::{collect_owners, ParentFinder};
use crate::graph::GraphError;

/// Structural bucket key: node label plus argument count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub label: String,
    pub arity: usize,
}

fn signature_of(node: &dyn Node) -> Signature {
    Signature {
        label: node.label(),
        arity: node.as_functor().map(|f| f.args().len()).unwrap_or(0),
    }
}

/// Structural query over the index.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub label: Option<String>,
    pub arity: Option<usize>,
}

impl Query {
    /// Matches nodes with the given label (opcode name, leaf name, or
    /// remote `cluster/node` tag).
    pub fn labeled(label: impl Into<String>) -> Self {
        Query {
            label: Some(label.into()),
            arity: None,
        }
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }
}

/// Index of reachable nodes, parents, and owners for one root set.
pub struct GraphIndex {
    roots: Vec<NodePtr>,
    owners: HashMap<usize, NodePtr>,
    buckets: HashMap<Signature, Vec<usize>>,
    parents: HashMap<usize, HashMap<usize, Vec<usize>>>,
}

impl GraphIndex {
    /// Builds the index for a root set, sharing ownership of every
    /// reachable node.
    pub fn new(roots: Vec<NodePtr>) -> Self {
        let mut index = GraphIndex {
            roots,
            owners: HashMap::new(),
            buckets: HashMap::new(),
            parents: HashMap::new(),
        };
        index.refresh();
        index
    }

    fn refresh(&mut self) {
        self.owners = collect_owners(&self.roots);
        self.buckets.clear();
        for (addr, node) in &self.owners {
            self.buckets
                .entry(signature_of(node.as_ref()))
                .or_default()
                .push(*addr);
        }
        let mut finder = ParentFinder::default();
        for root in &self.roots {
            root.accept(&mut finder);
        }
        self.parents = finder.parents().clone();
    }

    pub fn roots(&self) -> &[NodePtr] {
        &self.roots
    }

    /// Number of indexed nodes.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn contains(&self, node: &dyn Node) -> bool {
        self.owners.contains_key(&node_key(node))
    }

    pub fn owner(&self, addr: usize) -> Option<&NodePtr> {
        self.owners.get(&addr)
    }

    /// Nodes matching the query. Label queries hit signature buckets
    /// directly; label-free queries scan the owner table.
    pub fn find(&self, query: &Query) -> Vec<NodePtr> {
        let mut out: Vec<NodePtr> = match &query.label {
            Some(label) => self
                .buckets
                .iter()
                .filter(|(sig, _)| {
                    sig.label == *label
                        && query.arity.map(|a| a == sig.arity).unwrap_or(true)
                })
                .flat_map(|(_, addrs)| addrs.iter())
                .filter_map(|addr| self.owners.get(addr).cloned())
                .collect(),
            None => self
                .owners
                .values()
                .filter(|node| match query.arity {
                    Some(a) => {
                        node.as_functor().map(|f| f.args().len()).unwrap_or(0) == a
                    }
                    None => true,
                })
                .cloned()
                .collect(),
        };
        out.sort_by_key(|node| node_key(node.as_ref()));
        out
    }

    /// Functor parents of `node` with the argument indices pointing at it.
    pub fn parents_of(&self, node: &dyn Node) -> Vec<(NodePtr, Vec<usize>)> {
        self.parents
            .get(&node_key(node))
            .map(|pmap| {
                pmap.iter()
                    .filter_map(|(paddr, idxs)| {
                        self.owners.get(paddr).map(|p| (p.clone(), idxs.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Applies a batch of `(old, new)` conversions.
    ///
    /// Conversions are interpreted against a snapshot of the parent map
    /// taken before any rewiring, so one conversion never observes another's
    /// half-applied state. For each pair: every parent argument pointing at
    /// `old` is rewired to `new`, surviving subscribers of `old` move to
    /// `new`, and root references to `old` are swapped. The index is
    /// refreshed once after the whole batch.
    pub fn replace(&mut self, conversions: &[(NodePtr, NodePtr)]) -> Result<(), GraphError> {
        let snapshot = self.parents.clone();
        for (old, new) in conversions {
            let old_key = node_key(old.as_ref());
            if old_key == node_key(new.as_ref()) {
                continue;
            }
            if let Some(pmap) = snapshot.get(&old_key) {
                for (paddr, idxs) in pmap {
                    let parent = self.owners.get(paddr).cloned().ok_or_else(|| {
                        GraphError::Internal("parent missing from owner table".into())
                    })?;
                    let func = parent.as_functor().ok_or_else(|| {
                        GraphError::Internal("parent entry is not a functor".into())
                    })?;
                    for &idx in idxs {
                        func.update_child(new.clone(), idx)?;
                    }
                }
            }
            if let (Some(old_func), Some(new_func)) = (old.as_functor(), new.as_functor()) {
                new_func.adopt_subscribers_from(old_func);
            }
            for root in &mut self.roots {
                if node_key(root.as_ref()) == old_key {
                    *root = new.clone();
                }
            }
        }
        self.refresh();
        Ok(())
    }
}
