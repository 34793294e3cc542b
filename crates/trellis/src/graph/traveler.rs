//! Visitors over shared tensor graphs.
//!
//! Travelers key their bookkeeping by node address, so a node reached along
//! several paths is visited once. They deliberately hold no owning pointers;
//! [`collect_owners`] recovers `NodePtr` handles for a root set when a
//! traveler's result needs to be turned back into shared nodes.

use std::collections::{HashMap, HashSet};

use crate::distrib::reference::RemoteRef;
use crate::graph::functor::{FuncArg, Functor};
use crate::graph::leaf::Leaf;
use crate::graph::node::{node_key, Node, NodePtr};
use crate::graph::GraphError;

/// Graph visitor. Dispatch happens through [`Node::accept`]; recursion into
/// children is each visitor's own business.
pub trait Visitor {
    fn visit_leaf(&mut self, leaf: &Leaf);

    fn visit_functor(&mut self, func: &Functor);

    fn visit_remote(&mut self, reference: &RemoteRef) {
        let _ = reference;
    }
}

/// Maps every reachable node to its (shortest, longest) distance from the
/// leaf layer. Leaves and remote references sit at height 0; a functor is one
/// above the extremes of its children.
#[derive(Default)]
pub struct HeightStat {
    heights: HashMap<usize, (usize, usize)>,
}

impl HeightStat {
    /// Longest distance from the leaves, or 0 for unvisited nodes.
    pub fn height_of(&self, node: &dyn Node) -> usize {
        self.heights
            .get(&node_key(node))
            .map(|&(_, hi)| hi)
            .unwrap_or(0)
    }

    pub fn visited(&self) -> impl Iterator<Item = (usize, (usize, usize))> + '_ {
        self.heights.iter().map(|(&k, &v)| (k, v))
    }
}

impl Visitor for HeightStat {
    fn visit_leaf(&mut self, leaf: &Leaf) {
        self.heights.insert(node_key(leaf), (0, 0));
    }

    fn visit_remote(&mut self, reference: &RemoteRef) {
        self.heights.insert(node_key(reference), (0, 0));
    }

    fn visit_functor(&mut self, func: &Functor) {
        let key = node_key(func);
        if self.heights.contains_key(&key) {
            return;
        }
        let args = func.args();
        let mut lo = usize::MAX;
        let mut hi = 0;
        for arg in &args {
            arg.node().accept(self);
            let (child_lo, child_hi) = self.heights[&node_key(arg.node().as_ref())];
            lo = lo.min(child_lo);
            hi = hi.max(child_hi);
        }
        self.heights.insert(key, (lo + 1, hi + 1));
    }
}

/// Paints every path from the visited roots down to one target node. After
/// the walk, `roadmap` maps each functor on a path to the argument indices
/// that lead toward the target.
pub struct PathFinder {
    target: usize,
    visited: HashSet<usize>,
    roadmap: HashMap<usize, Vec<usize>>,
}

impl PathFinder {
    pub fn new(target: &dyn Node) -> Self {
        PathFinder {
            target: node_key(target),
            visited: HashSet::new(),
            roadmap: HashMap::new(),
        }
    }

    pub fn roadmap(&self) -> &HashMap<usize, Vec<usize>> {
        &self.roadmap
    }
}

impl Visitor for PathFinder {
    fn visit_leaf(&mut self, leaf: &Leaf) {
        self.visited.insert(node_key(leaf));
    }

    fn visit_remote(&mut self, reference: &RemoteRef) {
        self.visited.insert(node_key(reference));
    }

    fn visit_functor(&mut self, func: &Functor) {
        let key = node_key(func);
        if !self.visited.insert(key) {
            return;
        }
        let args = func.args();
        let mut path = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            let child_key = node_key(arg.node().as_ref());
            if child_key == self.target {
                path.push(i);
            } else {
                arg.node().accept(self);
                if self.roadmap.contains_key(&child_key) {
                    path.push(i);
                }
            }
        }
        if !path.is_empty() {
            self.roadmap.insert(key, path);
        }
    }
}

/// For every reachable node, records which functors consume it and at which
/// argument indices.
#[derive(Default)]
pub struct ParentFinder {
    visited: HashSet<usize>,
    parents: HashMap<usize, HashMap<usize, Vec<usize>>>,
}

impl ParentFinder {
    /// child address → (parent address → argument indices).
    pub fn parents(&self) -> &HashMap<usize, HashMap<usize, Vec<usize>>> {
        &self.parents
    }
}

impl Visitor for ParentFinder {
    fn visit_leaf(&mut self, leaf: &Leaf) {
        self.parents.entry(node_key(leaf)).or_default();
    }

    fn visit_remote(&mut self, reference: &RemoteRef) {
        self.parents.entry(node_key(reference)).or_default();
    }

    fn visit_functor(&mut self, func: &Functor) {
        let key = node_key(func);
        if !self.visited.insert(key) {
            return;
        }
        for (i, arg) in func.args().iter().enumerate() {
            arg.node().accept(self);
            self.parents
                .entry(node_key(arg.node().as_ref()))
                .or_default()
                .entry(key)
                .or_default()
                .push(i);
        }
        self.parents.entry(key).or_default();
    }
}

/// Recovers owning handles for every node reachable from `roots`.
pub fn collect_owners(roots: &[NodePtr]) -> HashMap<usize, NodePtr> {
    let mut owners = HashMap::new();
    let mut stack: Vec<NodePtr> = roots.to_vec();
    while let Some(node) = stack.pop() {
        let key = node_key(node.as_ref());
        if owners.contains_key(&key) {
            continue;
        }
        if let Some(func) = node.as_functor() {
            for arg in func.args() {
                stack.push(arg.node().clone());
            }
        }
        owners.insert(key, node);
    }
    owners
}

/// Deep-copies the subtree under `root`. Nodes whose address is in `ignores`
/// (and remote references, whose identity is their whole point) are shared
/// with the original instead of cloned.
pub fn copy_graph(
    root: &NodePtr,
    ignores: &HashSet<usize>,
) -> Result<NodePtr, GraphError> {
    fn rec(
        node: &NodePtr,
        ignores: &HashSet<usize>,
        clones: &mut HashMap<usize, NodePtr>,
    ) -> Result<NodePtr, GraphError> {
        let key = node_key(node.as_ref());
        if ignores.contains(&key) || node.as_remote().is_some() {
            return Ok(node.clone());
        }
        if let Some(done) = clones.get(&key) {
            return Ok(done.clone());
        }
        let copy: NodePtr = if let Some(leaf) = node.as_leaf() {
            leaf.duplicate()
        } else if let Some(func) = node.as_functor() {
            let mut args = Vec::new();
            for arg in func.args() {
                let child = rec(arg.node(), ignores, clones)?;
                args.push(match arg.map() {
                    Some(map) => FuncArg::mapped(map.clone(), child),
                    None => FuncArg::new(child),
                });
            }
            func_copy(func, args)?
        } else {
            node.clone()
        };
        clones.insert(key, copy.clone());
        Ok(copy)
    }

    fn func_copy(func: &Functor, args: Vec<FuncArg>) -> Result<NodePtr, GraphError> {
        let copy: NodePtr = Functor::new(func.opcode(), args, func.attrs().clone())?;
        Ok(copy)
    }

    let mut clones = HashMap::new();
    rec(root, ignores, &mut clones)
}
