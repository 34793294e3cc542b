//! Height-ordered incremental evaluation.
//!
//! A session tracks a set of root nodes, assigns every reachable operation a
//! height (one above the tallest of its dependencies), and keeps the ops in
//! height-indexed buckets. Updates walk the buckets from the highest height
//! down to collect the minimal ancestor set that brings the requested
//! targets up to date, prepending along the way so the actual execution runs
//! height-ascending: everything at height *h* completes before anything at
//! height *h + 1* starts. A functor only reaches the device when its version
//! falls behind its arguments'.
//!
//! One session instance expects one caller at a time; concurrent updates on
//! the same instance are the caller's bug, not a supported mode.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::distrib::DistrError;
use crate::graph::meta::{Device, DeviceError};
use crate::graph::node::{node_key, Node, NodePtr};

/// Recoverable session failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("target `{label}` is not tracked by this session")]
    UntrackedTarget { label: String },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Remote(#[from] DistrError),
}

/// Height-bucket bookkeeping shared by the local and distributed sessions.
#[derive(Default)]
pub(crate) struct Tracker {
    /// Roots the caller asked to track, by address.
    pub tracked: HashMap<usize, NodePtr>,
    /// Operations bucketed by height - 1.
    pub buckets: Vec<HashMap<usize, NodePtr>>,
    /// Operation address → height.
    pub heights: HashMap<usize, usize>,
}

/// Dependency nodes of an operation (empty for leaves and remote
/// references).
pub(crate) fn dependencies(node: &NodePtr) -> Vec<NodePtr> {
    node.as_functor()
        .map(|f| f.args().iter().map(|a| a.node().clone()).collect())
        .unwrap_or_default()
}

fn is_op(node: &NodePtr) -> bool {
    node.as_functor().is_some() || node.as_remote().is_some()
}

impl Tracker {
    /// Adds roots and indexes every newly reachable operation by height.
    /// Already-tracked operations keep their buckets; re-tracking never
    /// duplicates or recomputes.
    pub fn track(&mut self, roots: &[NodePtr]) {
        for root in roots {
            self.tracked.insert(node_key(root.as_ref()), root.clone());
        }
        self.descend(roots);
    }

    fn descend(&mut self, nodes: &[NodePtr]) {
        let mut fresh: Vec<NodePtr> = Vec::new();
        let mut fresh_keys: HashSet<usize> = HashSet::new();
        let mut nexts: HashMap<usize, NodePtr> = HashMap::new();
        for node in nodes {
            let key = node_key(node.as_ref());
            if self.heights.contains_key(&key) || fresh_keys.contains(&key) || !is_op(node) {
                continue;
            }
            fresh_keys.insert(key);
            fresh.push(node.clone());
            for dep in dependencies(node) {
                nexts.insert(node_key(dep.as_ref()), dep);
            }
        }
        if fresh.is_empty() {
            return;
        }
        let deeper: Vec<NodePtr> = nexts.into_values().collect();
        self.descend(&deeper);
        for node in fresh {
            let height = 1 + dependencies(&node)
                .iter()
                .map(|dep| {
                    self.heights
                        .get(&node_key(dep.as_ref()))
                        .copied()
                        .unwrap_or(0)
                })
                .max()
                .unwrap_or(0);
            if height > self.buckets.len() {
                self.buckets.resize_with(height, HashMap::new);
            }
            let key = node_key(node.as_ref());
            self.buckets[height - 1].insert(key, node);
            self.heights.insert(key, height);
        }
    }

    pub fn is_tracked(&self, node: &dyn Node) -> bool {
        let key = node_key(node);
        self.heights.contains_key(&key) || self.tracked.contains_key(&key)
    }

    /// Walks buckets highest-first and collects the operations needed to
    /// refresh `want`, prepending so the returned list runs
    /// height-ascending. Ignored operations are treated as up to date and
    /// their subtrees are never entered. The `remote` callback receives
    /// needed non-functor operations (remote references) instead of the
    /// request list.
    pub fn collect(
        &self,
        want: &HashSet<usize>,
        ignored: &HashSet<usize>,
        mut remote: impl FnMut(&NodePtr),
    ) -> VecDeque<NodePtr> {
        let mut reqs: VecDeque<NodePtr> = VecDeque::new();
        let mut nexts: HashSet<usize> = HashSet::new();
        for bucket in self.buckets.iter().rev() {
            for (addr, node) in bucket {
                if (nexts.contains(addr) || want.contains(addr)) && !ignored.contains(addr) {
                    if node.as_functor().is_some() {
                        reqs.push_front(node.clone());
                        for dep in dependencies(node) {
                            nexts.insert(node_key(dep.as_ref()));
                        }
                    } else {
                        remote(node);
                    }
                }
            }
        }
        reqs
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.buckets.clear();
        self.heights.clear();
    }
}

/// Topological scheduler for a single process.
#[derive(Default)]
pub struct Session {
    tracker: Tracker,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or extends) tracking from the given roots.
    pub fn track(&mut self, roots: &[NodePtr]) {
        self.tracker.track(roots);
    }

    /// The roots currently tracked.
    pub fn tracked(&self) -> Vec<NodePtr> {
        self.tracker.tracked.values().cloned().collect()
    }

    /// Number of operations indexed across all height buckets.
    pub fn n_ops(&self) -> usize {
        self.tracker.heights.len()
    }

    /// Brings every tracked root up to date.
    pub fn update(&mut self, device: &dyn Device) -> Result<(), SessionError> {
        self.update_ignoring(device, &[])
    }

    /// Brings every tracked root up to date, treating `ignored` operations
    /// (and therefore their subtrees) as already fresh.
    pub fn update_ignoring(
        &mut self,
        device: &dyn Device,
        ignored: &[NodePtr],
    ) -> Result<(), SessionError> {
        let targets = self.tracked();
        self.update_target_ignoring(device, &targets, ignored)
    }

    /// Recomputes only the minimal ancestor set needed to refresh `targets`.
    pub fn update_target(
        &mut self,
        device: &dyn Device,
        targets: &[NodePtr],
    ) -> Result<(), SessionError> {
        self.update_target_ignoring(device, targets, &[])
    }

    /// Targeted update with an ignore set. Requesting a target the session
    /// does not track is an error, not a silent skip.
    pub fn update_target_ignoring(
        &mut self,
        device: &dyn Device,
        targets: &[NodePtr],
        ignored: &[NodePtr],
    ) -> Result<(), SessionError> {
        let want = validate_targets(&self.tracker, targets)?;
        let ignored: HashSet<usize> = ignored.iter().map(|n| node_key(n.as_ref())).collect();
        let reqs = self.tracker.collect(&want, &ignored, |_| {});
        for node in &reqs {
            recompute(device, node)?;
        }
        Ok(())
    }

    /// Drops all bookkeeping; the shared tensors are untouched.
    pub fn clear(&mut self) {
        self.tracker.clear();
    }
}

pub(crate) fn validate_targets(
    tracker: &Tracker,
    targets: &[NodePtr],
) -> Result<HashSet<usize>, SessionError> {
    let mut want = HashSet::with_capacity(targets.len());
    for target in targets {
        if !tracker.is_tracked(target.as_ref()) {
            return Err(SessionError::UntrackedTarget {
                label: target.label(),
            });
        }
        want.insert(node_key(target.as_ref()));
    }
    Ok(want)
}

pub(crate) fn recompute(device: &dyn Device, node: &NodePtr) -> Result<(), SessionError> {
    if let Some(func) = node.as_functor() {
        if func.prop_version(u64::MAX) {
            device.calc(func)?;
        }
    }
    Ok(())
}
