//! The distributed evaluator: resolve remote data, then walk locally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::distrib::manager::ClusterManager;
use crate::distrib::DistrError;
use crate::graph::meta::Device;
use crate::graph::node::{node_key, NodePtr};
use crate::graph::traveler::collect_owners;
use crate::session::{recompute, validate_targets, SessionError, Tracker};

const DEFAULT_POLL: Duration = Duration::from_millis(1);

/// A session whose tracked graphs may depend on [`RemoteRef`] proxies.
///
/// Tracking exposes every reachable local node through the manager so peers
/// can reference it. Updating first partitions the needed remote references
/// by owning cluster, issues one asynchronous fetch per cluster, waits for
/// all of them under a bounded poll, absorbs the payloads, and only then
/// runs the ordinary height-ascending local walk. A failed remote call
/// surfaces as an error from the update — local recomputation never runs on
/// stale remote data.
///
/// [`RemoteRef`]: crate::distrib::reference::RemoteRef
pub struct DistSession {
    tracker: Tracker,
    manager: Arc<ClusterManager>,
    poll: Duration,
}

impl DistSession {
    pub fn new(manager: Arc<ClusterManager>) -> Self {
        DistSession {
            tracker: Tracker::default(),
            manager,
            poll: DEFAULT_POLL,
        }
    }

    /// Overrides the completion poll interval.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn manager(&self) -> &Arc<ClusterManager> {
        &self.manager
    }

    /// Tracks roots and exposes every reachable non-proxy node for remote
    /// referencing.
    pub fn track(&mut self, roots: &[NodePtr]) {
        self.tracker.track(roots);
        for node in collect_owners(roots).into_values() {
            if node.as_remote().is_none() {
                self.manager.expose(&node);
            }
        }
    }

    pub fn tracked(&self) -> Vec<NodePtr> {
        self.tracker.tracked.values().cloned().collect()
    }

    /// Brings every tracked root up to date.
    pub fn update(&mut self, device: &dyn Device) -> Result<(), SessionError> {
        let targets = self.tracked();
        self.update_target(device, &targets)
    }

    /// Recomputes the minimal ancestor set for `targets`, resolving remote
    /// dependencies first.
    pub fn update_target(
        &mut self,
        device: &dyn Device,
        targets: &[NodePtr],
    ) -> Result<(), SessionError> {
        self.update_target_ignoring(device, targets, &[])
    }

    /// Targeted update with an ignore set.
    pub fn update_target_ignoring(
        &mut self,
        device: &dyn Device,
        targets: &[NodePtr],
        ignored: &[NodePtr],
    ) -> Result<(), SessionError> {
        let want = validate_targets(&self.tracker, targets)?;
        let ignored = ignored.iter().map(|n| node_key(n.as_ref())).collect();

        let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
        let reqs = self.tracker.collect(&want, &ignored, |node| {
            if let Some(reference) = node.as_remote() {
                clusters
                    .entry(reference.cluster_id().to_string())
                    .or_default()
                    .push(reference.node_id().to_string());
            }
        });

        if !clusters.is_empty() {
            debug!(
                clusters = clusters.len(),
                "resolving remote dependencies before local walk"
            );
            let handles = self
                .manager
                .fetch_clusters(&clusters)
                .map_err(SessionError::Remote)?;
            for handle in handles {
                let payloads = handle.wait(self.poll).map_err(SessionError::Remote)?;
                self.manager
                    .absorb(&payloads)
                    .map_err(SessionError::Remote)?;
            }
        }

        for node in &reqs {
            recompute(device, node)?;
        }
        Ok(())
    }

    /// Looks up a node id, optionally delegating to the owning peer.
    pub fn lookup_node(&self, id: &str, recursive: bool) -> Result<NodePtr, DistrError> {
        self.manager.lookup_node(id, recursive)
    }

    /// Drops scheduling bookkeeping; exposure and proxies stay with the
    /// manager.
    pub fn clear(&mut self) {
        self.tracker.clear();
    }
}
