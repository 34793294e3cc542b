//! The RPC seam: one asynchronous data call per cluster.
//!
//! The evaluator only ever needs two verbs from a transport — fetch the
//! current data for a batch of node ids, and describe a single node so a
//! local proxy can be built. Fetches complete asynchronously through a
//! [`CallHandle`]; waiting is a bounded-interval poll, never a busy spin,
//! which leaves room for cancellation to be threaded in later.
//!
//! The in-process transport wires managers to each other over worker
//! threads. It exists for tests and single-machine deployments; a gRPC (or
//! any other) transport implements the same two verbs.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::distrib::manager::ClusterManager;
use crate::distrib::DistrError;
use crate::tensor::{DType, Shape};

/// One node's data as served by its owning peer.
#[derive(Debug, Clone)]
pub struct RemotePayload {
    pub node_id: String,
    pub version: u64,
    pub data: Vec<f32>,
}

/// Description of a remotely hosted node, enough to build a local proxy.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_id: String,
    pub cluster_id: String,
    pub shape: Shape,
    pub dtype: DType,
}

type CallResult = Result<Vec<RemotePayload>, DistrError>;

/// Completion side of an in-flight call.
pub struct CallCompleter {
    tx: Sender<CallResult>,
}

impl CallCompleter {
    pub fn complete(self, result: CallResult) {
        // the waiter may have given up; a dropped receiver is fine
        let _ = self.tx.send(result);
    }
}

/// Waitable handle for an in-flight data call.
pub struct CallHandle {
    rx: Receiver<CallResult>,
}

impl CallHandle {
    /// Creates a pending call and its completion side.
    pub fn pending() -> (CallCompleter, CallHandle) {
        let (tx, rx) = mpsc::channel();
        (CallCompleter { tx }, CallHandle { rx })
    }

    /// Creates an already-completed call.
    pub fn resolved(result: CallResult) -> CallHandle {
        let (completer, handle) = Self::pending();
        completer.complete(result);
        handle
    }

    /// Blocks until the call completes, polling at `interval`. A transport
    /// that drops the completer without answering counts as a failure.
    pub fn wait(&self, interval: Duration) -> CallResult {
        loop {
            match self.rx.recv_timeout(interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(DistrError::ChannelClosed),
            }
        }
    }
}

/// Outbound call surface the distributed evaluator depends on.
pub trait Transport: Send + Sync {
    /// Requests current data for `node_ids` from `cluster_id`. One call per
    /// cluster, not per node.
    fn fetch(&self, cluster_id: &str, node_ids: &[String]) -> CallHandle;

    /// Asks `cluster_id` to describe one of its nodes.
    fn find_node(&self, cluster_id: &str, node_id: &str) -> Result<NodeInfo, DistrError>;
}

/// Transport connecting managers that live in the same process. Fetches run
/// on worker threads so completion is genuinely asynchronous.
#[derive(Default)]
pub struct InProcessTransport {
    peers: Mutex<HashMap<String, Arc<ClusterManager>>>,
}

impl InProcessTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a manager as a reachable peer.
    pub fn join(&self, manager: &Arc<ClusterManager>) {
        self.peers
            .lock()
            .expect("transport peers poisoned")
            .insert(manager.id().to_string(), Arc::clone(manager));
    }

    fn peer(&self, cluster_id: &str) -> Result<Arc<ClusterManager>, DistrError> {
        self.peers
            .lock()
            .expect("transport peers poisoned")
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| DistrError::UnknownCluster {
                cluster_id: cluster_id.to_string(),
            })
    }
}

impl Transport for InProcessTransport {
    fn fetch(&self, cluster_id: &str, node_ids: &[String]) -> CallHandle {
        let peer = self.peer(cluster_id);
        let ids: Vec<String> = node_ids.to_vec();
        let (completer, handle) = CallHandle::pending();
        thread::spawn(move || {
            let result = peer.and_then(|manager| manager.serve_data(&ids));
            completer.complete(result);
        });
        handle
    }

    fn find_node(&self, cluster_id: &str, node_id: &str) -> Result<NodeInfo, DistrError> {
        self.peer(cluster_id)?.describe(node_id)
    }
}
