//! Per-peer node bookkeeping: id assignment, lookup, and data serving.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use rand::Rng;

use crate::distrib::directory::Directory;
use crate::distrib::reference::RemoteRef;
use crate::distrib::transport::{NodeInfo, RemotePayload, Transport};
use crate::distrib::DistrError;
use crate::graph::node::{node_key, NodePtr};

#[derive(Default)]
struct IdTable {
    by_id: HashMap<String, NodePtr>,
    by_addr: HashMap<usize, String>,
}

/// One peer's view of the cluster: the nodes it owns (exposed under
/// generated ids), the proxies it has built for foreign nodes, the shared
/// directory, and the transport it calls peers through.
pub struct ClusterManager {
    id: String,
    directory: Arc<dyn Directory>,
    transport: OnceCell<Arc<dyn Transport>>,
    nodes: Mutex<IdTable>,
}

impl ClusterManager {
    pub fn new(id: impl Into<String>, directory: Arc<dyn Directory>) -> Arc<ClusterManager> {
        Arc::new(ClusterManager {
            id: id.into(),
            directory,
            transport: OnceCell::new(),
            nodes: Mutex::new(IdTable::default()),
        })
    }

    /// This peer's cluster id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wires the outbound transport. Later calls are ignored; the first
    /// transport wins.
    pub fn connect(&self, transport: Arc<dyn Transport>) {
        let _ = self.transport.set(transport);
    }

    fn transport(&self) -> Result<&Arc<dyn Transport>, DistrError> {
        self.transport.get().ok_or(DistrError::MissingTransport)
    }

    /// Registers a local node for remote referencing, assigning it an id and
    /// publishing ownership. Exposing the same node twice returns the
    /// existing id.
    pub fn expose(&self, node: &NodePtr) -> String {
        let mut table = self.nodes.lock().expect("manager id table poisoned");
        let addr = node_key(node.as_ref());
        if let Some(existing) = table.by_addr.get(&addr) {
            return existing.clone();
        }
        let mut rng = rand::thread_rng();
        let id = format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>());
        table.by_id.insert(id.clone(), node.clone());
        table.by_addr.insert(addr, id.clone());
        self.directory.publish(&id, &self.id);
        id
    }

    /// The id this peer knows `node` under, if any.
    pub fn lookup_id(&self, node: &NodePtr) -> Option<String> {
        self.nodes
            .lock()
            .expect("manager id table poisoned")
            .by_addr
            .get(&node_key(node.as_ref()))
            .cloned()
    }

    /// Resolves an id to a node.
    ///
    /// A local hit returns the owned node. Otherwise, with `recursive` set,
    /// the directory names the owning peer, the transport describes the
    /// node, and a [`RemoteRef`] proxy is built and cached. Without
    /// `recursive`, a local miss is an error — never a null.
    pub fn lookup_node(&self, id: &str, recursive: bool) -> Result<NodePtr, DistrError> {
        if let Some(local) = self
            .nodes
            .lock()
            .expect("manager id table poisoned")
            .by_id
            .get(id)
        {
            return Ok(local.clone());
        }
        if !recursive {
            return Err(DistrError::UnknownNode { id: id.to_string() });
        }
        let owner = self
            .directory
            .locate(id)
            .ok_or_else(|| DistrError::NoPeer { id: id.to_string() })?;
        if owner == self.id {
            return Err(DistrError::UnknownNode { id: id.to_string() });
        }
        let info = self.transport()?.find_node(&owner, id)?;
        let reference: NodePtr =
            RemoteRef::new(info.cluster_id, info.node_id, info.shape, info.dtype);
        let mut table = self.nodes.lock().expect("manager id table poisoned");
        table.by_id.insert(id.to_string(), reference.clone());
        table.by_addr.insert(node_key(reference.as_ref()), id.to_string());
        Ok(reference)
    }

    /// Server side of a data call: current buffer and version for each
    /// requested node.
    pub fn serve_data(&self, node_ids: &[String]) -> Result<Vec<RemotePayload>, DistrError> {
        let table = self.nodes.lock().expect("manager id table poisoned");
        let mut out = Vec::with_capacity(node_ids.len());
        for id in node_ids {
            let node = table
                .by_id
                .get(id)
                .ok_or_else(|| DistrError::UnknownNode { id: id.clone() })?;
            let data = node
                .value()
                .ok_or_else(|| DistrError::DataUnavailable { id: id.clone() })?;
            out.push(RemotePayload {
                node_id: id.clone(),
                version: node.meta().version(),
                data,
            });
        }
        Ok(out)
    }

    /// Server side of a lookup call: shape and type for one owned node.
    pub fn describe(&self, node_id: &str) -> Result<NodeInfo, DistrError> {
        let table = self.nodes.lock().expect("manager id table poisoned");
        let node = table
            .by_id
            .get(node_id)
            .ok_or_else(|| DistrError::UnknownNode {
                id: node_id.to_string(),
            })?;
        Ok(NodeInfo {
            node_id: node_id.to_string(),
            cluster_id: self.id.clone(),
            shape: node.shape().clone(),
            dtype: node.meta().dtype(),
        })
    }

    /// Applies fetched payloads to the proxies they belong to. Payloads for
    /// locally owned nodes are ignored; stale versions are dropped by the
    /// proxy itself.
    pub fn absorb(&self, payloads: &[RemotePayload]) -> Result<(), DistrError> {
        let table = self.nodes.lock().expect("manager id table poisoned");
        for payload in payloads {
            let node = table
                .by_id
                .get(&payload.node_id)
                .ok_or_else(|| DistrError::UnknownNode {
                    id: payload.node_id.clone(),
                })?;
            if let Some(reference) = node.as_remote() {
                reference.absorb(&payload.data, payload.version);
            }
        }
        Ok(())
    }

    /// Issues one fetch per cluster for the given `(cluster, node ids)`
    /// groups and returns the in-flight handles.
    pub(crate) fn fetch_clusters(
        &self,
        groups: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<crate::distrib::transport::CallHandle>, DistrError> {
        let transport = self.transport()?;
        let mut handles = Vec::with_capacity(groups.len());
        for (cluster_id, ids) in groups {
            handles.push(transport.fetch(cluster_id, ids));
        }
        Ok(handles)
    }
}
