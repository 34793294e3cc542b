//! Proxy nodes standing in for tensors hosted on remote peers.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::graph::meta::Meta;
use crate::graph::node::Node;
use crate::graph::traveler::Visitor;
use crate::tensor::{DType, Shape};

/// A tensor owned by another cluster, identified by `(cluster_id, node_id)`.
///
/// The reference exposes no computation of its own; its buffer is a cache
/// filled by remote calls. Version-guarded absorption keeps late or
/// duplicated payloads from clobbering fresher data.
#[derive(Debug)]
pub struct RemoteRef {
    cluster_id: String,
    node_id: String,
    shape: Shape,
    cache: Mutex<Vec<f32>>,
    meta: Meta,
}

impl RemoteRef {
    pub fn new(
        cluster_id: impl Into<String>,
        node_id: impl Into<String>,
        shape: Shape,
        dtype: DType,
    ) -> Arc<RemoteRef> {
        let n = shape.n_elems() as usize;
        Arc::new(RemoteRef {
            cluster_id: cluster_id.into(),
            node_id: node_id.into(),
            shape,
            cache: Mutex::new(vec![0.0; n]),
            meta: Meta::new(dtype),
        })
    }

    /// Id of the owning cluster.
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Id of the node within the owning cluster.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Accepts a remote payload if it is newer than the cached one.
    /// Returns whether the cache changed.
    pub fn absorb(&self, data: &[f32], version: u64) -> bool {
        if version <= self.meta.version() {
            return false;
        }
        let expected = self.shape.n_elems() as usize;
        if data.len() != expected {
            warn!(
                node = %self.node_id,
                got = data.len(),
                expected,
                "dropping remote payload with mismatched length"
            );
            return false;
        }
        {
            let mut cache = self.cache.lock().expect("remote cache poisoned");
            cache.clear();
            cache.extend_from_slice(data);
        }
        self.meta.advance_to(version)
    }
}

impl Node for RemoteRef {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn value(&self) -> Option<Vec<f32>> {
        Some(self.cache.lock().expect("remote cache poisoned").clone())
    }

    fn label(&self) -> String {
        format!("{}/{}", self.cluster_id, self.node_id)
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_remote(self);
    }

    fn as_remote(&self) -> Option<&RemoteRef> {
        Some(self)
    }
}
