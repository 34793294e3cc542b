//! Service-discovery seam: which cluster owns which node id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Node-ownership directory shared by every peer in a deployment. A real
/// deployment backs this with its discovery service; tests use the
/// in-memory table.
pub trait Directory: Send + Sync {
    /// Advertises that `cluster_id` owns `node_id`.
    fn publish(&self, node_id: &str, cluster_id: &str);

    /// The owning cluster of `node_id`, if any peer advertised it.
    fn locate(&self, node_id: &str) -> Option<String>;
}

/// Process-local directory table.
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Directory for InMemoryDirectory {
    fn publish(&self, node_id: &str, cluster_id: &str) {
        self.entries
            .lock()
            .expect("directory poisoned")
            .insert(node_id.to_string(), cluster_id.to_string());
    }

    fn locate(&self, node_id: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("directory poisoned")
            .get(node_id)
            .cloned()
    }
}
