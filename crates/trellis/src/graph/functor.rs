//! Functor nodes: opcode applications with lazily cached results.
//!
//! A functor owns its opcode, an attribute map, and a list of
//! coordinate-mapped arguments. The output shape is inferred once, at
//! construction; a construction that violates an arity or shape contract
//! returns an error and produces no node. The result buffer is materialized
//! lazily by a device and invalidated through versions.
//!
//! Functors also maintain the parent-subscription registry: every functor
//! subscribes itself to each functor argument so that cache invalidation can
//! cascade upward. Subscriptions are weak and keyed by node address — they
//! exist for notification only and never extend a parent's lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::graph::attrs::Attrs;
use crate::graph::meta::Meta;
use crate::graph::node::{node_key, Node, NodePtr};
use crate::graph::traveler::Visitor;
use crate::graph::GraphError;
use crate::ops::infer::infer_shape;
use crate::ops::opcode::Opcode;
use crate::tensor::{CoordMap, Shape};

/// One functor argument: the child node plus an optional coordinate
/// transform describing how the child's coordinates map into the functor's
/// output space. `None` means identity; maps are shared, many functors reuse
/// the same transform.
#[derive(Clone, Debug)]
pub struct FuncArg {
    map: Option<Arc<CoordMap>>,
    node: NodePtr,
}

impl FuncArg {
    pub fn new(node: NodePtr) -> Self {
        FuncArg { map: None, node }
    }

    pub fn mapped(map: Arc<CoordMap>, node: NodePtr) -> Self {
        let map = if map.is_identity() { None } else { Some(map) };
        FuncArg { map, node }
    }

    pub fn node(&self) -> &NodePtr {
        &self.node
    }

    pub fn map(&self) -> Option<&Arc<CoordMap>> {
        self.map.as_ref()
    }
}

/// An opcode application node.
#[derive(Debug)]
pub struct Functor {
    opcode: Opcode,
    shape: Shape,
    attrs: Attrs,
    args: Mutex<Vec<FuncArg>>,
    data: Mutex<Option<Vec<f32>>>,
    meta: Meta,
    subs: Mutex<HashMap<usize, Weak<Functor>>>,
    this: Weak<Functor>,
}

impl Functor {
    /// Builds a functor, running shape inference and type checks first.
    ///
    /// The new functor subscribes itself to every functor argument. A
    /// violated contract returns an error without allocating a node.
    pub fn new(opcode: Opcode, args: Vec<FuncArg>, attrs: Attrs) -> Result<Arc<Functor>, GraphError> {
        if args.is_empty() {
            return Err(GraphError::BadArity {
                op: opcode.name(),
                expected: "at least 1",
                got: 0,
            });
        }
        let dtype = args[0].node().meta().dtype();
        if args.iter().any(|a| a.node().meta().dtype() != dtype) {
            return Err(GraphError::TypeMismatch { op: opcode.name() });
        }
        let shape = infer_shape(opcode, &args, &attrs)?;

        let functor = Arc::new_cyclic(|this| Functor {
            opcode,
            shape,
            attrs,
            args: Mutex::new(args),
            data: Mutex::new(None),
            meta: Meta::new(dtype),
            subs: Mutex::new(HashMap::new()),
            this: this.clone(),
        });
        for arg in functor.args() {
            if let Some(child) = arg.node().as_functor() {
                child.subscribe(functor.this.clone());
            }
        }
        Ok(functor)
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Snapshot of the argument list.
    pub fn args(&self) -> Vec<FuncArg> {
        self.args.lock().expect("functor args poisoned").clone()
    }

    /// Owning handle to this functor, as long as one still exists.
    pub fn handle(&self) -> Option<NodePtr> {
        self.this.upgrade().map(|arc| {
            let node: NodePtr = arc;
            node
        })
    }

    pub(crate) fn addr(&self) -> usize {
        self as *const Functor as usize
    }

    /// True when the result buffer is materialized.
    pub fn has_data(&self) -> bool {
        self.data.lock().expect("functor cache poisoned").is_some()
    }

    /// Stores a freshly computed result buffer. Called by devices.
    pub fn store(&self, data: Vec<f32>) {
        *self.data.lock().expect("functor cache poisoned") = Some(data);
    }

    /// Attempts to materialize the result buffer from already-materialized
    /// arguments. Returns whether data is present afterwards; arguments
    /// without data leave this functor unmaterialized rather than failing.
    pub fn initialize(
        &self,
        device: &dyn crate::graph::meta::Device,
    ) -> Result<bool, crate::graph::meta::DeviceError> {
        if self.has_data() {
            return Ok(true);
        }
        let ready = self.args().iter().all(|arg| {
            arg.node()
                .as_functor()
                .map(|f| f.has_data())
                .unwrap_or(true)
        });
        if ready {
            self.prop_version(u64::MAX);
            device.calc(self)?;
        }
        Ok(self.has_data())
    }

    /// Materializes this functor, recursively materializing unmaterialized
    /// functor arguments first.
    pub fn must_initialize(
        &self,
        device: &dyn crate::graph::meta::Device,
    ) -> Result<(), crate::graph::meta::DeviceError> {
        for arg in self.args() {
            if let Some(child) = arg.node().as_functor() {
                if !child.has_data() {
                    child.must_initialize(device)?;
                }
            }
        }
        self.initialize(device)?;
        Ok(())
    }

    /// Drops the cached buffer, resets the version, and cascades upward
    /// through subscribers so no parent keeps a result derived from the
    /// dropped one.
    pub fn uninitialize(&self) {
        {
            let mut guard = self.data.lock().expect("functor cache poisoned");
            if guard.is_none() {
                return;
            }
            *guard = None;
        }
        self.meta.reset();
        for parent in self.subscribers() {
            parent.uninitialize();
        }
    }

    /// Registers a parent for invalidation notifications.
    pub fn subscribe(&self, parent: Weak<Functor>) {
        let key = parent.as_ptr() as usize;
        self.subs
            .lock()
            .expect("functor subscribers poisoned")
            .insert(key, parent);
    }

    /// Removes a parent registration by node address.
    pub fn unsubscribe(&self, parent_addr: usize) {
        self.subs
            .lock()
            .expect("functor subscribers poisoned")
            .remove(&parent_addr);
    }

    /// Live parents currently subscribed.
    pub fn subscribers(&self) -> Vec<Arc<Functor>> {
        self.subs
            .lock()
            .expect("functor subscribers poisoned")
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs
            .lock()
            .expect("functor subscribers poisoned")
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Moves every surviving subscriber of `old` onto this functor. Used by
    /// graph rewriting after parents have been rewired, so observers that
    /// live outside the rewritten root set keep receiving notifications.
    pub fn adopt_subscribers_from(&self, old: &Functor) {
        let drained: Vec<(usize, Weak<Functor>)> = {
            let mut theirs = old.subs.lock().expect("functor subscribers poisoned");
            theirs.drain().collect()
        };
        let mut ours = self.subs.lock().expect("functor subscribers poisoned");
        for (key, weak) in drained {
            if key == self.addr() || weak.strong_count() == 0 {
                continue;
            }
            ours.insert(key, weak);
        }
    }

    /// Raises this functor's version toward the max of its arguments'
    /// versions, capped at `max_version`. Returns whether the version moved —
    /// i.e. whether the cached buffer went stale and a recompute is due.
    ///
    /// Non-idempotent opcodes (the random family) want to execute every
    /// round, so their desired version always moves to a fresh epoch.
    pub fn prop_version(&self, max_version: u64) -> bool {
        let desired = self
            .args()
            .iter()
            .map(|a| a.node().meta().version())
            .max()
            .unwrap_or(0);
        let current = self.meta.version();
        let desired = if desired <= current && !self.opcode.is_idempotent() {
            crate::graph::meta::next_version()
        } else {
            desired
        };
        let desired = desired.min(max_version);
        self.meta.advance_to(desired)
    }

    /// Rewires argument `index` to `next`, keeping the coordinate map.
    ///
    /// The replacement must be shape- and type-compatible with the current
    /// child. The cached buffer is dropped (with upward cascade), the old
    /// child loses this functor as a subscriber, the new one gains it.
    pub fn update_child(&self, next: NodePtr, index: usize) -> Result<(), GraphError> {
        let current = {
            let args = self.args.lock().expect("functor args poisoned");
            let len = args.len();
            match args.get(index) {
                Some(arg) => arg.node().clone(),
                None => return Err(GraphError::BadIndex { index, len }),
            }
        };
        if node_key(current.as_ref()) == node_key(next.as_ref()) {
            return Ok(());
        }
        if !next.shape().compatible_after(current.shape(), 0) {
            return Err(GraphError::IncompatibleShapes {
                op: self.opcode.name(),
                lhs: next.shape().clone(),
                rhs: current.shape().clone(),
            });
        }
        if next.meta().dtype() != current.meta().dtype() {
            return Err(GraphError::TypeMismatch {
                op: self.opcode.name(),
            });
        }

        self.uninitialize();
        if let Some(old) = current.as_functor() {
            old.unsubscribe(self.addr());
        }
        {
            let mut args = self.args.lock().expect("functor args poisoned");
            args[index] = FuncArg {
                map: args[index].map.clone(),
                node: next.clone(),
            };
        }
        if let Some(fresh) = next.as_functor() {
            fresh.subscribe(self.this.clone());
        }
        Ok(())
    }

    /// Structural copy: same opcode, arguments, attributes, data and version
    /// — but an empty parent-subscription set. The copy is an independently
    /// observed node.
    pub fn duplicate(&self) -> Result<Arc<Functor>, GraphError> {
        let copy = Functor::new(self.opcode, self.args(), self.attrs.clone())?;
        if let Some(data) = self.value() {
            copy.store(data);
            copy.meta.advance_to(self.meta.version());
        }
        Ok(copy)
    }
}

impl Drop for Functor {
    fn drop(&mut self) {
        let addr = self.addr();
        let args = self.args.lock().expect("functor args poisoned");
        for arg in args.iter() {
            if let Some(child) = arg.node().as_functor() {
                child.unsubscribe(addr);
            }
        }
    }
}

impl Node for Functor {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn value(&self) -> Option<Vec<f32>> {
        self.data.lock().expect("functor cache poisoned").clone()
    }

    fn label(&self) -> String {
        self.opcode.name().to_string()
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_functor(self);
    }

    fn as_functor(&self) -> Option<&Functor> {
        Some(self)
    }
}
