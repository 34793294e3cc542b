//! Leaf nodes: graph inputs that own their data.

use std::sync::{Arc, Mutex};

use crate::graph::meta::Meta;
use crate::graph::node::Node;
use crate::graph::traveler::Visitor;
use crate::graph::GraphError;
use crate::tensor::{DType, Shape};

/// How a leaf participates in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Mutable input; `assign` is the expected way to feed new data.
    Variable,
    /// Immutable value baked in at construction.
    Constant,
    /// Declared input with no data yet; starts at version 0 so dependent
    /// functors stay clean until the first assignment.
    Placeholder,
}

/// A graph input holding a raw buffer.
#[derive(Debug)]
pub struct Leaf {
    label: String,
    shape: Shape,
    usage: Usage,
    data: Mutex<Vec<f32>>,
    meta: Meta,
}

impl Leaf {
    /// Builds a mutable input initialized with `data`.
    pub fn variable(
        label: impl Into<String>,
        shape: Shape,
        data: Vec<f32>,
    ) -> Result<Arc<Leaf>, GraphError> {
        Self::with_usage(label.into(), shape, Usage::Variable, data)
    }

    /// Builds an immutable value node.
    pub fn constant(shape: Shape, data: Vec<f32>) -> Result<Arc<Leaf>, GraphError> {
        Self::with_usage("const".to_string(), shape, Usage::Constant, data)
    }

    /// Builds a constant with every element set to `value`.
    pub fn filled(shape: Shape, value: f32) -> Arc<Leaf> {
        let n = shape.n_elems() as usize;
        Self::with_usage("const".to_string(), shape, Usage::Constant, vec![value; n])
            .expect("fill data length always matches the shape")
    }

    /// Declares an input that will receive data later via `assign`.
    pub fn placeholder(label: impl Into<String>, shape: Shape) -> Arc<Leaf> {
        let n = shape.n_elems() as usize;
        Arc::new(Leaf {
            label: label.into(),
            shape,
            usage: Usage::Placeholder,
            data: Mutex::new(vec![0.0; n]),
            meta: Meta::new(DType::F32),
        })
    }

    fn with_usage(
        label: String,
        shape: Shape,
        usage: Usage,
        data: Vec<f32>,
    ) -> Result<Arc<Leaf>, GraphError> {
        let expected = shape.n_elems() as usize;
        if data.len() != expected {
            return Err(GraphError::DataLength {
                expected,
                got: data.len(),
            });
        }
        let leaf = Arc::new(Leaf {
            label,
            shape,
            usage,
            data: Mutex::new(data),
            meta: Meta::new(DType::F32),
        });
        leaf.meta.bump();
        Ok(leaf)
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Replaces the leaf's data. The version bump is unconditional: assigning
    /// the same bytes still invalidates dependents.
    pub fn assign(&self, data: &[f32]) -> Result<(), GraphError> {
        let expected = self.shape.n_elems() as usize;
        if data.len() != expected {
            return Err(GraphError::DataLength {
                expected,
                got: data.len(),
            });
        }
        {
            let mut guard = self.data.lock().expect("leaf buffer poisoned");
            guard.clear();
            guard.extend_from_slice(data);
        }
        self.meta.bump();
        Ok(())
    }

    /// Snapshot of the current buffer.
    pub fn data(&self) -> Vec<f32> {
        self.data.lock().expect("leaf buffer poisoned").clone()
    }

    /// Structural copy: same shape, usage, data and version, independent
    /// identity.
    pub fn duplicate(&self) -> Arc<Leaf> {
        Arc::new(Leaf {
            label: self.label.clone(),
            shape: self.shape.clone(),
            usage: self.usage,
            data: Mutex::new(self.data()),
            meta: Meta::with_version(self.meta.dtype(), self.meta.version()),
        })
    }
}

impl Node for Leaf {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn value(&self) -> Option<Vec<f32>> {
        Some(self.data())
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_leaf(self);
    }

    fn as_leaf(&self) -> Option<&Leaf> {
        Some(self)
    }
}
