//! trellis — shape-typed lazy tensor expression graphs.
//!
//! The crate is organised bottom-up:
//!
//! - [`tensor`] holds the static typing layer: capped-rank shapes, affine
//!   coordinate maps, and element type tags.
//! - [`graph`] holds the node model: leaves that own data, functors that own
//!   an opcode and lazily cache their result, and the traveler machinery for
//!   walking the DAG.
//! - [`ops`] holds the opcode table, per-opcode shape inference, the
//!   construction API, and symbolic differentiation.
//! - [`session`] schedules incremental recomputation by dependency height.
//! - [`optimizer`] rewrites tracked graphs through an index of reachable
//!   nodes.
//! - [`distrib`] extends evaluation across peer processes via remote
//!   references resolved before the local walk.

pub mod distrib;
pub mod graph;
pub mod ops;
pub mod optimizer;
pub mod session;
pub mod tensor;

pub use graph::functor::Functor;
pub use graph::leaf::Leaf;
pub use graph::meta::Device;
pub use graph::node::{Node, NodePtr};
pub use ops::opcode::Opcode;
pub use session::Session;
pub use tensor::{CoordMap, DType, Shape};
