//! Opcode table, shape inference, construction API, and differentiation.

pub mod derive;
pub mod functional;
pub mod infer;
pub mod opcode;

pub use derive::derive;
pub use opcode::{OpKind, Opcode};
