//! Pattern-matching graph rewriting over an owned root set.

pub mod index;
pub mod rules;

pub use index::{GraphIndex, Query};
pub use rules::{optimize, DedupFunctors, IdentityFold, RewriteRule};
