//! The closed opcode set and its dispatch table.
//!
//! Every opcode maps to a static entry describing its arity class and
//! evaluation properties. The table is built once, on first access — a
//! single registry instead of per-opcode specialization scattered through
//! the codebase. Dispatch stays O(1) and the set stays closed: adding an
//! opcode means adding an enum variant and a table row, and the compiler
//! walks every `match` that needs updating.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

/// Attribute keys used by shaped opcodes.
pub mod keys {
    /// Reduction boundary: dimensions below this index are folded away.
    pub const DIM: &str = "dim";
    /// Permutation order.
    pub const ORDER: &str = "order";
    /// Extension (broadcast) factors.
    pub const FACTORS: &str = "factors";
    /// Matmul: number of uncontracted leading dimensions of the left operand.
    pub const AGROUP: &str = "agroup";
    /// Matmul: number of contracted leading dimensions of the right operand.
    pub const BGROUP: &str = "bgroup";
    /// Reshape target dimensions.
    pub const SHAPE: &str = "shape";
}

/// Operation identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Abs,
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Round,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
    Eq,
    Ne,
    Lt,
    Gt,
    RandUnif,
    RandNorm,
    ReduceSum,
    ReduceProd,
    ReduceMin,
    ReduceMax,
    Matmul,
    Permute,
    Extend,
    Reshape,
}

/// Arity/shape class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Exactly one argument, output shape equals input shape.
    Unary,
    /// One or more arguments, elementwise over broadcast-compatible shapes.
    Elementwise,
    /// One argument plus a `dim` attribute; folds away leading dimensions.
    Reduce,
    /// Two arguments plus group attributes.
    Matmul,
    /// One argument plus an `order` attribute.
    Permute,
    /// One argument plus a `factors` attribute.
    Extend,
    /// One argument plus a `shape` attribute.
    Reshape,
}

/// Static per-opcode facts.
pub struct OpEntry {
    pub name: &'static str,
    pub kind: OpKind,
    /// Idempotent ops may keep a cached result when inputs are unchanged;
    /// non-idempotent ones (random sources) recompute every pass.
    pub idempotent: bool,
    /// Whether the derivative with respect to any argument is identically
    /// zero (comparisons, random sources).
    pub zero_grad: bool,
}

static TABLE: Lazy<HashMap<Opcode, OpEntry>> = Lazy::new(|| {
    use OpKind::*;
    let mut table = HashMap::new();
    let mut put = |op: Opcode, name: &'static str, kind: OpKind, idempotent: bool, zero_grad: bool| {
        table.insert(
            op,
            OpEntry {
                name,
                kind,
                idempotent,
                zero_grad,
            },
        );
    };
    put(Opcode::Abs, "abs", Unary, true, false);
    put(Opcode::Neg, "neg", Unary, true, false);
    put(Opcode::Sin, "sin", Unary, true, false);
    put(Opcode::Cos, "cos", Unary, true, false);
    put(Opcode::Tan, "tan", Unary, true, false);
    put(Opcode::Exp, "exp", Unary, true, false);
    put(Opcode::Log, "log", Unary, true, false);
    put(Opcode::Sqrt, "sqrt", Unary, true, false);
    put(Opcode::Round, "round", Unary, true, false);
    put(Opcode::Add, "add", Elementwise, true, false);
    put(Opcode::Sub, "sub", Elementwise, true, false);
    put(Opcode::Mul, "mul", Elementwise, true, false);
    put(Opcode::Div, "div", Elementwise, true, false);
    put(Opcode::Pow, "pow", Elementwise, true, false);
    put(Opcode::Min, "min", Elementwise, true, false);
    put(Opcode::Max, "max", Elementwise, true, false);
    put(Opcode::Eq, "eq", Elementwise, true, true);
    put(Opcode::Ne, "ne", Elementwise, true, true);
    put(Opcode::Lt, "lt", Elementwise, true, true);
    put(Opcode::Gt, "gt", Elementwise, true, true);
    put(Opcode::RandUnif, "rand_unif", Elementwise, false, true);
    put(Opcode::RandNorm, "rand_norm", Elementwise, false, true);
    put(Opcode::ReduceSum, "reduce_sum", Reduce, true, false);
    put(Opcode::ReduceProd, "reduce_prod", Reduce, true, false);
    put(Opcode::ReduceMin, "reduce_min", Reduce, true, false);
    put(Opcode::ReduceMax, "reduce_max", Reduce, true, false);
    put(Opcode::Matmul, "matmul", Matmul, true, false);
    put(Opcode::Permute, "permute", Permute, true, false);
    put(Opcode::Extend, "extend", Extend, true, false);
    put(Opcode::Reshape, "reshape", Reshape, true, false);
    table
});

impl Opcode {
    pub fn entry(self) -> &'static OpEntry {
        TABLE.get(&self).expect("every opcode has a table entry")
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn kind(self) -> OpKind {
        self.entry().kind
    }

    pub fn is_idempotent(self) -> bool {
        self.entry().idempotent
    }

    pub fn has_zero_grad(self) -> bool {
        self.entry().zero_grad
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
