//! Node metadata and the device collaborator seam.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::tensor::DType;

/// Process-wide version epoch. Every data mutation draws a fresh value, so
/// versions are comparable across independent branches of a graph: a newer
/// assignment always carries a larger version than anything computed before
/// it, no matter which leaf it landed on.
static EPOCH: AtomicU64 = AtomicU64::new(1);

/// Draws the next unused version number.
pub(crate) fn next_version() -> u64 {
    EPOCH.fetch_add(1, Ordering::AcqRel)
}

/// Per-node metadata: the element type tag and a monotonically increasing
/// data version. Version 0 means "never produced data".
#[derive(Debug)]
pub struct Meta {
    dtype: DType,
    version: AtomicU64,
}

impl Meta {
    pub fn new(dtype: DType) -> Self {
        Self::with_version(dtype, 0)
    }

    pub fn with_version(dtype: DType, version: u64) -> Self {
        Meta {
            dtype,
            version: AtomicU64::new(version),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Unconditionally advances the version to a fresh epoch value,
    /// returning it.
    pub(crate) fn bump(&self) -> u64 {
        let version = next_version();
        self.version.store(version, Ordering::Release);
        version
    }

    /// Raises the version to `version` if that is an increase.
    pub(crate) fn advance_to(&self, version: u64) -> bool {
        let mut current = self.version.load(Ordering::Acquire);
        loop {
            if version <= current {
                return false;
            }
            match self.version.compare_exchange(
                current,
                version,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn reset(&self) {
        self.version.store(0, Ordering::Release);
    }
}

/// Failures reported by a device while recomputing a functor.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device does not support opcode `{op}`")]
    Unsupported { op: &'static str },
    #[error("argument `{label}` has no materialized data")]
    MissingInput { label: String },
    #[error("kernel failure: {0}")]
    Kernel(String),
}

/// The numeric collaborator. `calc` recomputes one functor's buffer from its
/// already-up-to-date arguments; kernel correctness is the device's problem,
/// scheduling is the session's. The allocation hooks exist for accounting
/// and are free to be no-ops.
pub trait Device: Send + Sync {
    fn calc(&self, func: &crate::graph::functor::Functor) -> Result<(), DeviceError>;

    fn allocate(&self, _nbytes: usize) {}

    fn deallocate(&self, _nbytes: usize) {}
}
