//! Cross-process graph evaluation.
//!
//! Each peer process runs a [`manager::ClusterManager`] that assigns ids to
//! its local nodes and publishes them through a [`directory::Directory`].
//! Looking up a foreign id materializes a [`reference::RemoteRef`] — a proxy
//! node whose data arrives over the [`transport::Transport`] seam. The
//! [`session::DistSession`] schedules like the local session but resolves
//! every needed remote reference (one asynchronous call per owning cluster)
//! before the local height walk begins.

pub mod directory;
pub mod manager;
pub mod reference;
pub mod session;
pub mod transport;

use thiserror::Error;

/// Recoverable distributed-layer failures. These are normal runtime
/// conditions — a peer being unreachable is not a programming error — so
/// they surface as values the caller must check.
#[derive(Debug, Clone, Error)]
pub enum DistrError {
    #[error("no node with id `{id}` is known here")]
    UnknownNode { id: String },
    #[error("no peer advertises node `{id}`")]
    NoPeer { id: String },
    #[error("no transport connected to this manager")]
    MissingTransport,
    #[error("cluster `{cluster_id}` is unreachable")]
    UnknownCluster { cluster_id: String },
    #[error("peer call failed: {message}")]
    PeerFailure { message: String },
    #[error("remote call channel closed before completion")]
    ChannelClosed,
    #[error("node `{id}` has no materialized data to serve")]
    DataUnavailable { id: String },
}
