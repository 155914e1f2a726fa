//! Local↔remote debug tunnel
//!
//! Owns the local TCP listener and the streaming connections into the
//! cluster, and relays traffic between them. The cluster side sits behind
//! the [`cluster::ClusterClient`] trait so the engine never depends on a
//! concrete API transport.

pub mod cluster;
pub mod engine;

pub use cluster::{
    ApiServerClient, ClusterClient, ClusterError, ComponentSelector, PodInfo, PortStream,
};
pub use engine::{TunnelEngine, TunnelError, TunnelHandle};
