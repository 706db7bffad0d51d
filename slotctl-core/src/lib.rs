//! Slot-migration protocol and cluster-topology orchestrator: the wire
//! adapter, gossip-line node model, status probes, balance planner, and the
//! composed operations the operator surface drives.

pub mod error;
pub mod ops;
pub mod orchestrator;
pub mod planner;
pub mod probes;
pub mod retry;
pub mod topology;
pub mod wire;

pub use error::ClusterCtlError;
pub use ops::{Options, RoleFilter};
pub use topology::{Node, NodeId, NodeTable, TOTAL_SLOTS};
pub use wire::Wire;
