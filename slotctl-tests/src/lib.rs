//! A scripted, in-process stand-in for a cluster node, used to exercise the
//! orchestrator end to end without a real cluster running.
//!
//! Every [`FakeCluster::spawn_master`] or [`FakeCluster::spawn_slave`] call
//! starts a thread-per-connection TCP listener bound to `127.0.0.1:<port>`,
//! backed by state shared across every
//! node in the same [`FakeCluster`]. Gossip therefore "converges" the moment
//! a mutating command returns, which keeps the seed tests deterministic
//! without reproducing the real cluster's asynchronous propagation delay.

pub mod fake_cluster;

pub use fake_cluster::FakeCluster;
