//! Composed, user-facing cluster operations built on top of the probes,
//! planner, and one-slot protocol: create, add/remove a node, rescue a
//! cluster that lost slot owners, repair stuck migrations, pair a replica,
//! shut a cluster down, move an explicit slot set, and broadcast a command.
use std::collections::HashSet;
use std::time::Duration;

use logger::Logger;
use slotctl_proto::CommandArg;

use crate::error::{ClusterCtlError, is_containing_keys, is_unknown_node};
use crate::orchestrator::{execute_plan, migrate_many_slots};
use crate::planner::plan_balance;
use crate::probes::{poll_for_ok, set_check, unset_check};
use crate::retry::retry;
use crate::topology::{Node, NodeId, TOTAL_SLOTS, fetch_topology, index_by_id};
use crate::wire::Wire;

/// Tunables shared by every composed operation.
#[derive(Debug, Clone)]
pub struct Options {
    pub timeout: Duration,
    pub max_slots: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            timeout: Wire::DEFAULT_TIMEOUT,
            max_slots: 1024,
        }
    }
}

/// Role filter for [`execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFilter {
    MasterOnly,
    SlaveOnly,
}

/// One node's outcome from a broadcast [`execute`] call. Errors do not
/// abort the fan-out — they are collected alongside successes.
pub struct NodeOutcome {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub result: Result<String, ClusterCtlError>,
}

/// Splits `start..start+count` into chunks of at most `max_slots`, the
/// batching `cluster addslots` needs to avoid oversized frames.
fn chunk_slots(start: u16, count: u16, max_slots: usize) -> Vec<Vec<u16>> {
    let slots: Vec<u16> = (start..start + count).collect();
    slots.chunks(max_slots.max(1)).map(|c| c.to_vec()).collect()
}

fn addslots_chunked(wire: &mut Wire, start: u16, count: u16, max_slots: usize) -> Result<(), ClusterCtlError> {
    for chunk in chunk_slots(start, count, max_slots) {
        let mut args: Vec<CommandArg> = vec!["cluster".into(), "addslots".into()];
        args.extend(chunk.iter().map(|s| (*s as i64).into()));
        wire.execute(args)?;
    }
    Ok(())
}

/// Builds a fresh cluster out of `addrs`, each a bare `(host, port)` of a
/// node that is not yet part of any cluster. The first address is the seed;
/// every other node `cluster meet`s it. Slots split as evenly as
/// `16384 / N` allows, with the residue going to the seed.
pub fn create_cluster(addrs: &[(String, u16)], opts: &Options, logger: &Logger) -> Result<(), ClusterCtlError> {
    if addrs.is_empty() {
        return Err(ClusterCtlError::validation("create requires at least one node"));
    }

    let mut wires = Vec::with_capacity(addrs.len());
    for (host, port) in addrs {
        let mut wire = Wire::connect(host, *port, opts.timeout)?;
        unset_check(&mut wire)?;
        wires.push(wire);
    }

    for (host, port) in &addrs[1..] {
        wires[0].execute(vec![
            "cluster".into(),
            "meet".into(),
            host.as_str().into(),
            (*port as i64).into(),
        ])?;
    }

    let n = addrs.len() as u16;
    let base = TOTAL_SLOTS / n;
    let residue = TOTAL_SLOTS - base * n;
    let mut next_slot = 0u16;
    for (i, wire) in wires.iter_mut().enumerate() {
        let count = if i == 0 { base + residue } else { base };
        addslots_chunked(wire, next_slot, count, opts.max_slots)?;
        next_slot += count;
    }

    for wire in wires.iter_mut() {
        poll_for_ok(wire)?;
    }
    logger.info(&format!("created cluster with {} nodes", addrs.len()), "ops");
    for wire in wires.iter_mut() {
        wire.close();
    }
    Ok(())
}

/// Joins `newcomer` into the cluster reachable via `seed`. When `rebalance`
/// is set, runs the planner against the post-join topology (seen from the
/// newcomer) and executes the resulting plan; otherwise the newcomer joins
/// with no slots.
pub fn add_node(
    seed: (String, u16),
    newcomer: (String, u16),
    rebalance: bool,
    opts: &Options,
    logger: &Logger,
) -> Result<(), ClusterCtlError> {
    let mut seed_wire = Wire::connect(&seed.0, seed.1, opts.timeout)?;
    set_check(&mut seed_wire)?;
    let mut new_wire = Wire::connect(&newcomer.0, newcomer.1, opts.timeout)?;
    unset_check(&mut new_wire)?;

    seed_wire.execute(vec![
        "cluster".into(),
        "meet".into(),
        newcomer.0.as_str().into(),
        (newcomer.1 as i64).into(),
    ])?;
    poll_for_ok(&mut new_wire)?;
    logger.info(&format!("{}:{} joined the cluster", newcomer.0, newcomer.1), "ops");

    if !rebalance {
        seed_wire.close();
        new_wire.close();
        return Ok(());
    }

    let topology = fetch_topology(&mut new_wire)?;
    seed_wire.close();
    new_wire.close();

    let plan = plan_balance(&topology, |_| 1.0);
    if plan.is_empty() {
        return Ok(());
    }
    let snapshot = index_by_id(topology);
    let mut table = snapshot.clone();
    execute_plan(&mut table, &snapshot, &plan, opts.timeout, logger)?;
    Ok(())
}

/// Removes `node_addr` from the cluster: migrates its slots (if any) evenly
/// across the remaining masters, broadcasts `cluster forget`, then resets
/// the departing node.
pub fn remove_node(node_addr: (String, u16), opts: &Options, logger: &Logger) -> Result<(), ClusterCtlError> {
    let mut wire = Wire::connect(&node_addr.0, node_addr.1, opts.timeout)?;
    set_check(&mut wire)?;
    let topology = fetch_topology(&mut wire)?;

    let target = topology
        .iter()
        .find(|n| n.host == node_addr.0 && n.port == node_addr.1)
        .ok_or_else(|| ClusterCtlError::validation("target node not present in its own topology dump"))?
        .clone();

    if target.is_master() && !target.assigned_slots.is_empty() {
        let has_slaves = topology
            .iter()
            .any(|n| n.master_id.as_deref() == Some(target.node_id.as_str()));
        if has_slaves {
            return Err(ClusterCtlError::validation("The master still has slaves"));
        }

        let mut other_ids: Vec<NodeId> = topology
            .iter()
            .filter(|n| n.is_master() && n.node_id != target.node_id)
            .map(|n| n.node_id.clone())
            .collect();
        other_ids.sort();
        if other_ids.is_empty() {
            return Err(ClusterCtlError::validation("This is the last node"));
        }

        let mut table = index_by_id(topology.clone());
        let total = target.assigned_slots.len();
        let receivers = other_ids.len();
        let base = total / receivers;
        let mut idx = 0usize;
        for (i, id) in other_ids.iter().enumerate() {
            let count = if i + 1 == receivers { total - idx } else { base };
            let slots: Vec<u16> = target.assigned_slots[idx..idx + count].to_vec();
            idx += count;
            migrate_many_slots(&mut table, &target.node_id, id, &slots, opts.timeout, logger)?;
        }
    }

    for node in topology.iter().filter(|n| n.node_id != target.node_id) {
        let mut peer = Wire::connect(&node.host, node.port, opts.timeout)?;
        match peer.execute(vec![
            "cluster".into(),
            "forget".into(),
            target.node_id.as_str().into(),
        ]) {
            Ok(_) => {}
            Err(e) if is_unknown_node(&e) => {}
            Err(e) => return Err(e),
        }
        peer.close();
    }

    let mut target_wire = Wire::connect(&target.host, target.port, opts.timeout)?;
    target_wire.execute(vec!["cluster".into(), "reset".into()])?;
    target_wire.close();
    wire.close();

    logger.info(&format!("removed node {}", target.node_id), "ops");
    Ok(())
}

/// Assigns any slot with no live master owner to a fresh node.
pub fn rescue_cluster(seed: (String, u16), fresh: (String, u16), opts: &Options, logger: &Logger) -> Result<(), ClusterCtlError> {
    let mut seed_wire = Wire::connect(&seed.0, seed.1, opts.timeout)?;
    let topology = fetch_topology(&mut seed_wire)?;

    let mut owned: HashSet<u16> = HashSet::new();
    for node in topology.iter().filter(|n| n.is_master() && !n.has_failed()) {
        owned.extend(node.assigned_slots.iter().copied());
    }
    let missing: Vec<u16> = (0..TOTAL_SLOTS).filter(|s| !owned.contains(s)).collect();
    if missing.is_empty() {
        seed_wire.close();
        return Ok(());
    }

    let mut fresh_wire = Wire::connect(&fresh.0, fresh.1, opts.timeout)?;
    unset_check(&mut fresh_wire)?;
    seed_wire.execute(vec![
        "cluster".into(),
        "meet".into(),
        fresh.0.as_str().into(),
        (fresh.1 as i64).into(),
    ])?;

    for chunk in missing.chunks(opts.max_slots.max(1)) {
        let mut args: Vec<CommandArg> = vec!["cluster".into(), "addslots".into()];
        args.extend(chunk.iter().map(|s| (*s as i64).into()));
        fresh_wire.execute(args)?;
    }
    poll_for_ok(&mut fresh_wire)?;

    logger.info(&format!("rescued {} unowned slots onto {}:{}", missing.len(), fresh.0, fresh.1), "ops");
    seed_wire.close();
    fresh_wire.close();
    Ok(())
}

/// Replays the one-slot protocol for every in-progress migration marker
/// found in the gossip dump. A marker referencing a node absent from the
/// current topology is logged and skipped rather than treated as fatal.
pub fn fix_migrating(seed: (String, u16), opts: &Options, logger: &Logger) -> Result<(), ClusterCtlError> {
    let mut seed_wire = Wire::connect(&seed.0, seed.1, opts.timeout)?;
    let topology = fetch_topology(&mut seed_wire)?;
    seed_wire.close();

    let mut table = index_by_id(topology.clone());
    for node in &topology {
        for marker in &node.markers {
            match marker {
                crate::topology::SlotToken::Importing { slot, from } => {
                    if !table.contains_key(from) {
                        logger.warn(&format!("fix: source {from} for slot {slot} not found, skipping"), "ops");
                        continue;
                    }
                    crate::orchestrator::migrate_one_slot(&mut table, from, &node.node_id, *slot, opts.timeout, logger)?;
                }
                crate::topology::SlotToken::Exporting { slot, to } => {
                    if !table.contains_key(to) {
                        logger.warn(&format!("fix: target {to} for slot {slot} not found, skipping"), "ops");
                        continue;
                    }
                    crate::orchestrator::migrate_one_slot(&mut table, &node.node_id, to, *slot, opts.timeout, logger)?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Pairs `slave_addr` to replicate `master_addr`, then waits for the
/// master's own gossip view to list the new replica.
pub fn replicate(master_addr: (String, u16), slave_addr: (String, u16), opts: &Options, logger: &Logger) -> Result<(), ClusterCtlError> {
    let mut master_wire = Wire::connect(&master_addr.0, master_addr.1, opts.timeout)?;
    set_check(&mut master_wire)?;
    let topology = fetch_topology(&mut master_wire)?;
    let master_node = topology
        .iter()
        .find(|n| n.host == master_addr.0 && n.port == master_addr.1)
        .ok_or_else(|| ClusterCtlError::validation("master not present in its own topology dump"))?;
    let master_id = if master_node.is_master() {
        master_node.node_id.clone()
    } else {
        master_node
            .master_id
            .clone()
            .ok_or_else(|| ClusterCtlError::validation("node has no effective master id"))?
    };

    let mut slave_wire = Wire::connect(&slave_addr.0, slave_addr.1, opts.timeout)?;
    unset_check(&mut slave_wire)?;

    master_wire.execute(vec![
        "cluster".into(),
        "meet".into(),
        slave_addr.0.as_str().into(),
        (slave_addr.1 as i64).into(),
    ])?;
    slave_wire.execute(vec!["cluster".into(), "replicate".into(), master_id.as_str().into()])?;

    let addr_token = format!("{}:{}", slave_addr.0, slave_addr.1);
    retry(16, Duration::from_secs(1), || {
        let body = master_wire.execute(vec!["cluster".into(), "nodes".into()])?.into_text()?;
        let joined = body.lines().any(|l| l.contains(&addr_token) && l.contains("slave"));
        if joined {
            Ok(())
        } else {
            Err(ClusterCtlError::status(&master_addr.0, master_addr.1, "replica not yet visible"))
        }
    })?;

    logger.info(&format!("{}:{} now replicates {}", slave_addr.0, slave_addr.1, master_id), "ops");
    master_wire.close();
    slave_wire.close();
    Ok(())
}

/// Tears down a single-node cluster. Requires the node to see exactly one
/// entry in its own `cluster nodes` (optionally ignoring failed entries).
pub fn shutdown(node_addr: (String, u16), ignore_failed: bool, opts: &Options, logger: &Logger) -> Result<(), ClusterCtlError> {
    let mut wire = Wire::connect(&node_addr.0, node_addr.1, opts.timeout)?;
    set_check(&mut wire)?;
    let topology = fetch_topology(&mut wire)?;
    let live: Vec<&Node> = if ignore_failed {
        topology.iter().filter(|n| !n.has_failed()).collect()
    } else {
        topology.iter().collect()
    };
    if live.len() != 1 {
        return Err(ClusterCtlError::validation(format!(
            "expected exactly one node for shutdown, found {}",
            live.len()
        )));
    }

    match wire.execute(vec!["cluster".into(), "reset".into()]) {
        Ok(_) => {}
        Err(e) if is_containing_keys(&e) => {
            return Err(ClusterCtlError::status(
                &node_addr.0,
                node_addr.1,
                "node still holds keys; delete data before shutdown",
            ));
        }
        Err(e) => return Err(e),
    }
    logger.info(&format!("{}:{} reset for shutdown", node_addr.0, node_addr.1), "ops");
    wire.close();
    Ok(())
}

/// True when every id in `requested` is present in `held`. Split out of
/// [`migrate_slots`] so the validation rule can be exercised without a
/// socket.
fn all_held(held: &HashSet<u16>, requested: &[u16]) -> bool {
    requested.iter().all(|s| held.contains(s))
}

/// Moves an explicit set of slots from `src` to `dst`, independent of the
/// planner. `src` must currently own every requested slot.
pub fn migrate_slots(src: (String, u16), dst: (String, u16), slots: Vec<u16>, opts: &Options, logger: &Logger) -> Result<usize, ClusterCtlError> {
    if src == dst {
        return Err(ClusterCtlError::validation("source and destination must differ"));
    }

    let mut seed_wire = Wire::connect(&src.0, src.1, opts.timeout)?;
    let topology = fetch_topology(&mut seed_wire)?;
    seed_wire.close();

    let src_node = topology
        .iter()
        .find(|n| n.is_master() && n.host == src.0 && n.port == src.1)
        .ok_or_else(|| ClusterCtlError::validation(format!("{}:{} is not a known master", src.0, src.1)))?;
    let dst_node = topology
        .iter()
        .find(|n| n.is_master() && n.host == dst.0 && n.port == dst.1)
        .ok_or_else(|| ClusterCtlError::validation(format!("{}:{} is not a known master", dst.0, dst.1)))?;

    let held: HashSet<u16> = src_node.assigned_slots.iter().copied().collect();
    if !all_held(&held, &slots) {
        return Err(ClusterCtlError::validation(format!("Not all slot held by {}:{}", src.0, src.1)));
    }

    let src_id = src_node.node_id.clone();
    let dst_id = dst_node.node_id.clone();
    let mut table = index_by_id(topology);
    migrate_many_slots(&mut table, &src_id, &dst_id, &slots, opts.timeout, logger)
}

/// Broadcasts `command` to every node in `nodes` matching `filter` (or all
/// of them, with no filter). Per-node failures are collected, not
/// propagated — a fan-out reports every outcome rather than failing fast.
pub fn execute(nodes: &mut crate::topology::NodeTable, command: &[String], filter: Option<RoleFilter>, opts: &Options) -> Vec<NodeOutcome> {
    let mut ids: Vec<NodeId> = nodes
        .values()
        .filter(|n| match filter {
            Some(RoleFilter::MasterOnly) => n.is_master(),
            Some(RoleFilter::SlaveOnly) => n.is_slave(),
            None => true,
        })
        .map(|n| n.node_id.clone())
        .collect();
    ids.sort();

    ids.into_iter()
        .map(|id| {
            let node = nodes.get_mut(&id).expect("id came from this table");
            let host = node.host.clone();
            let port = node.port;
            let result = (|| -> Result<String, ClusterCtlError> {
                let wire = node.wire(opts.timeout)?;
                let args: Vec<CommandArg> = command.iter().map(|c| c.as_str().into()).collect();
                let reply = wire.execute(args)?;
                Ok(reply.into_text()?)
            })();
            NodeOutcome {
                node_id: id,
                host,
                port,
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_slots_splits_at_max() {
        let chunks = chunk_slots(0, 10, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], vec![0, 1, 2, 3]);
        assert_eq!(chunks[2], vec![8, 9]);
    }

    #[test]
    fn chunk_slots_empty_count_yields_no_chunks() {
        assert_eq!(chunk_slots(0, 0, 4), Vec::<Vec<u16>>::new());
    }

    #[test]
    fn all_held_true_when_every_slot_present() {
        let held: HashSet<u16> = [1, 2, 3].into_iter().collect();
        assert!(all_held(&held, &[1, 2]));
        assert!(!all_held(&held, &[1, 4]));
    }
}
