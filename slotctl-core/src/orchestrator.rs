//! The slot-migration state machine: the one-slot protocol, the many-slot
//! loop built on top of it, and the composed operations the CLI drives.
use std::time::Duration;

use logger::Logger;

use crate::error::{ClusterCtlError, is_already_owner, is_not_owner};
use crate::retry::retry;
use crate::topology::{Node, NodeId, NodeTable};

const SETSLOT_NODE_ATTEMPTS: usize = 16;
const SETSLOT_NODE_DELAY: Duration = Duration::from_millis(100);
const GETKEYS_BATCH: i64 = 10;
const MIGRATE_KEY_TIMEOUT_MS: i64 = 30_000;
const DB_INDEX: i64 = 0;

/// Moves one slot's ownership and resident keys from `source_id` to
/// `target_id`. `nodes` must contain every currently known master so
/// ownership can be propagated to all of them. Returns the number of keys
/// migrated.
pub fn migrate_one_slot(
    nodes: &mut NodeTable,
    source_id: &str,
    target_id: &str,
    slot: u16,
    timeout: Duration,
    logger: &Logger,
) -> Result<usize, ClusterCtlError> {
    let (target_host, target_port) = {
        let target = nodes
            .get(target_id)
            .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {target_id}")))?;
        (target.host.clone(), target.port)
    };

    mark_importing(nodes, target_id, slot, source_id, timeout)?;
    mark_migrating(nodes, source_id, slot, target_id, timeout)?;

    let key_count = drain_keys(
        nodes,
        source_id,
        slot,
        &target_host,
        target_port,
        timeout,
        logger,
    )?;

    commit_on_source(nodes, source_id, slot, target_id, timeout)?;
    propagate(nodes, source_id, slot, target_id, timeout)?;

    logger.info(
        &format!("slot {slot}: {source_id} -> {target_id} ({key_count} keys)"),
        "orchestrator",
    );
    Ok(key_count)
}

fn mark_importing(
    nodes: &mut NodeTable,
    target_id: &str,
    slot: u16,
    source_id: &str,
    timeout: Duration,
) -> Result<(), ClusterCtlError> {
    let target = nodes
        .get_mut(target_id)
        .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {target_id}")))?;
    let wire = target.wire(timeout)?;
    match wire.execute(vec![
        "cluster".into(),
        "setslot".into(),
        (slot as i64).into(),
        "importing".into(),
        source_id.into(),
    ]) {
        Ok(_) => Ok(()),
        Err(e) if is_already_owner(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

fn mark_migrating(
    nodes: &mut NodeTable,
    source_id: &str,
    slot: u16,
    target_id: &str,
    timeout: Duration,
) -> Result<(), ClusterCtlError> {
    let source = nodes
        .get_mut(source_id)
        .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {source_id}")))?;
    let wire = source.wire(timeout)?;
    match wire.execute(vec![
        "cluster".into(),
        "setslot".into(),
        (slot as i64).into(),
        "migrating".into(),
        target_id.into(),
    ]) {
        Ok(_) => Ok(()),
        Err(e) if is_not_owner(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

fn drain_keys(
    nodes: &mut NodeTable,
    source_id: &str,
    slot: u16,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
    logger: &Logger,
) -> Result<usize, ClusterCtlError> {
    let source = nodes
        .get_mut(source_id)
        .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {source_id}")))?;
    let wire = source.wire(timeout)?;

    let mut total = 0usize;
    loop {
        let keys = wire
            .execute(vec![
                "cluster".into(),
                "getkeysinslot".into(),
                (slot as i64).into(),
                GETKEYS_BATCH.into(),
            ])?
            .into_string_array()?;
        if keys.is_empty() {
            break;
        }

        let batch: Vec<Vec<slotctl_proto::CommandArg>> = keys
            .iter()
            .map(|key| {
                vec![
                    "migrate".into(),
                    target_host.into(),
                    (target_port as i64).into(),
                    key.clone().into(),
                    DB_INDEX.into(),
                    MIGRATE_KEY_TIMEOUT_MS.into(),
                ]
            })
            .collect();
        wire.execute_bulk(batch)?;
        total += keys.len();
        logger.debug(
            &format!("slot {slot}: drained {} keys so far", total),
            "orchestrator",
            total,
        );
    }
    Ok(total)
}

fn commit_on_source(
    nodes: &mut NodeTable,
    source_id: &str,
    slot: u16,
    target_id: &str,
    timeout: Duration,
) -> Result<(), ClusterCtlError> {
    retry(SETSLOT_NODE_ATTEMPTS, SETSLOT_NODE_DELAY, || {
        let source = nodes
            .get_mut(source_id)
            .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {source_id}")))?;
        let wire = source.wire(timeout)?;
        wire.execute(vec![
            "cluster".into(),
            "setslot".into(),
            (slot as i64).into(),
            "node".into(),
            target_id.into(),
        ])
    })?;
    Ok(())
}

/// Every other master in `nodes` learns the new owner, including the
/// target — it sees its own `setslot node` during this same pass.
fn propagate(
    nodes: &mut NodeTable,
    source_id: &str,
    slot: u16,
    target_id: &str,
    timeout: Duration,
) -> Result<(), ClusterCtlError> {
    let mut ids: Vec<NodeId> = nodes
        .values()
        .filter(|n| n.is_master() && n.node_id != source_id)
        .map(|n| n.node_id.clone())
        .collect();
    ids.sort();

    for id in ids {
        retry(SETSLOT_NODE_ATTEMPTS, SETSLOT_NODE_DELAY, || {
            let node = nodes
                .get_mut(&id)
                .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {id}")))?;
            let wire = node.wire(timeout)?;
            wire.execute(vec![
                "cluster".into(),
                "setslot".into(),
                (slot as i64).into(),
                "node".into(),
                target_id.into(),
            ])
        })?;
    }
    Ok(())
}

/// Moves `slots` one at a time from `source_id` to `target_id`, never
/// parallelized — concurrent moves on the same donor would race the
/// `getkeysinslot`/`migrate` sequence. Returns the total key count moved.
pub fn migrate_many_slots(
    nodes: &mut NodeTable,
    source_id: &str,
    target_id: &str,
    slots: &[u16],
    timeout: Duration,
    logger: &Logger,
) -> Result<usize, ClusterCtlError> {
    let mut total = 0usize;
    for &slot in slots {
        total += migrate_one_slot(nodes, source_id, target_id, slot, timeout, logger)?;
    }
    Ok(total)
}

/// The subset of `count` slots a [`crate::planner::PlanMove`] refers to:
/// the first `count` entries of the donor's `assigned_slots` as observed
/// when the topology snapshot was taken.
pub fn plan_move_slots(source: &Node, count: usize) -> Vec<u16> {
    source.assigned_slots.iter().take(count).copied().collect()
}

/// Runs every move of a balance plan in order.
pub fn execute_plan(
    nodes: &mut NodeTable,
    snapshot: &NodeTable,
    plan: &[crate::planner::PlanMove],
    timeout: Duration,
    logger: &Logger,
) -> Result<usize, ClusterCtlError> {
    let mut total = 0usize;
    for mv in plan {
        let source = snapshot
            .get(&mv.source)
            .ok_or_else(|| ClusterCtlError::validation(format!("unknown node {}", mv.source)))?;
        let slots = plan_move_slots(source, mv.count);
        total += migrate_many_slots(nodes, &mv.source, &mv.target, &slots, timeout, logger)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_move_slots_takes_prefix() {
        let mut nodes = crate::topology::NodeTable::new();
        let line = "a 127.0.0.1:7000 myself,master - 0 0 1 connected 0-9";
        let node = crate::topology::parse_line(line).unwrap();
        let slots = plan_move_slots(&node, 3);
        assert_eq!(slots, vec![0, 1, 2]);
        nodes.insert(node.node_id.clone(), node);
        assert_eq!(nodes.len(), 1);
    }
}
