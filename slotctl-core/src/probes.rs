//! Synchronous status predicates over a pre-opened [`Wire`]: is this node
//! cluster-enabled, and is it in the expected `cluster_state`.
use std::time::Duration;

use crate::error::ClusterCtlError;
use crate::retry::retry;
use crate::wire::Wire;

const POLL_ATTEMPTS: usize = 64;
const POLL_DELAY: Duration = Duration::from_millis(500);

/// `info` must report `cluster_enabled:1`.
pub fn cluster_enabled_check(wire: &mut Wire) -> Result<(), ClusterCtlError> {
    let text = wire.execute(vec!["info".into()])?.into_text()?;
    if field(&text, "cluster_enabled").as_deref() == Some("1") {
        Ok(())
    } else {
        Err(ClusterCtlError::status(
            wire.host(),
            wire.port(),
            "cluster_enabled is not 1",
        ))
    }
}

/// Candidate nodes before they join or seed a cluster: `cluster_state:fail`
/// and no slots assigned yet.
pub fn unset_check(wire: &mut Wire) -> Result<(), ClusterCtlError> {
    cluster_enabled_check(wire)?;
    let info = cluster_info(wire)?;
    let state = field(&info, "cluster_state");
    let assigned = field(&info, "cluster_slots_assigned");
    if state.as_deref() == Some("fail") && assigned.as_deref() == Some("0") {
        Ok(())
    } else {
        Err(ClusterCtlError::status(wire.host(), wire.port(), info))
    }
}

/// Nodes known to already be part of an operational cluster.
pub fn set_check(wire: &mut Wire) -> Result<(), ClusterCtlError> {
    cluster_enabled_check(wire)?;
    let info = cluster_info(wire)?;
    if field(&info, "cluster_state").as_deref() == Some("ok") {
        Ok(())
    } else {
        Err(ClusterCtlError::status(wire.host(), wire.port(), info))
    }
}

/// Waits for gossip convergence after slots have been assigned: up to 64
/// attempts at a fixed 500 ms delay.
pub fn poll_for_ok(wire: &mut Wire) -> Result<(), ClusterCtlError> {
    retry(POLL_ATTEMPTS, POLL_DELAY, || {
        let info = cluster_info(wire)?;
        let ok = field(&info, "cluster_state").as_deref() == Some("ok")
            && field(&info, "cluster_slots_assigned").as_deref()
                == Some(crate::topology::TOTAL_SLOTS.to_string().as_str());
        if ok {
            Ok(())
        } else {
            Err(ClusterCtlError::status(wire.host(), wire.port(), info))
        }
    })
}

fn cluster_info(wire: &mut Wire) -> Result<String, ClusterCtlError> {
    Ok(wire
        .execute(vec!["cluster".into(), "info".into()])?
        .into_text()?)
}

/// Finds a `key:value` line in an `info`/`cluster info` body and returns the
/// value, trimmed.
fn field(text: &str, key: &str) -> Option<String> {
    let prefix = format!("{key}:");
    text.lines()
        .find_map(|line| line.strip_prefix(&prefix))
        .map(|v| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_extracts_value_from_multiline_body() {
        let body = "cluster_enabled:1\ncluster_state:ok\ncluster_slots_assigned:16384\n";
        assert_eq!(field(body, "cluster_state").as_deref(), Some("ok"));
        assert_eq!(
            field(body, "cluster_slots_assigned").as_deref(),
            Some("16384")
        );
    }

    #[test]
    fn field_missing_key_is_none() {
        let body = "cluster_enabled:1\n";
        assert_eq!(field(body, "cluster_state"), None);
    }
}
