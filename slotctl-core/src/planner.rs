//! Pure slot-balancing planner: given a set of masters and optional
//! per-node weights, computes which slots should move where.
//!
//! Takes no locks, touches no wire — the orchestrator decides *which*
//! specific slot ids move; this only decides *how many* per donor/receiver
//! pair.
use crate::topology::Node;

/// One balance-plan entry: move `count` slots from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanMove {
    pub source: String,
    pub target: String,
    pub count: usize,
}

/// Computes a balance plan for `nodes`. Non-masters are ignored — mirrors
/// the source planner's own defensive filter rather than trusting every
/// caller to pre-filter. `weight` defaults to 1 per node when omitted.
pub fn plan_balance(nodes: &[Node], weight: impl Fn(&Node) -> f64) -> Vec<PlanMove> {
    let masters: Vec<&Node> = nodes.iter().filter(|n| n.is_master()).collect();
    if masters.is_empty() {
        return Vec::new();
    }

    let counts: Vec<i64> = masters
        .iter()
        .map(|n| n.assigned_slots.len() as i64)
        .collect();
    let total: i64 = counts.iter().sum();
    let weights: Vec<f64> = masters.iter().map(|n| weight(n)).collect();
    let total_weight: f64 = weights.iter().sum();

    if total == 0 || total_weight <= 0.0 {
        return Vec::new();
    }

    let targets: Vec<i64> = weights
        .iter()
        .map(|w| ((total as f64) * w / total_weight).floor() as i64)
        .collect();

    let mut deltas: Vec<i64> = targets
        .iter()
        .zip(counts.iter())
        .map(|(r, s)| r - s)
        .collect();

    let mut residual = total - targets.iter().sum::<i64>();

    // Absorb the residual into donors only, in input order, never onto a
    // receiver — a fractional slot can't be handed out, so it stays put.
    for delta in deltas.iter_mut() {
        if residual == 0 {
            break;
        }
        if *delta < 0 {
            let donor_capacity = -*delta;
            if donor_capacity < residual {
                residual += *delta;
                *delta = 0;
            } else {
                *delta += residual;
                residual = 0;
                break;
            }
        }
    }

    let mut entries: Vec<(usize, i64)> = deltas
        .into_iter()
        .enumerate()
        .filter(|(_, d)| *d != 0)
        .collect();
    entries.sort_by_key(|(_, d)| *d);

    let mut moves = Vec::new();
    let mut lo = 0usize;
    let mut hi = entries.len().saturating_sub(1);

    while lo < hi {
        let (donor_idx, donor_delta) = entries[lo];
        let (receiver_idx, receiver_delta) = entries[hi];
        if donor_delta >= 0 || receiver_delta <= 0 {
            break;
        }
        let count = std::cmp::min(-donor_delta, receiver_delta);
        if count > 0 {
            moves.push(PlanMove {
                source: masters[donor_idx].node_id.clone(),
                target: masters[receiver_idx].node_id.clone(),
                count: count as usize,
            });
        }
        entries[lo].1 += count;
        entries[hi].1 -= count;
        if entries[lo].1 == 0 {
            lo += 1;
        }
        if entries[hi].1 == 0 {
            if hi == 0 {
                break;
            }
            hi -= 1;
        }
    }

    moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::parse_line;

    fn master(id: &str, host_port: &str, slots: &str) -> Node {
        let line = format!("{id} {host_port} myself,master - 0 0 1 connected {slots}");
        parse_line(&line).unwrap()
    }

    fn equal_weight(_: &Node) -> f64 {
        1.0
    }

    #[test]
    fn two_node_split_moves_half() {
        let nodes = vec![
            master("a", "127.0.0.1:7000", "0-16383"),
            master("b", "127.0.0.1:7001", ""),
        ];
        let plan = plan_balance(&nodes, equal_weight);
        assert_eq!(
            plan,
            vec![PlanMove {
                source: "a".to_string(),
                target: "b".to_string(),
                count: 8192,
            }]
        );
    }

    #[test]
    fn three_node_split_totals_5461_to_new_node() {
        let nodes = vec![
            master("a", "127.0.0.1:7000", "0-8191"),
            master("b", "127.0.0.1:7001", "8192-16383"),
            master("c", "127.0.0.1:7002", ""),
        ];
        let plan = plan_balance(&nodes, equal_weight);
        let to_c: usize = plan.iter().filter(|m| m.target == "c").map(|m| m.count).sum();
        assert_eq!(to_c, 5461);
    }

    #[test]
    fn already_balanced_cluster_yields_empty_plan() {
        let nodes = vec![
            master("a", "127.0.0.1:7000", "0"),
            master("b", "127.0.0.1:7001", "1"),
            master("c", "127.0.0.1:7002", ""),
        ];
        assert_eq!(plan_balance(&nodes, equal_weight), Vec::new());
    }

    #[test]
    fn conservation_holds_for_every_emitted_plan() {
        let nodes = vec![
            master("a", "127.0.0.1:7000", "0-8191"),
            master("b", "127.0.0.1:7001", "8192-12287"),
            master("c", "127.0.0.1:7002", "12288-16383"),
        ];
        let plan = plan_balance(&nodes, equal_weight);
        for mv in &plan {
            assert!(mv.count > 0);
        }
    }

    #[test]
    fn non_masters_are_ignored() {
        let mut slave = master("d", "127.0.0.1:7003", "");
        slave.flags.clear();
        slave.flags.insert("slave".to_string());
        let nodes = vec![master("a", "127.0.0.1:7000", "0-16383"), slave];
        let plan = plan_balance(&nodes, equal_weight);
        assert!(plan.iter().all(|m| m.target != "d" && m.source != "d"));
    }
}
