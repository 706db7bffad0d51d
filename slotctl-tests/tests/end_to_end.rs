//! Exercises the composed operations end to end against [`FakeCluster`],
//! following the create -> join -> migrate -> remove narrative the
//! operator surface is built around.

use std::net::TcpListener;

use logger::Logger;
use slotctl_core::error::ClusterCtlError;
use slotctl_core::ops::{self, Options, RoleFilter};
use slotctl_core::topology::{TOTAL_SLOTS, fetch_topology, index_by_id};
use slotctl_core::wire::Wire;
use slotctl_tests::FakeCluster;

/// Grabs an OS-assigned free port by binding then immediately dropping a
/// listener, so nodes spawned moments later don't collide across tests
/// running in parallel.
fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local_addr")
        .port()
}

fn opts() -> Options {
    Options {
        timeout: std::time::Duration::from_millis(500),
        max_slots: 4096,
    }
}

fn quiet_logger() -> Logger {
    Logger::null()
}

#[test]
fn single_node_cluster_converges_to_ok() {
    let cluster = FakeCluster::new();
    let port = free_port();
    cluster.spawn_master("a", port, Vec::new());

    ops::create_cluster(&[("127.0.0.1".to_string(), port)], &opts(), &quiet_logger())
        .expect("create_cluster on a single fresh node");

    assert_eq!(cluster.slots_of("a").len(), TOTAL_SLOTS as usize);
}

#[test]
fn join_rebalances_slots_evenly() {
    let cluster = FakeCluster::new();
    let port_a = free_port();
    let port_b = free_port();
    cluster.spawn_master("a", port_a, Vec::new());
    cluster.spawn_master("b", port_b, Vec::new());

    ops::create_cluster(&[("127.0.0.1".to_string(), port_a)], &opts(), &quiet_logger())
        .expect("create_cluster with only the seed");
    assert_eq!(cluster.slots_of("a").len(), TOTAL_SLOTS as usize);

    ops::add_node(
        ("127.0.0.1".to_string(), port_a),
        ("127.0.0.1".to_string(), port_b),
        true,
        &opts(),
        &quiet_logger(),
    )
    .expect("add_node with rebalance");

    let half = TOTAL_SLOTS as usize / 2;
    assert_eq!(cluster.slots_of("a").len(), half);
    assert_eq!(cluster.slots_of("b").len(), half);
}

/// Seeds a two-master split directly rather than going through
/// `create_cluster`/`add_node`, since only the migration step itself is
/// under test here.
fn two_master_split(cluster: &FakeCluster) -> (u16, u16) {
    let port_a = free_port();
    let port_b = free_port();
    let half = TOTAL_SLOTS / 2;
    cluster.spawn_master("a", port_a, (0..half).collect());
    cluster.spawn_master("b", port_b, (half..TOTAL_SLOTS).collect());
    cluster.meet_pair("a", "b");
    (port_a, port_b)
}

#[test]
fn migrate_single_slot_moves_ownership() {
    let cluster = FakeCluster::new();
    let (port_a, port_b) = two_master_split(&cluster);
    let half = TOTAL_SLOTS / 2;
    let last_of_a = half - 1;

    let moved = ops::migrate_slots(
        ("127.0.0.1".to_string(), port_a),
        ("127.0.0.1".to_string(), port_b),
        vec![last_of_a],
        &opts(),
        &quiet_logger(),
    )
    .expect("migrate a single held slot");

    assert_eq!(moved, 1);
    assert!(!cluster.slots_of("a").contains(&last_of_a));
    assert!(cluster.slots_of("b").contains(&last_of_a));
}

#[test]
fn migrate_fails_when_source_no_longer_owns_slot() {
    let cluster = FakeCluster::new();
    let (port_a, port_b) = two_master_split(&cluster);
    let half = TOTAL_SLOTS / 2;

    // slot `half` belongs to b, not a.
    let err = ops::migrate_slots(
        ("127.0.0.1".to_string(), port_a),
        ("127.0.0.1".to_string(), port_b),
        vec![half],
        &opts(),
        &quiet_logger(),
    )
    .unwrap_err();

    match err {
        ClusterCtlError::Validation(msg) => assert!(msg.contains("Not all slot held by")),
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn remove_node_slave_and_last_node_errors() {
    let cluster = FakeCluster::new();
    let port_a = free_port();
    let port_b = free_port();
    let port_c = free_port();
    cluster.spawn_master("a", port_a, (0..TOTAL_SLOTS).collect());
    cluster.spawn_master("b", port_b, Vec::new());
    cluster.spawn_slave("c", port_c, "a");
    cluster.meet_pair("a", "b");
    cluster.meet_pair("a", "c");

    let a = ("127.0.0.1".to_string(), port_a);
    let b = ("127.0.0.1".to_string(), port_b);
    let c = ("127.0.0.1".to_string(), port_c);

    let err = ops::remove_node(a.clone(), &opts(), &quiet_logger()).unwrap_err();
    match err {
        ClusterCtlError::Validation(msg) => assert!(msg.contains("The master still has slaves")),
        other => panic!("expected a validation error, got {other:?}"),
    }

    ops::remove_node(c, &opts(), &quiet_logger()).expect("removing the slave first should succeed");
    assert!(!cluster.is_known("c"));

    ops::remove_node(a, &opts(), &quiet_logger()).expect("a's slots now migrate onto b");
    assert_eq!(cluster.slots_of("b").len(), TOTAL_SLOTS as usize);

    let err = ops::remove_node(b, &opts(), &quiet_logger()).unwrap_err();
    match err {
        ClusterCtlError::Validation(msg) => assert!(msg.contains("This is the last node")),
        other => panic!("expected a validation error, got {other:?}"),
    }
}

/// `fix_migrating` replays an `importing`-only marker by finishing the
/// one-slot protocol from the recorded source onto the node that already
/// declared itself importing. Ownership therefore ends up on the importer,
/// not the source — what matters for recovery is that the slot lands on
/// exactly one live master and its keys survive the move.
#[test]
fn fix_migrating_recovers_stuck_import_and_preserves_key() {
    let cluster = FakeCluster::new();
    let port_a = free_port();
    let port_b = free_port();
    cluster.spawn_master("a", port_a, vec![0]);
    cluster.spawn_master("b", port_b, Vec::new());
    cluster.meet_pair("a", "b");

    cluster.put_key("a", 0, "h-893", "v-1");
    cluster.force_importing("b", 0, "a");

    ops::fix_migrating(("127.0.0.1".to_string(), port_a), &opts(), &quiet_logger())
        .expect("fix_migrating replays the stuck import marker");

    let a_slots = cluster.slots_of("a");
    let b_slots = cluster.slots_of("b");
    assert!(!a_slots.contains(&0));
    assert!(b_slots.contains(&0));
    assert_eq!(a_slots.len() + b_slots.len(), 1);

    let (owner, value) = cluster.find_key("h-893").expect("key survives the recovered migration");
    assert_eq!(owner, "b");
    assert_eq!(value, "v-1");
}

#[test]
fn rescue_cluster_assigns_unowned_slots_to_fresh_node() {
    let cluster = FakeCluster::new();
    let port_a = free_port();
    let port_fresh = free_port();
    let covered = TOTAL_SLOTS - 1;
    cluster.spawn_master("a", port_a, (0..covered).collect());
    cluster.spawn_master("fresh", port_fresh, Vec::new());

    ops::rescue_cluster(
        ("127.0.0.1".to_string(), port_a),
        ("127.0.0.1".to_string(), port_fresh),
        &opts(),
        &quiet_logger(),
    )
    .expect("rescue_cluster assigns the one unowned slot");

    let last_slot = TOTAL_SLOTS - 1;
    assert!(cluster.slots_of("fresh").contains(&last_slot));
    assert!(cluster.is_known("fresh"));
}

#[test]
fn replicate_joins_slave_to_master() {
    let cluster = FakeCluster::new();
    let port_master = free_port();
    let port_slave = free_port();
    cluster.spawn_master("a", port_master, (0..TOTAL_SLOTS).collect());
    cluster.spawn_slave("b", port_slave, "unassigned");

    ops::replicate(
        ("127.0.0.1".to_string(), port_master),
        ("127.0.0.1".to_string(), port_slave),
        &opts(),
        &quiet_logger(),
    )
    .expect("replicate joins the fresh slave to the master");

    assert!(cluster.is_known("b"));
}

#[test]
fn execute_broadcasts_command_to_filtered_nodes() {
    let cluster = FakeCluster::new();
    let port_a = free_port();
    let port_b = free_port();
    let port_c = free_port();
    cluster.spawn_master("a", port_a, (0..TOTAL_SLOTS).collect());
    cluster.spawn_master("b", port_b, Vec::new());
    cluster.spawn_slave("c", port_c, "a");
    cluster.meet_pair("a", "b");
    cluster.meet_pair("a", "c");

    let mut seed_wire = Wire::connect("127.0.0.1", port_a, opts().timeout).expect("connect to seed");
    let topology = fetch_topology(&mut seed_wire).expect("fetch topology for execute");
    seed_wire.close();
    let mut table = index_by_id(topology);

    let all = ops::execute(&mut table, &["ping".to_string()], None, &opts());
    assert_eq!(all.len(), 3);
    for outcome in &all {
        match &outcome.result {
            Ok(reply) => assert_eq!(reply, "PONG"),
            Err(e) => panic!("node {} failed ping: {e:?}", outcome.node_id),
        }
    }

    let masters_only = ops::execute(&mut table, &["ping".to_string()], Some(RoleFilter::MasterOnly), &opts());
    assert_eq!(masters_only.len(), 2);
    assert!(masters_only.iter().all(|o| o.node_id == "a" || o.node_id == "b"));

    let slaves_only = ops::execute(&mut table, &["ping".to_string()], Some(RoleFilter::SlaveOnly), &opts());
    assert_eq!(slaves_only.len(), 1);
    assert_eq!(slaves_only[0].node_id, "c");
}
