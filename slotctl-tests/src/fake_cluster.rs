use std::collections::{HashMap, HashSet};
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use slotctl_core::topology::TOTAL_SLOTS;
use slotctl_proto::reply::decode_reply;

type Keys = HashMap<u16, Vec<(String, String)>>;

/// One fake node's mutable state, shared (via the enclosing [`FakeCluster`])
/// across every node's listener thread so that a `cluster setslot ... node`
/// issued against one socket is immediately visible to every other one —
/// the stub's stand-in for gossip convergence. `slots`/`importing`/
/// `exporting` are ground truth, shared by every querying socket; `known`
/// is per-node, so a node that hasn't been `meet`-ed into the cluster yet
/// still reports an isolated, unconverged view of itself.
struct NodeState {
    node_id: String,
    host: String,
    port: u16,
    is_master: bool,
    master_id: Option<String>,
    slots: Vec<u16>,
    importing: HashMap<u16, String>,
    exporting: HashMap<u16, String>,
    keys: Keys,
    known: HashSet<String>,
}

type SharedState = Arc<Mutex<HashMap<String, NodeState>>>;

/// A set of fake cluster nodes sharing one state table. Each spawned node
/// runs its own thread-per-connection TCP listener on `127.0.0.1`.
pub struct FakeCluster {
    state: SharedState,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        FakeCluster {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawns a node that starts out as a master owning `slots` (possibly
    /// none, for a freshly created node awaiting `addslots`/`meet`).
    pub fn spawn_master(&self, node_id: &str, port: u16, slots: Vec<u16>) {
        self.register(node_id, port, true, None, slots);
        self.listen(node_id, port);
    }

    /// Spawns a node that starts out replicating `master_id`.
    pub fn spawn_slave(&self, node_id: &str, port: u16, master_id: &str) {
        self.register(node_id, port, false, Some(master_id.to_string()), Vec::new());
        self.listen(node_id, port);
    }

    fn register(&self, node_id: &str, port: u16, is_master: bool, master_id: Option<String>, slots: Vec<u16>) {
        let mut map = self.state.lock().unwrap();
        let mut known = HashSet::new();
        known.insert(node_id.to_string());
        map.insert(
            node_id.to_string(),
            NodeState {
                node_id: node_id.to_string(),
                host: "127.0.0.1".to_string(),
                port,
                is_master,
                master_id,
                slots,
                importing: HashMap::new(),
                exporting: HashMap::new(),
                keys: HashMap::new(),
                known,
            },
        );
    }

    fn listen(&self, node_id: &str, port: u16) {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .unwrap_or_else(|e| panic!("bind fake node {node_id} on {port}: {e}"));
        let node_id = node_id.to_string();
        let state = Arc::clone(&self.state);
        thread::spawn(move || serve(node_id, listener, state));
    }

    /// Seeds a key directly into a slot on `node_id`, bypassing the wire —
    /// fixture setup for scenarios that need data already resident before
    /// the orchestrator runs.
    pub fn put_key(&self, node_id: &str, slot: u16, key: &str, value: &str) {
        let mut map = self.state.lock().unwrap();
        map.get_mut(node_id)
            .expect("node_id registered")
            .keys
            .entry(slot)
            .or_default()
            .push((key.to_string(), value.to_string()));
    }

    /// Finds a key wherever it currently resides, returning the owning
    /// node's id and the value. Mirrors a client that doesn't track which
    /// master currently owns the slot.
    pub fn find_key(&self, key: &str) -> Option<(String, String)> {
        let map = self.state.lock().unwrap();
        for n in map.values() {
            for bucket in n.keys.values() {
                if let Some((_, v)) = bucket.iter().find(|(k, _)| k == key) {
                    return Some((n.node_id.clone(), v.clone()));
                }
            }
        }
        None
    }

    /// Current owned-slot set of `node_id`, sorted.
    pub fn slots_of(&self, node_id: &str) -> Vec<u16> {
        let map = self.state.lock().unwrap();
        let mut slots = map.get(node_id).expect("node_id registered").slots.clone();
        slots.sort_unstable();
        slots
    }

    /// Forces an `importing`-only marker without running the real one-slot
    /// protocol — reproduces a stuck migration for the recovery scenario.
    pub fn force_importing(&self, node_id: &str, slot: u16, from: &str) {
        let mut map = self.state.lock().unwrap();
        map.get_mut(node_id)
            .expect("node_id registered")
            .importing
            .insert(slot, from.to_string());
    }

    /// True if some node other than `node_id` still carries it in its
    /// gossip membership set. `cluster forget` only shrinks the forgetting
    /// node's own view, so a fully-forgotten node can still be registered
    /// and reachable — it's simply absent from everyone else's topology.
    pub fn is_known(&self, node_id: &str) -> bool {
        let map = self.state.lock().unwrap();
        map.iter().any(|(id, n)| id != node_id && n.known.contains(node_id))
    }

    /// Converges `a` and `b`'s gossip view directly, without issuing a real
    /// `cluster meet` over the wire — fixture setup for tests that seed a
    /// topology directly instead of building it up through `create_cluster`.
    pub fn meet_pair(&self, a: &str, b: &str) {
        let mut map = self.state.lock().unwrap();
        propagate_meet(&mut map, a, b);
    }
}

fn serve(node_id: String, listener: TcpListener, state: SharedState) {
    for conn in listener.incoming() {
        let Ok(stream) = conn else { continue };
        let node_id = node_id.clone();
        let state = Arc::clone(&state);
        thread::spawn(move || handle_connection(&node_id, stream, &state));
    }
}

fn handle_connection(node_id: &str, stream: TcpStream, state: &SharedState) {
    let Ok(clone) = stream.try_clone() else { return };
    let mut reader = BufReader::new(clone);
    let mut writer = stream;
    loop {
        let Ok(request) = decode_reply(&mut reader) else { return };
        let Ok(args) = request.into_string_array() else { return };
        if args.is_empty() {
            continue;
        }
        let response = handle_command(node_id, state, &args);
        if writer.write_all(&response).is_err() {
            return;
        }
    }
}

fn simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

fn error(kind: &str, msg: &str) -> Vec<u8> {
    format!("-{kind} {msg}\r\n").into_bytes()
}

fn bulk(s: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", s.len(), s).into_bytes()
}

fn integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn array_of_bulk(items: &[String]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend(bulk(item));
    }
    out
}

fn handle_command(node_id: &str, state: &SharedState, args: &[String]) -> Vec<u8> {
    match args[0].to_ascii_lowercase().as_str() {
        "ping" => simple("PONG"),
        "info" => bulk("cluster_enabled:1\r\n"),
        "cluster" => handle_cluster_command(node_id, state, &args[1..]),
        "migrate" => handle_migrate(node_id, state, &args[1..]),
        other => error("ERR", &format!("unknown command {other:?}")),
    }
}

fn handle_cluster_command(node_id: &str, state: &SharedState, args: &[String]) -> Vec<u8> {
    let sub = args.first().map(|s| s.to_ascii_lowercase()).unwrap_or_default();
    match sub.as_str() {
        "info" => {
            let map = state.lock().unwrap();
            let Some(me) = map.get(node_id) else {
                return error("ERR", "Unknown node");
            };
            let assigned: usize = me
                .known
                .iter()
                .filter_map(|id| map.get(id))
                .filter(|n| n.is_master)
                .map(|n| n.slots.len())
                .sum();
            let cluster_state = if assigned == TOTAL_SLOTS as usize { "ok" } else { "fail" };
            bulk(&format!(
                "cluster_state:{cluster_state}\r\ncluster_slots_assigned:{assigned}\r\n"
            ))
        }
        "nodes" => {
            let map = state.lock().unwrap();
            let Some(me) = map.get(node_id) else {
                return error("ERR", "Unknown node");
            };
            let mut ids: Vec<&String> = me.known.iter().filter(|id| map.contains_key(*id)).collect();
            ids.sort();
            let lines: Vec<String> = ids
                .into_iter()
                .map(|id| format_gossip_line(&map[id], id == node_id))
                .collect();
            bulk(&lines.join("\n"))
        }
        "meet" => {
            let (Some(host), Some(port)) = (
                args.get(1),
                args.get(2).and_then(|s| s.parse::<u16>().ok()),
            ) else {
                return error("ERR", "meet requires host and port");
            };
            let mut map = state.lock().unwrap();
            let Some(target_id) = map
                .values()
                .find(|n| &n.host == host && n.port == port)
                .map(|n| n.node_id.clone())
            else {
                return error("ERR", "Unknown node");
            };
            propagate_meet(&mut map, node_id, &target_id);
            simple("OK")
        }
        "addslots" => {
            let mut map = state.lock().unwrap();
            let Some(n) = map.get_mut(node_id) else {
                return error("ERR", "Unknown node");
            };
            for tok in &args[1..] {
                if let Ok(slot) = tok.parse::<u16>() {
                    n.slots.push(slot);
                }
            }
            simple("OK")
        }
        "delslots" => {
            let mut map = state.lock().unwrap();
            let Some(n) = map.get_mut(node_id) else {
                return error("ERR", "Unknown node");
            };
            let to_drop: Vec<u16> = args[1..].iter().filter_map(|t| t.parse().ok()).collect();
            n.slots.retain(|s| !to_drop.contains(s));
            simple("OK")
        }
        "forget" => {
            let Some(target) = args.get(1) else {
                return error("ERR", "forget requires a node id");
            };
            let mut map = state.lock().unwrap();
            let Some(n) = map.get_mut(node_id) else {
                return error("ERR", "Unknown node");
            };
            if n.known.remove(target) {
                simple("OK")
            } else {
                error("ERR", "Unknown node")
            }
        }
        "reset" => {
            let mut map = state.lock().unwrap();
            let Some(n) = map.get_mut(node_id) else {
                return error("ERR", "Unknown node");
            };
            if n.keys.values().any(|v| !v.is_empty()) {
                return error("ERR", "Can't reset a node containing keys, please use FLUSHALL first");
            }
            n.slots.clear();
            n.importing.clear();
            n.exporting.clear();
            n.is_master = true;
            n.master_id = None;
            simple("OK")
        }
        "replicate" => {
            let Some(master_id) = args.get(1) else {
                return error("ERR", "replicate requires a master id");
            };
            let mut map = state.lock().unwrap();
            let Some(n) = map.get_mut(node_id) else {
                return error("ERR", "Unknown node");
            };
            n.is_master = false;
            n.master_id = Some(master_id.clone());
            n.slots.clear();
            simple("OK")
        }
        "setslot" => handle_setslot(node_id, state, &args[1..]),
        "getkeysinslot" => {
            let slot: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            let count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            let map = state.lock().unwrap();
            let keys: Vec<String> = map
                .get(node_id)
                .and_then(|n| n.keys.get(&slot))
                .map(|bucket| bucket.iter().take(count).map(|(k, _)| k.clone()).collect())
                .unwrap_or_default();
            array_of_bulk(&keys)
        }
        "countkeysinslot" => {
            let slot: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            let map = state.lock().unwrap();
            let count = map
                .get(node_id)
                .and_then(|n| n.keys.get(&slot))
                .map(|bucket| bucket.len())
                .unwrap_or(0);
            integer(count as i64)
        }
        other => error("ERR", &format!("unknown cluster subcommand {other:?}")),
    }
}

/// `cluster setslot <slot> importing|migrating|node <id>`.
fn handle_setslot(node_id: &str, state: &SharedState, args: &[String]) -> Vec<u8> {
    let Some(slot) = args.first().and_then(|s| s.parse::<u16>().ok()) else {
        return error("ERR", "invalid slot");
    };
    let mode = args.get(1).map(|s| s.to_ascii_lowercase()).unwrap_or_default();
    let Some(peer_id) = args.get(2) else {
        return error("ERR", "setslot requires a node id");
    };

    let mut map = state.lock().unwrap();
    match mode.as_str() {
        "importing" => {
            let owns = map.get(node_id).map(|n| n.slots.contains(&slot)).unwrap_or(false);
            if owns {
                return error("ERR", &format!("I'm already the owner of hash slot {slot}"));
            }
            map.get_mut(node_id).unwrap().importing.insert(slot, peer_id.clone());
            simple("OK")
        }
        "migrating" => {
            let owns = map.get(node_id).map(|n| n.slots.contains(&slot)).unwrap_or(false);
            if !owns {
                return error("ERR", &format!("I'm not the owner of hash slot {slot}"));
            }
            map.get_mut(node_id).unwrap().exporting.insert(slot, peer_id.clone());
            simple("OK")
        }
        "node" => {
            for other in map.values_mut() {
                other.slots.retain(|s| *s != slot);
                other.importing.remove(&slot);
                other.exporting.remove(&slot);
            }
            if let Some(target) = map.get_mut(peer_id) {
                target.slots.push(slot);
            }
            simple("OK")
        }
        other => error("ERR", &format!("unknown setslot mode {other:?}")),
    }
}

/// `migrate <host> <port> <key> <db> <timeout>`.
fn handle_migrate(node_id: &str, state: &SharedState, args: &[String]) -> Vec<u8> {
    let (Some(host), Some(port), Some(key)) = (args.first(), args.get(1), args.get(2)) else {
        return error("ERR", "migrate requires host, port, key");
    };
    let Ok(port) = port.parse::<u16>() else {
        return error("ERR", "invalid port");
    };

    let mut map = state.lock().unwrap();
    let Some(target_id) = map
        .values()
        .find(|n| &n.host == host && n.port == port)
        .map(|n| n.node_id.clone())
    else {
        return error("ERR", "target node unknown");
    };

    let mut moved = None;
    if let Some(source) = map.get_mut(node_id) {
        for (slot, bucket) in source.keys.iter_mut() {
            if let Some(pos) = bucket.iter().position(|(k, _)| k == key) {
                let (k, v) = bucket.remove(pos);
                moved = Some((*slot, k, v));
                break;
            }
        }
    }
    if let Some((slot, k, v)) = moved {
        map.get_mut(&target_id)
            .expect("target resolved above")
            .keys
            .entry(slot)
            .or_default()
            .push((k, v));
    }
    simple("OK")
}

/// Merges `a`'s and `b`'s known-node sets and floods the result to every
/// node already transitively connected to either one, so a chain of
/// pairwise `meet`s converges to the full-mesh view the real gossip
/// protocol eventually reaches.
fn propagate_meet(map: &mut HashMap<String, NodeState>, a: &str, b: &str) {
    let Some(union) = (|| {
        let mut union = map.get(a)?.known.clone();
        union.extend(map.get(b)?.known.iter().cloned());
        union.insert(a.to_string());
        union.insert(b.to_string());
        Some(union)
    })() else {
        return;
    };

    let affected: Vec<String> = map
        .iter()
        .filter(|(id, n)| union.contains(*id) || n.known.iter().any(|k| union.contains(k)))
        .map(|(id, _)| id.clone())
        .collect();

    for id in affected {
        if let Some(n) = map.get_mut(&id) {
            n.known.extend(union.iter().cloned());
        }
    }
}

/// Collapses contiguous runs into `N-M` ranges, the way a real gossip dump
/// does, rather than emitting every slot id as its own token.
fn format_slot_ranges(slots: &[u16]) -> Vec<String> {
    let mut sorted = slots.to_vec();
    sorted.sort_unstable();
    let mut out = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        while i + 1 < sorted.len() && sorted[i + 1] == end + 1 {
            end = sorted[i + 1];
            i += 1;
        }
        out.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
        i += 1;
    }
    out
}

fn format_gossip_line(n: &NodeState, is_self: bool) -> String {
    let mut flags = Vec::new();
    if is_self {
        flags.push("myself");
    }
    flags.push(if n.is_master { "master" } else { "slave" });

    let mut tokens = format_slot_ranges(&n.slots);
    for (slot, from) in &n.importing {
        tokens.push(format!("[{slot}-<-{from}]"));
    }
    for (slot, to) in &n.exporting {
        tokens.push(format!("[{slot}->-{to}]"));
    }

    format!(
        "{} {}:{}@{} {} {} 0 0 1 connected {}",
        n.node_id,
        n.host,
        n.port,
        n.port as u32 + 10_000,
        flags.join(","),
        n.master_id.clone().unwrap_or_else(|| "-".to_string()),
        tokens.join(" "),
    )
}
