//! Parses `cluster nodes` gossip lines into typed [`Node`] records and keeps
//! the wire adapter each one lazily owns.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::ClusterCtlError;
use crate::wire::Wire;

pub type NodeId = String;
pub const TOTAL_SLOTS: u16 = 16384;

/// A slot token as it appears trailing a gossip line: a single slot, an
/// inclusive range, or a migration marker. Only `Single`/`Range` contribute
/// to `assigned_slots`; markers only flip `slots_migrating`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotToken {
    Single(u16),
    Range(u16, u16),
    Importing { slot: u16, from: NodeId },
    Exporting { slot: u16, to: NodeId },
}

/// One node's record in the gossip dump.
#[derive(Debug)]
pub struct Node {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub flags: HashSet<String>,
    pub master_id: Option<NodeId>,
    pub assigned_slots: Vec<u16>,
    pub slots_migrating: bool,
    pub markers: Vec<SlotToken>,
    wire: Option<Wire>,
}

/// Cloning a node never carries its live connection along — a clone is a
/// topology snapshot, not a handle to the same socket.
impl Clone for Node {
    fn clone(&self) -> Self {
        Node {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
            flags: self.flags.clone(),
            master_id: self.master_id.clone(),
            assigned_slots: self.assigned_slots.clone(),
            slots_migrating: self.slots_migrating,
            markers: self.markers.clone(),
            wire: None,
        }
    }
}

impl Node {
    pub fn is_master(&self) -> bool {
        self.flags.contains("master")
    }

    pub fn is_slave(&self) -> bool {
        self.flags.contains("slave")
    }

    pub fn is_self(&self) -> bool {
        self.flags.contains("myself")
    }

    pub fn has_failed(&self) -> bool {
        self.flags.contains("fail") || self.flags.contains("fail?")
    }

    pub fn is_handshake(&self) -> bool {
        self.flags.contains("handshake")
    }

    /// Materializes the wire adapter on first use, reusing it afterwards.
    pub fn wire(&mut self, timeout: Duration) -> Result<&mut Wire, ClusterCtlError> {
        if self.wire.is_none() {
            self.wire = Some(Wire::connect(&self.host, self.port, timeout)?);
        }
        Ok(self.wire.as_mut().expect("connected above"))
    }

    /// Idempotent: releases the adapter if one was opened, otherwise a no-op.
    pub fn close(&mut self) {
        if let Some(mut wire) = self.wire.take() {
            wire.close();
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.close();
    }
}

pub type NodeTable = HashMap<NodeId, Node>;

pub fn index_by_id(nodes: Vec<Node>) -> NodeTable {
    nodes.into_iter().map(|n| (n.node_id.clone(), n)).collect()
}

pub fn masters(nodes: &NodeTable) -> Vec<&Node> {
    let mut out: Vec<&Node> = nodes.values().filter(|n| n.is_master()).collect();
    out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    out
}

/// Issues `cluster nodes` on an already-open wire and parses the reply.
///
/// A node that hasn't yet learned its own externally-visible address reports
/// an empty host on its own (`myself`) line; the only caller in a position
/// to supply a default is the one holding the connection, so the host this
/// dump was fetched over is substituted in for that row.
pub fn fetch_topology(wire: &mut Wire) -> Result<Vec<Node>, ClusterCtlError> {
    let body = wire
        .execute(vec!["cluster".into(), "nodes".into()])?
        .into_text()?;
    let mut nodes = parse_topology(&body);
    for node in nodes.iter_mut() {
        if node.is_self() && node.host.is_empty() {
            node.host = wire.host().to_string();
        }
    }
    Ok(nodes)
}

/// Parses the full `cluster nodes` body into typed records, dropping blank
/// lines and — per the "safer" filter noted in the design — handshaking
/// nodes, which are transient and would otherwise pollute topology
/// enumeration with a node that has no stable identity yet.
pub fn parse_topology(body: &str) -> Vec<Node> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(parse_line)
        .filter(|n| !n.is_handshake())
        .collect()
}

/// Parses one gossip line. Returns `None` for a blank line or a line with
/// the `fail` flag, matching the "invalid and ignored" rule; `handshake`
/// lines parse successfully here and are filtered by the caller instead,
/// since [`parse_line`] alone is also used by the marker-scanning path in
/// `fix-migrating`, which still wants to see failed nodes' markers.
pub fn parse_line(line: &str) -> Option<Node> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut fields = line.split_whitespace();
    let node_id = fields.next()?.to_string();
    let address = fields.next()?;
    let flags_field = fields.next()?;
    let master_field = fields.next()?;
    let _ping_sent = fields.next()?;
    let _pong_recv = fields.next()?;
    let _config_epoch = fields.next()?;
    let _link_state = fields.next()?;

    let (host, port) = parse_address(address)?;
    let flags: HashSet<String> = flags_field.split(',').map(|s| s.to_string()).collect();
    if flags.contains("fail") {
        return None;
    }
    let master_id = if master_field == "-" {
        None
    } else {
        Some(master_field.to_string())
    };

    let mut assigned_slots = Vec::new();
    let mut markers = Vec::new();
    let mut slots_migrating = false;

    for token in fields {
        match parse_slot_token(token) {
            Some(SlotToken::Single(s)) => assigned_slots.push(s),
            Some(SlotToken::Range(a, b)) => assigned_slots.extend(a..=b),
            Some(marker @ (SlotToken::Importing { .. } | SlotToken::Exporting { .. })) => {
                slots_migrating = true;
                markers.push(marker);
            }
            None => {}
        }
    }

    Some(Node {
        node_id,
        host,
        port,
        flags,
        master_id,
        assigned_slots,
        slots_migrating,
        markers,
        wire: None,
    })
}

fn parse_address(address: &str) -> Option<(String, u16)> {
    let hostport = address.split('@').next()?;
    let (host, port) = hostport.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

/// Classifies one trailing slot token. Marker matching is intentionally
/// unanchored — the bracket may be followed immediately by end-of-field in
/// every observed dump, but an unanchored match stays correct if a future
/// dump ever appends more text to the same token.
fn parse_slot_token(token: &str) -> Option<SlotToken> {
    if let Some(body) = token.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        if let Some((slot, node)) = body.split_once("-<-") {
            return Some(SlotToken::Importing {
                slot: slot.parse().ok()?,
                from: node.to_string(),
            });
        }
        if let Some((slot, node)) = body.split_once("->-") {
            return Some(SlotToken::Exporting {
                slot: slot.parse().ok()?,
                to: node.to_string(),
            });
        }
        return None;
    }
    if let Some((a, b)) = token.split_once('-') {
        return Some(SlotToken::Range(a.parse().ok()?, b.parse().ok()?));
    }
    token.parse().ok().map(SlotToken::Single)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_with_slot_range() {
        let line = "abc 127.0.0.1:7100@17100 myself,master - 0 0 1 connected 0-8191";
        let node = parse_line(line).unwrap();
        assert_eq!(node.node_id, "abc");
        assert_eq!(node.host, "127.0.0.1");
        assert_eq!(node.port, 7100);
        assert!(node.is_master());
        assert!(node.is_self());
        assert_eq!(node.assigned_slots, (0..=8191u16).collect::<Vec<_>>());
        assert!(!node.slots_migrating);
    }

    #[test]
    fn parses_slave_with_master_id() {
        let line = "def 127.0.0.1:7101@17101 slave abc 0 0 1 connected";
        let node = parse_line(line).unwrap();
        assert!(node.is_slave());
        assert_eq!(node.master_id.as_deref(), Some("abc"));
        assert!(node.assigned_slots.is_empty());
    }

    #[test]
    fn migration_marker_sets_flag_without_contributing_slots() {
        let line = "abc 127.0.0.1:7100@17100 myself,master - 0 0 1 connected [10-<-def]";
        let node = parse_line(line).unwrap();
        assert!(node.slots_migrating);
        assert!(node.assigned_slots.is_empty());
        assert_eq!(
            node.markers,
            vec![SlotToken::Importing {
                slot: 10,
                from: "def".to_string()
            }]
        );
    }

    #[test]
    fn failed_line_is_dropped() {
        let line = "abc 127.0.0.1:7100@17100 master,fail - 0 0 1 connected 0-100";
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn handshake_excluded_from_topology_enumeration() {
        let body = "abc 127.0.0.1:7100@17100 myself,master - 0 0 1 connected 0-100\n\
                     xyz 127.0.0.1:7200@17200 handshake - 0 0 0 connected";
        let nodes = parse_topology(body);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "abc");
    }

    #[test]
    fn blank_lines_are_ignored() {
        let body = "abc 127.0.0.1:7100@17100 myself,master - 0 0 1 connected 0-100\n\n  \n";
        assert_eq!(parse_topology(body).len(), 1);
    }

    #[test]
    fn empty_host_parses_with_bare_port() {
        let line = "abc :7100@17100 myself,master - 0 0 1 connected 0-100";
        let node = parse_line(line).unwrap();
        assert_eq!(node.host, "");
        assert_eq!(node.port, 7100);
    }

    #[test]
    fn fetch_topology_defaults_empty_self_host_to_the_connected_host() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let body = format!(":{port}@{} myself,master - 0 0 1 connected 0-100", port as u32 + 10_000);
            let reply = format!("${}\r\n{}\r\n", body.len(), body);
            stream.write_all(reply.as_bytes()).unwrap();
        });

        let mut wire = Wire::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let nodes = fetch_topology(&mut wire).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].host, "127.0.0.1");
    }
}
