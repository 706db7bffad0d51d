//! Operator CLI: parses verbs and `HOST:PORT` arguments, wires them into
//! `slotctl-core`'s composed operations, and turns the result into an exit
//! code. Diagnostics go to the log file; this binary's own stdout is for
//! the operator.
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use logger::Logger;
use slotctl_core::{ClusterCtlError, Options, Wire, ops, topology};

/// A `HOST:PORT` CLI argument, split from the right so IPv6-ish hostnames
/// with colons of their own don't confuse the port.
#[derive(Debug, Clone)]
struct NodeAddr {
    host: String,
    port: u16,
}

impl NodeAddr {
    fn tuple(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected HOST:PORT, got {s:?}"))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port in {s:?}"))?;
        Ok(NodeAddr {
            host: host.to_string(),
            port,
        })
    }
}

#[derive(Parser)]
#[command(name = "slotctl", about = "Administers a sharded cluster's slot topology")]
struct Cli {
    /// Socket timeout for every wire adapter opened this run.
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    /// Suppress file logging.
    #[arg(long, global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "slotctl.log")]
    log_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a new cluster out of nodes that aren't part of one yet.
    Create {
        #[arg(required = true)]
        nodes: Vec<NodeAddr>,
        #[arg(long, default_value_t = 1024)]
        max_slots: usize,
    },
    /// Joins a node into an existing cluster, rebalancing by default.
    AddNode {
        seed: NodeAddr,
        newcomer: NodeAddr,
        #[arg(long)]
        no_rebalance: bool,
    },
    /// Pairs a node as a replica of a master.
    Replicate { master: NodeAddr, slave: NodeAddr },
    /// Removes a node from the cluster, migrating its slots away first.
    DelNode { node: NodeAddr },
    /// Resets a single-node cluster so its process can be stopped.
    Shutdown {
        node: NodeAddr,
        #[arg(long)]
        ignore_failed: bool,
    },
    /// Replays the one-slot protocol for every in-progress migration marker.
    Fix { seed: NodeAddr },
    /// Assigns unowned slots to a fresh node.
    Rescue {
        seed: NodeAddr,
        fresh: NodeAddr,
        #[arg(long, default_value_t = 1024)]
        max_slots: usize,
    },
    /// Moves an explicit set of slots between two masters.
    Migrate {
        src: NodeAddr,
        dst: NodeAddr,
        #[arg(required = true)]
        slots: Vec<String>,
    },
    /// Prints the raw `cluster nodes` gossip dump.
    List { seed: NodeAddr },
    /// Broadcasts an arbitrary command to every node (optionally filtered).
    Execute {
        seed: NodeAddr,
        #[arg(long, conflicts_with = "slave_only")]
        master_only: bool,
        #[arg(long, conflicts_with = "master_only")]
        slave_only: bool,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

fn parse_slot_tokens(tokens: &[String]) -> Result<Vec<u16>, ClusterCtlError> {
    let invalid = |t: &str| ClusterCtlError::validation(format!("invalid slot token {t:?}"));
    let mut out = Vec::new();
    for token in tokens {
        if let Some((a, b)) = token.split_once('-') {
            let a: u16 = a.parse().map_err(|_| invalid(token))?;
            let b: u16 = b.parse().map_err(|_| invalid(token))?;
            out.extend(a..=b);
        } else {
            out.push(token.parse().map_err(|_| invalid(token))?);
        }
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logger = if cli.quiet {
        Logger::null()
    } else {
        Logger::new(&cli.log_file)
    };
    let opts = Options {
        timeout: Duration::from_millis(cli.timeout_ms),
        max_slots: 1024,
    };

    match run(cli.command, &opts, &logger) {
        Ok(Some(message)) => {
            println!("{message}");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            logger.error(&e.to_string(), "cli");
            Err(anyhow::anyhow!(e))
        }
    }
}

fn run(command: Command, opts: &Options, logger: &Logger) -> Result<Option<String>, ClusterCtlError> {
    match command {
        Command::Create { nodes, max_slots } => {
            let opts = Options { max_slots, ..opts.clone() };
            let addrs: Vec<(String, u16)> = nodes.iter().map(NodeAddr::tuple).collect();
            let count = addrs.len();
            ops::create_cluster(&addrs, &opts, logger)?;
            Ok(Some(format!("cluster created with {count} nodes")))
        }
        Command::AddNode { seed, newcomer, no_rebalance } => {
            ops::add_node(seed.tuple(), newcomer.tuple(), !no_rebalance, opts, logger)?;
            Ok(Some(format!("{}:{} joined", newcomer.host, newcomer.port)))
        }
        Command::Replicate { master, slave } => {
            ops::replicate(master.tuple(), slave.tuple(), opts, logger)?;
            Ok(Some(format!("{}:{} now replicates {}:{}", slave.host, slave.port, master.host, master.port)))
        }
        Command::DelNode { node } => {
            ops::remove_node(node.tuple(), opts, logger)?;
            Ok(Some(format!("{}:{} removed", node.host, node.port)))
        }
        Command::Shutdown { node, ignore_failed } => {
            ops::shutdown(node.tuple(), ignore_failed, opts, logger)?;
            Ok(Some(format!("{}:{} reset for shutdown", node.host, node.port)))
        }
        Command::Fix { seed } => {
            ops::fix_migrating(seed.tuple(), opts, logger)?;
            Ok(Some("migration markers repaired".to_string()))
        }
        Command::Rescue { seed, fresh, max_slots } => {
            let opts = Options { max_slots, ..opts.clone() };
            ops::rescue_cluster(seed.tuple(), fresh.tuple(), &opts, logger)?;
            Ok(Some(format!("rescue complete onto {}:{}", fresh.host, fresh.port)))
        }
        Command::Migrate { src, dst, slots } => {
            let slots = parse_slot_tokens(&slots)?;
            let moved = ops::migrate_slots(src.tuple(), dst.tuple(), slots, opts, logger)?;
            Ok(Some(format!("migrated {moved} keys")))
        }
        Command::List { seed } => {
            let mut wire = Wire::connect(&seed.host, seed.port, opts.timeout)?;
            let body = wire.execute(vec!["cluster".into(), "nodes".into()])?.into_text()?;
            wire.close();
            Ok(Some(body))
        }
        Command::Execute { seed, master_only, slave_only, command } => {
            let mut wire = Wire::connect(&seed.host, seed.port, opts.timeout)?;
            let topo = topology::fetch_topology(&mut wire)?;
            wire.close();
            let mut table = topology::index_by_id(topo);

            let filter = if master_only {
                Some(ops::RoleFilter::MasterOnly)
            } else if slave_only {
                Some(ops::RoleFilter::SlaveOnly)
            } else {
                None
            };

            let outcomes = ops::execute(&mut table, &command, filter, opts);
            let lines: Vec<String> = outcomes
                .into_iter()
                .map(|outcome| match outcome.result {
                    Ok(reply) => format!("{}:{} -> {}", outcome.host, outcome.port, reply),
                    Err(e) => format!("{}:{} -> error: {}", outcome.host, outcome.port, e),
                })
                .collect();
            Ok(Some(lines.join("\n")))
        }
    }
}
