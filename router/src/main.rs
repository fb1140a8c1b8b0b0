//
// main.rs - Router Startup
//
// Startup runs entirely on the master context (context 0): parse the
// command line, ingest and build the forwarding table, bring up the
// AF_XDP ports, distribute the queues to the workers, launch them and
// wait. Every failure up to the launch prints one diagnostic and exits
// non-zero; after the launch the process runs until it is terminated.
//

use anyhow::{Context as _, bail};
use clap::Parser as _;
use router::SetupError;
use router::cli::{Args, PortRef};
use router::io::{PortMap, XskRxQueue, XskTxQueue};
use router::worker::Worker;
use router::{Fib, IfaceConfig, IfaceTable, MacAddr, RouteList};
use std::collections::VecDeque;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.ifaces.is_empty() {
        bail!("no interfaces bound; use -p <port>,<ip> (see --help)");
    }
    ensure_capabilities()?;

    // Resolve the bound ports first so routes can be checked against them.
    let ports: Vec<u8> = args
        .ifaces
        .iter()
        .map(|spec| resolve_port(&spec.port))
        .collect::<Result<_, _>>()?;
    let mut deduped = ports.clone();
    deduped.sort_unstable();
    deduped.dedup();
    if deduped.len() != ports.len() {
        return Err(SetupError::Config("a port is bound more than once".into()).into());
    }

    let mut routes = RouteList::new();
    for spec in &args.routes {
        if !ports.contains(&spec.port) {
            return Err(SetupError::Config(format!(
                "route {}/{} points at port {}, which is not bound",
                spec.net.addr(),
                spec.net.prefix_len(),
                spec.port
            ))
            .into());
        }
        routes.add(spec.net.addr(), spec.net.prefix_len(), spec.mac, spec.port);
    }
    if routes.is_empty() {
        log::warn!("no routes configured; only ARP will be answered");
    }
    let fib = Arc::new(Fib::build(routes).context("building the forwarding table")?);

    // Bring up the devices: every port gets one RX and one TX queue per
    // bound interface.
    let num_ifaces = args.ifaces.len();
    let mut configs = Vec::with_capacity(num_ifaces);
    let mut rx_per_port = Vec::with_capacity(num_ifaces);
    let mut tx_per_port: Vec<VecDeque<_>> = Vec::with_capacity(num_ifaces);
    for (slot, (spec, port)) in args.ifaces.iter().zip(&ports).enumerate() {
        let opened = xsk_io::open_port(*port as u32, num_ifaces, xsk_io::XskOpts::default())
            .with_context(|| format!("configuring port {port}"))?;
        configs.push(IfaceConfig {
            port: *port,
            ip: spec.ip,
            mac: MacAddr(opened.mac),
            context_id: (slot + 1) as u16,
            num_rx_queues: num_ifaces as u16,
        });
        let (txs, rxs): (Vec<_>, Vec<_>) = opened.queues.into_iter().unzip();
        tx_per_port.push(txs.into());
        rx_per_port.push(rxs);
    }
    let ifaces = Arc::new(IfaceTable::new(configs));
    for cfg in ifaces.iter() {
        log::info!(
            "port {}: {} ({}), context {}, tx queue {}",
            cfg.port,
            cfg.ip,
            cfg.mac,
            cfg.context_id,
            cfg.tx_queue()
        );
    }

    // Worker i owns all RX queues of its own port and, on every port,
    // the TX queue matching its context (context_id - 1). The per-port
    // TX queues are handed out front-to-back, which is exactly that
    // queue index.
    let mut handles = Vec::with_capacity(num_ifaces);
    for (slot, rx) in rx_per_port.into_iter().enumerate() {
        let mut txs = PortMap::new();
        for (port_slot, port) in ports.iter().enumerate() {
            let Some(queue) = tx_per_port[port_slot].pop_front() else {
                bail!("internal error: TX queue distribution ran short");
            };
            let mac = ifaces
                .by_port(*port)
                .map(|cfg| cfg.mac)
                .unwrap_or(MacAddr::ZERO);
            txs.insert(*port, XskTxQueue { queue, mac });
        }
        let cfg = ifaces
            .by_port(ports[slot])
            .cloned()
            .context("interface table out of sync")?;
        let worker = Worker {
            cfg,
            ifaces: Arc::clone(&ifaces),
            fib: Arc::clone(&fib),
            rx: rx.into_iter().map(XskRxQueue).collect(),
            txs,
        };
        handles.push(router::worker::spawn(worker).map_err(SetupError::Launch)?);
    }

    log::info!("router up, {num_ifaces} worker(s) running");
    for handle in handles {
        if handle.join().is_err() {
            bail!("a worker panicked");
        }
    }
    Ok(())
}

/// Maps a `-p` port reference to the device's interface index.
fn resolve_port(port: &PortRef) -> anyhow::Result<u8> {
    match port {
        PortRef::Index(idx) => Ok(*idx),
        PortRef::Name(name) => {
            let idx = xsk_io::ifindex_by_name(name)
                .with_context(|| format!("resolving interface {name:?}"))?;
            u8::try_from(idx).with_context(|| {
                format!("interface {name:?} has index {idx}, beyond the 8-bit port space")
            })
        }
    }
}

/// The AF_XDP sockets need raw-network privileges; fail early and
/// clearly instead of at the first bind.
fn ensure_capabilities() -> anyhow::Result<()> {
    let effective = caps::read(None, caps::CapSet::Effective)
        .map_err(|e| anyhow::anyhow!("cannot read process capabilities: {e}"))?;
    for cap in [
        caps::Capability::CAP_NET_ADMIN,
        caps::Capability::CAP_NET_RAW,
    ] {
        if !effective.contains(&cap) {
            bail!("missing {cap}; run as root or grant it with setcap");
        }
    }
    Ok(())
}
