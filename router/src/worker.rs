//
// worker.rs - Per-Interface Packet Loop
//
// Purpose:
//   Runs the data plane of one bound interface: a run-to-completion loop
//   on a dedicated, CPU-pinned thread that pulls frame bursts off the
//   interface's RX queues and pushes each frame through the Ethernet
//   dispatcher.
//
// How it works:
//   - A worker owns all RX queues of its own port and one TX queue per
//     port (at queue index context_id - 1), so no two threads ever touch
//     the same queue and the loop runs without locks.
//   - Every iteration sweeps the RX queues for up to THREAD_BUFSIZE
//     frames each; an empty sweep sleeps 100 microseconds to amortize
//     idle polling.
//   - The forwarding table and the interface table are read-only shared
//     state, published before the first worker starts.
//

use crate::ethernet;
use crate::fib::Fib;
use crate::iface::{IfaceConfig, IfaceTable};
use crate::io::{PortMap, RxQueue, TxQueue};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Largest burst taken from one RX queue per sweep.
pub const THREAD_BUFSIZE: usize = 64;

/// Idle sleep between empty sweeps.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Everything one worker owns.
pub struct Worker<Rx, Tx>
where
    Rx: RxQueue,
    Tx: TxQueue<Frame = Rx::Frame>,
{
    pub cfg: IfaceConfig,
    pub ifaces: Arc<IfaceTable>,
    pub fib: Arc<Fib>,
    /// All RX queues of this worker's port.
    pub rx: Vec<Rx>,
    /// One TX queue per bound port, at this worker's queue index.
    pub txs: PortMap<Tx>,
}

impl<Rx, Tx> Worker<Rx, Tx>
where
    Rx: RxQueue,
    Tx: TxQueue<Frame = Rx::Frame>,
{
    /// The packet loop. Never returns; the router runs until the process
    /// is terminated.
    pub fn run(mut self) -> ! {
        let Worker {
            cfg,
            ifaces,
            fib,
            rx,
            txs,
        } = &mut self;
        log::info!(
            "worker for port {} up on context {}",
            cfg.port,
            cfg.context_id
        );
        let mut burst = Vec::with_capacity(THREAD_BUFSIZE);
        loop {
            let mut received = 0;
            for queue in rx.iter_mut() {
                received += queue.rx_burst(&mut burst, THREAD_BUFSIZE);
                for frame in burst.drain(..) {
                    if let Err(e) = ethernet::handle_frame(cfg, ifaces, fib, txs, frame) {
                        log::debug!("port {}: dropped frame: {e}", cfg.port);
                    }
                }
            }
            if received == 0 {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

/// Starts a worker on its own thread, pinned to the CPU matching its
/// context id.
pub fn spawn<Rx, Tx>(worker: Worker<Rx, Tx>) -> io::Result<JoinHandle<()>>
where
    Rx: RxQueue + Send + 'static,
    Tx: TxQueue<Frame = Rx::Frame> + Send + 'static,
{
    let context_id = worker.cfg.context_id;
    std::thread::Builder::new()
        .name(format!("worker-{}", worker.cfg.port))
        .spawn(move || {
            if let Err(e) = pin_to_cpu(context_id as usize) {
                log::warn!("context {context_id}: CPU pinning failed: {e}");
            }
            worker.run()
        })
}

/// Pins the calling thread to one CPU.
fn pin_to_cpu(cpu: usize) -> io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu % libc::CPU_SETSIZE as usize, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
