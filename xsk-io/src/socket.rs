//! # AF_XDP Socket Queues
//!
//! ## Purpose
//!
//! One AF_XDP socket serves one (device, queue) pair. This module creates
//! the socket, registers its UMEM, maps the four rings, binds it, and
//! splits it into the two halves the router hands to different owners: an
//! `XskRx` for burst receive and an `XskTx` for transmit.
//!
//! ## How it works
//!
//! The UMEM frames are divided evenly: the lower half circulates between
//! the Fill and RX rings, the upper half between the TX and Completion
//! rings. `XskRx::rx_burst` drains the RX ring into owned [`FrameBuf`]s
//! and refills the Fill ring from the frames that have been dropped since
//! the last call. `XskTx::transmit` reaps the Completion ring, copies the
//! outgoing packet into a spare TX frame, publishes the descriptor and
//! wakes the kernel when the ring asks for it. Both halves keep the
//! shared `Inner` (UMEM, socket fd, free stack) alive through an `Arc`,
//! the same split the socket creation hands out.
//!
//! ## Main components
//!
//! - `open_queue()`: socket + UMEM + ring setup and bind.
//! - `XskRx` / `XskTx`: the receive and transmit halves.
//! - `XskOpts`: zero-copy / wakeup / huge-page knobs.

use crate::frame::FrameBuf;
use crate::mmap::UmemMap;
use crate::ring::{FRAME_COUNT, FRAME_SIZE, FrameDesc, RingKind, RingMap, ring_offsets};
use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd};
use std::sync::{Arc, Mutex, MutexGuard};

/// Frames reserved for the receive side (Fill/RX rings).
const RX_FRAMES: u32 = (FRAME_COUNT / 2) as u32;
/// Frames reserved for the transmit side (TX/Completion rings).
const TX_FRAMES: u32 = (FRAME_COUNT / 2) as u32;

/// Socket creation options.
#[derive(Debug, Copy, Clone, Default)]
pub struct XskOpts {
    /// `Some(true)` forces `XDP_ZEROCOPY`, `Some(false)` forces
    /// `XDP_COPY`, `None` lets the kernel pick.
    pub zero_copy: Option<bool>,
    /// Whether to bind with `XDP_USE_NEED_WAKEUP`; defaults to true.
    pub need_wakeup: Option<bool>,
    /// Huge-page preference for the UMEM, see [`UmemMap::alloc`].
    pub huge_page: Option<bool>,
}

/// State shared between the two socket halves and all in-flight frames.
pub(crate) struct Inner {
    pub(crate) umem: UmemMap,
    pub(crate) fd: OwnedFd,
    rx_free: Mutex<Vec<u32>>,
}

impl Inner {
    /// Free stack of RX frame indices awaiting a Fill-ring refill.
    ///
    /// Frames are received, rewritten and dropped on the same worker
    /// thread, so the lock is effectively uncontended.
    pub(crate) fn free_stack(&self) -> MutexGuard<'_, Vec<u32>> {
        match self.rx_free.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Receive half of an AF_XDP socket: RX ring plus Fill ring.
pub struct XskRx {
    inner: Arc<Inner>,
    rx: RingMap<FrameDesc>,
    fill: RingMap<u64>,
    rx_cursor: u32,
    fill_cursor: u32,
}

/// Transmit half of an AF_XDP socket: TX ring plus Completion ring.
pub struct XskTx {
    inner: Arc<Inner>,
    tx: RingMap<FrameDesc>,
    comp: RingMap<u64>,
    tx_cursor: u32,
    comp_cursor: u32,
    spare: Vec<u32>,
}

/// Creates an AF_XDP socket bound to `(ifindex, queue_id)` and splits it
/// into its transmit and receive halves.
///
/// # How it works
///
/// 1. Opens a raw `AF_XDP` socket and registers a freshly mapped UMEM.
/// 2. Sizes all four rings and maps them at the kernel-reported offsets.
/// 3. Binds to the device queue with the flags derived from `opts`.
/// 4. Pre-publishes every RX frame to the Fill ring so the kernel can
///    deliver immediately; every TX frame starts on the spare stack.
pub fn open_queue(ifindex: u32, queue_id: u32, opts: XskOpts) -> io::Result<(XskTx, XskRx)> {
    let (fd, raw_fd) = unsafe {
        let fd = libc::socket(libc::AF_XDP, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        (OwnedFd::from_raw_fd(fd), fd)
    };

    let umem = UmemMap::alloc(FRAME_COUNT * FRAME_SIZE, opts.huge_page)?;
    register_umem(raw_fd, &umem)?;

    RingKind::Fill.set_size(raw_fd, RX_FRAMES)?;
    RingKind::Completion.set_size(raw_fd, TX_FRAMES)?;
    RingKind::Rx.set_size(raw_fd, RX_FRAMES)?;
    RingKind::Tx.set_size(raw_fd, TX_FRAMES)?;

    let offsets = ring_offsets(raw_fd)?;
    let rx = RingKind::Rx.map::<FrameDesc>(raw_fd, &offsets, RX_FRAMES)?;
    let tx = RingKind::Tx.map::<FrameDesc>(raw_fd, &offsets, TX_FRAMES)?;
    let mut fill = RingKind::Fill.map::<u64>(raw_fd, &offsets, RX_FRAMES)?;
    let comp = RingKind::Completion.map::<u64>(raw_fd, &offsets, TX_FRAMES)?;

    let zero_copy = match opts.zero_copy {
        Some(true) => libc::XDP_ZEROCOPY,
        Some(false) => libc::XDP_COPY,
        None => 0,
    };
    let need_wakeup = if opts.need_wakeup.unwrap_or(true) {
        libc::XDP_USE_NEED_WAKEUP
    } else {
        0
    };
    let sxdp = libc::sockaddr_xdp {
        sxdp_family: libc::AF_XDP as libc::sa_family_t,
        sxdp_flags: need_wakeup | zero_copy,
        sxdp_ifindex: ifindex,
        sxdp_queue_id: queue_id,
        sxdp_shared_umem_fd: 0,
    };
    let res = unsafe {
        libc::bind(
            raw_fd,
            &sxdp as *const _ as *const libc::sockaddr,
            size_of::<libc::sockaddr_xdp>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::other(format!(
            "failed to bind to ifindex {ifindex} queue {queue_id}: {}",
            io::Error::last_os_error()
        )));
    }

    // Give the kernel the whole RX half right away.
    for i in 0..RX_FRAMES {
        fill.write_desc(i, i as u64 * FRAME_SIZE as u64);
    }
    fill.publish_producer(RX_FRAMES);

    let inner = Arc::new(Inner {
        umem,
        fd,
        rx_free: Mutex::new(Vec::with_capacity(RX_FRAMES as usize)),
    });

    Ok((
        XskTx {
            inner: Arc::clone(&inner),
            tx,
            comp,
            tx_cursor: 0,
            comp_cursor: 0,
            spare: (RX_FRAMES..RX_FRAMES + TX_FRAMES).collect(),
        },
        XskRx {
            inner,
            rx,
            fill,
            rx_cursor: 0,
            fill_cursor: RX_FRAMES,
        },
    ))
}

fn register_umem(raw_fd: libc::c_int, umem: &UmemMap) -> io::Result<()> {
    let reg = unsafe {
        libc::xdp_umem_reg {
            addr: umem.as_void_ptr() as u64,
            len: umem.len() as u64,
            chunk_size: FRAME_SIZE as u32,
            ..std::mem::zeroed()
        }
    };
    let res = unsafe {
        libc::setsockopt(
            raw_fd,
            libc::SOL_XDP,
            libc::XDP_UMEM_REG,
            &reg as *const _ as *const libc::c_void,
            size_of::<libc::xdp_umem_reg>() as libc::socklen_t,
        )
    };
    if res < 0 {
        return Err(io::Error::other(format!(
            "failed to register UMEM: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

impl XskRx {
    /// Drains up to `max` received frames into `out` and returns how many
    /// were taken. Non-blocking; also refills the Fill ring with every
    /// frame that was dropped since the previous call.
    pub fn rx_burst(&mut self, out: &mut Vec<FrameBuf>, max: usize) -> usize {
        let produced = self.rx.producer();
        let mut taken = 0;
        while self.rx_cursor != produced && taken < max {
            let desc = self.rx.desc_at(self.rx_cursor);
            self.rx_cursor = self.rx_cursor.wrapping_add(1);
            out.push(unsafe { FrameBuf::from_desc(&self.inner, desc) });
            taken += 1;
        }
        if taken > 0 {
            self.rx.publish_consumer(self.rx_cursor);
        }
        self.refill();
        taken
    }

    /// Moves free frames back into the Fill ring.
    fn refill(&mut self) {
        let mut free = self.inner.free_stack();
        if free.is_empty() {
            return;
        }
        let consumed = self.fill.consumer();
        let mut published = 0;
        while self.fill_cursor.wrapping_sub(consumed) < self.fill.len {
            let Some(idx) = free.pop() else { break };
            self.fill
                .write_desc(self.fill_cursor, idx as u64 * FRAME_SIZE as u64);
            self.fill_cursor = self.fill_cursor.wrapping_add(1);
            published += 1;
        }
        drop(free);
        if published > 0 {
            self.fill.publish_producer(self.fill_cursor);
            if self.fill.needs_wakeup() {
                // A zero-length receive is enough to kick the driver's
                // RX processing in need-wakeup mode.
                unsafe {
                    libc::recvfrom(
                        self.inner.fd.as_raw_fd(),
                        std::ptr::null_mut(),
                        0,
                        libc::MSG_DONTWAIT,
                        std::ptr::null_mut(),
                        std::ptr::null_mut(),
                    );
                }
            }
        }
    }
}

impl XskTx {
    /// Enqueues one packet for transmission, copying it into a spare TX
    /// frame. Returns false when the device ring is full; the caller
    /// decides whether to retry or drop.
    pub fn transmit(&mut self, pkt: &[u8]) -> bool {
        debug_assert!(pkt.len() <= FRAME_SIZE, "packets originate in UMEM frames");
        self.reap();
        if self.tx_cursor.wrapping_sub(self.tx.consumer()) >= self.tx.len {
            return false;
        }
        let Some(idx) = self.spare.pop() else {
            return false;
        };
        let addr = idx as u64 * FRAME_SIZE as u64;
        unsafe {
            let dst = self.inner.umem.as_u8_ptr().add(addr as usize);
            std::ptr::copy_nonoverlapping(pkt.as_ptr(), dst, pkt.len());
        }
        self.tx.write_desc(
            self.tx_cursor,
            FrameDesc {
                addr,
                len: pkt.len() as u32,
                options: 0,
            },
        );
        self.tx_cursor = self.tx_cursor.wrapping_add(1);
        self.tx.publish_producer(self.tx_cursor);
        self.kick();
        true
    }

    /// Returns completed TX frames to the spare stack.
    fn reap(&mut self) {
        let produced = self.comp.producer();
        if self.comp_cursor == produced {
            return;
        }
        while self.comp_cursor != produced {
            let addr = self.comp.desc_at(self.comp_cursor);
            self.spare.push((addr / FRAME_SIZE as u64) as u32);
            self.comp_cursor = self.comp_cursor.wrapping_add(1);
        }
        self.comp.publish_consumer(self.comp_cursor);
    }

    /// Wakes the kernel to process the TX ring when it asked for it.
    fn kick(&self) {
        if !self.tx.needs_wakeup() {
            return;
        }
        let ret = unsafe {
            libc::sendto(
                self.inner.fd.as_raw_fd(),
                std::ptr::null(),
                0,
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
                std::ptr::null(),
                0,
            )
        };
        if ret < 0 {
            match io::Error::last_os_error().raw_os_error() {
                None | Some(libc::EBUSY | libc::ENOBUFS | libc::EAGAIN) => {}
                Some(libc::ENETDOWN) => {
                    log::warn!("network interface is down, cannot wake up");
                }
                Some(e) => {
                    log::error!("tx wakeup failed: {}", io::Error::from_raw_os_error(e));
                }
            }
        }
    }
}
