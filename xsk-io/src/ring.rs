//! # AF_XDP Ring Mappings
//!
//! ## Purpose
//!
//! The four AF_XDP rings (RX, TX, Fill, Completion) are the shared-memory
//! channel between this process and the kernel. This module sizes them,
//! maps them, and gives the socket layer safe accessors for descriptors
//! and the atomic producer/consumer indices.
//!
//! ## How it works
//!
//! Each ring is configured with a `setsockopt` on the XDP socket and then
//! `mmap`ed at a ring-specific page offset. The mapped region starts with
//! the producer/consumer indices and flags word, followed by the
//! descriptor array: `FrameDesc` entries for the RX/TX rings, bare UMEM
//! offsets (`u64`) for the Fill/Completion rings. Index loads use Acquire
//! ordering and index stores use Release ordering, matching the kernel's
//! side of the protocol.
//!
//! ## Main components
//!
//! - `RingMap<T>`: an owned mapping of one ring.
//! - `FrameDesc`: the kernel's `struct xdp_desc` descriptor layout.
//! - `RingKind`: per-ring sizing, socket option and mmap offset selection.

use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

/// Size of a single UMEM frame in bytes.
pub const FRAME_SIZE: usize = 2048;
/// Number of UMEM frames per socket, split evenly between RX and TX.
pub const FRAME_COUNT: usize = 4096;

/// Packet descriptor used in the RX and TX rings, layout-compatible with
/// the kernel's `struct xdp_desc`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDesc {
    /// Offset of the packet data within the UMEM.
    pub addr: u64,
    /// Length of the packet data in bytes.
    pub len: u32,
    pub options: u32,
}

/// An owned memory mapping of a single AF_XDP ring.
pub struct RingMap<T> {
    map: *mut libc::c_void,
    map_len: usize,
    producer: *mut AtomicU32,
    consumer: *mut AtomicU32,
    flags: *mut AtomicU32,
    desc: *mut T,
    /// Number of descriptor slots; always a power of two.
    pub len: u32,
    /// `len - 1`, for wrapping cursor arithmetic.
    pub mask: u32,
}

unsafe impl<T: Send> Send for RingMap<T> {}

impl<T: Copy> RingMap<T> {
    /// Atomically reads the kernel-visible producer index.
    #[inline]
    pub fn producer(&self) -> u32 {
        unsafe { (*self.producer).load(Ordering::Acquire) }
    }

    /// Atomically reads the kernel-visible consumer index.
    #[inline]
    pub fn consumer(&self) -> u32 {
        unsafe { (*self.consumer).load(Ordering::Acquire) }
    }

    #[inline]
    pub fn publish_producer(&mut self, value: u32) {
        unsafe { (*self.producer).store(value, Ordering::Release) }
    }

    #[inline]
    pub fn publish_consumer(&mut self, value: u32) {
        unsafe { (*self.consumer).store(value, Ordering::Release) }
    }

    /// True when the kernel asked to be woken up for this ring.
    #[inline]
    pub fn needs_wakeup(&self) -> bool {
        let flags = unsafe { (*self.flags).load(Ordering::Relaxed) };
        flags & libc::XDP_RING_NEED_WAKEUP != 0
    }

    /// Reads the descriptor at `cursor & mask`.
    #[inline]
    pub fn desc_at(&self, cursor: u32) -> T {
        debug_assert!(((cursor & self.mask) as usize) < self.len as usize);
        unsafe { *self.desc.add((cursor & self.mask) as usize) }
    }

    /// Writes the descriptor at `cursor & mask`.
    #[inline]
    pub fn write_desc(&mut self, cursor: u32, desc: T) {
        debug_assert!(((cursor & self.mask) as usize) < self.len as usize);
        unsafe { *self.desc.add((cursor & self.mask) as usize) = desc }
    }
}

impl<T> Drop for RingMap<T> {
    fn drop(&mut self) {
        if !self.map.is_null() && self.map != libc::MAP_FAILED {
            let res = unsafe { libc::munmap(self.map, self.map_len) };
            if res < 0 {
                log::error!("failed to unmap ring: {}", io::Error::last_os_error());
            }
        }
    }
}

/// The four AF_XDP ring types.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RingKind {
    Rx,
    Tx,
    Fill,
    Completion,
}

impl RingKind {
    fn sockopt(self) -> libc::c_int {
        match self {
            RingKind::Rx => libc::XDP_RX_RING,
            RingKind::Tx => libc::XDP_TX_RING,
            RingKind::Fill => libc::XDP_UMEM_FILL_RING,
            RingKind::Completion => libc::XDP_UMEM_COMPLETION_RING,
        }
    }

    fn pgoff(self) -> i64 {
        match self {
            RingKind::Rx => libc::XDP_PGOFF_RX_RING as i64,
            RingKind::Tx => libc::XDP_PGOFF_TX_RING as i64,
            RingKind::Fill => libc::XDP_UMEM_PGOFF_FILL_RING as i64,
            RingKind::Completion => libc::XDP_UMEM_PGOFF_COMPLETION_RING as i64,
        }
    }

    fn offsets(self, all: &libc::xdp_mmap_offsets) -> &libc::xdp_ring_offset {
        match self {
            RingKind::Rx => &all.rx,
            RingKind::Tx => &all.tx,
            RingKind::Fill => &all.fr,
            RingKind::Completion => &all.cr,
        }
    }

    /// Tells the kernel how many descriptor slots this ring gets.
    pub fn set_size(self, fd: libc::c_int, len: u32) -> io::Result<()> {
        debug_assert!(len.is_power_of_two());
        let res = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_XDP,
                self.sockopt(),
                &len as *const _ as *const libc::c_void,
                size_of::<u32>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Maps a ring of `len` descriptors that was previously sized with
    /// [`RingKind::set_size`].
    pub fn map<T: Copy>(
        self,
        fd: libc::c_int,
        all: &libc::xdp_mmap_offsets,
        len: u32,
    ) -> io::Result<RingMap<T>> {
        let offs = self.offsets(all);
        let map_len = offs.desc as usize + len as usize * size_of::<T>();
        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                self.pgoff(),
            )
        };
        if map == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(RingMap {
            map,
            map_len,
            producer: unsafe { map.add(offs.producer as usize) as *mut AtomicU32 },
            consumer: unsafe { map.add(offs.consumer as usize) as *mut AtomicU32 },
            flags: unsafe { map.add(offs.flags as usize) as *mut AtomicU32 },
            desc: unsafe { map.add(offs.desc as usize) as *mut T },
            len,
            mask: len - 1,
        })
    }
}

/// Queries the kernel for the mmap offsets of all four rings.
pub fn ring_offsets(fd: libc::c_int) -> io::Result<libc::xdp_mmap_offsets> {
    let mut offsets: libc::xdp_mmap_offsets = unsafe { std::mem::zeroed() };
    let mut optlen = size_of::<libc::xdp_mmap_offsets>() as libc::socklen_t;
    let res = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_XDP,
            libc::XDP_MMAP_OFFSETS,
            &mut offsets as *mut _ as *mut libc::c_void,
            &mut optlen,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(offsets)
}
