//! # Owned Frame Buffers
//!
//! ## Purpose
//!
//! A received packet lives inside the UMEM of the socket that delivered
//! it. `FrameBuf` is the owned handle to one such packet: whoever holds it
//! may read and rewrite the packet in place, and dropping it returns the
//! UMEM frame to the socket's free stack so the next receive refill can
//! hand it back to the kernel.
//!
//! ## How it works
//!
//! The handle stores a raw pointer into the UMEM plus the frame index it
//! was carved from, and keeps the socket's shared state alive through an
//! `Arc`, so the mapping cannot disappear underneath it. Passing a
//! `FrameBuf` by value is the transfer of buffer ownership; there is no
//! way to free a frame twice or to leak one on an error path.

use crate::ring::{FRAME_SIZE, FrameDesc};
use crate::socket::Inner;
use std::sync::Arc;

/// An owned packet buffer inside a socket's UMEM.
///
/// Dropping the buffer returns the frame to its socket's pool.
pub struct FrameBuf {
    data: *mut u8,
    len: usize,
    cap: usize,
    frame: u32,
    inner: Arc<Inner>,
}

// The UMEM region outlives the buffer via the Arc, and a frame is
// referenced by at most one FrameBuf at a time.
unsafe impl Send for FrameBuf {}

impl FrameBuf {
    /// Wraps the packet described by an RX descriptor.
    ///
    /// The caller must guarantee that `desc` came out of the RX ring of
    /// the socket owning `inner` and that the described frame is not
    /// referenced by any other `FrameBuf`.
    pub(crate) unsafe fn from_desc(inner: &Arc<Inner>, desc: FrameDesc) -> FrameBuf {
        let offset = desc.addr as usize;
        FrameBuf {
            data: unsafe { inner.umem.as_u8_ptr().add(offset) },
            len: desc.len as usize,
            cap: FRAME_SIZE - offset % FRAME_SIZE,
            frame: (desc.addr / FRAME_SIZE as u64) as u32,
            inner: Arc::clone(inner),
        }
    }

    /// The packet bytes as delivered by the kernel.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    /// Mutable access to the packet bytes, for in-place rewriting.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remaining headroom-adjusted capacity of the underlying frame.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }
}

impl Drop for FrameBuf {
    fn drop(&mut self) {
        self.inner.free_stack().push(self.frame);
    }
}
