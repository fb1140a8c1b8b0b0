//! # Packet I/O Contract
//!
//! ## Purpose
//!
//! The seam between the router core and the packet I/O substrate. The
//! protocol stacks and workers are written against these traits; the
//! production implementation sits on top of `xsk-io`, the test suites
//! substitute scripted queues.
//!
//! ## How it works
//!
//! A [`Frame`] is an owned packet buffer: receiving hands the worker
//! ownership, transmitting consumes the frame, and dropping it returns
//! the buffer to its pool. [`RxQueue::rx_burst`] is the non-blocking
//! burst receive; [`TxQueue::transmit`] is the non-blocking single-frame
//! enqueue that hands the frame back when the device ring is full, so the
//! caller can retry. [`PortMap`] is the flat per-port table of TX handles
//! a worker owns (one queue per port, at the worker's queue index).

use crate::net::MacAddr;

/// An owned packet buffer. Dropping it frees the buffer.
pub trait Frame: Send {
    /// The frame bytes, starting at the Ethernet header.
    fn bytes(&self) -> &[u8];
    /// Mutable access for in-place header rewriting.
    fn bytes_mut(&mut self) -> &mut [u8];

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// One receive queue, exclusively owned by its worker.
pub trait RxQueue {
    type Frame: Frame;

    /// Receives up to `max` frames into `out`, returning how many
    /// arrived. Never blocks.
    fn rx_burst(&mut self, out: &mut Vec<Self::Frame>, max: usize) -> usize;
}

/// One transmit queue of one egress port, exclusively owned by its
/// worker.
pub trait TxQueue {
    type Frame: Frame;

    /// The MAC address of the egress device.
    fn mac(&self) -> MacAddr;

    /// Enqueues a frame for transmission, consuming it. When the device
    /// ring is full the frame comes back in `Err` and the caller retries.
    fn transmit(&mut self, frame: Self::Frame) -> Result<(), Self::Frame>;
}

/// TX handles of one worker, indexed by egress port.
pub struct PortMap<T> {
    slots: Vec<Option<T>>,
}

impl<T> PortMap<T> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(u8::MAX as usize + 1);
        slots.resize_with(u8::MAX as usize + 1, || None);
        PortMap { slots }
    }

    pub fn insert(&mut self, port: u8, queue: T) {
        self.slots[port as usize] = Some(queue);
    }

    #[inline]
    pub fn get_mut(&mut self, port: u8) -> Option<&mut T> {
        self.slots[port as usize].as_mut()
    }
}

impl<T> Default for PortMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Production frame type: the UMEM-backed buffer of `xsk-io`.
impl Frame for xsk_io::FrameBuf {
    #[inline]
    fn bytes(&self) -> &[u8] {
        xsk_io::FrameBuf::bytes(self)
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        xsk_io::FrameBuf::bytes_mut(self)
    }
}

/// Production receive queue: one AF_XDP RX half.
pub struct XskRxQueue(pub xsk_io::XskRx);

impl RxQueue for XskRxQueue {
    type Frame = xsk_io::FrameBuf;

    #[inline]
    fn rx_burst(&mut self, out: &mut Vec<Self::Frame>, max: usize) -> usize {
        self.0.rx_burst(out, max)
    }
}

/// Production transmit queue: one AF_XDP TX half plus the egress MAC.
pub struct XskTxQueue {
    pub queue: xsk_io::XskTx,
    pub mac: MacAddr,
}

impl TxQueue for XskTxQueue {
    type Frame = xsk_io::FrameBuf;

    #[inline]
    fn mac(&self) -> MacAddr {
        self.mac
    }

    #[inline]
    fn transmit(&mut self, frame: Self::Frame) -> Result<(), Self::Frame> {
        // The transmit copies the packet into the egress UMEM; the
        // ingress frame goes back to its own pool either way.
        if self.queue.transmit(frame.bytes()) {
            Ok(())
        } else {
            Err(frame)
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted queues for the unit tests of the protocol stacks.

    use super::{Frame, RxQueue, TxQueue};
    use crate::net::MacAddr;
    use std::collections::VecDeque;

    pub(crate) struct TestFrame(pub Vec<u8>);

    impl Frame for TestFrame {
        fn bytes(&self) -> &[u8] {
            &self.0
        }

        fn bytes_mut(&mut self) -> &mut [u8] {
            &mut self.0
        }
    }

    /// Captures transmitted frames; optionally rejects the first few
    /// attempts to exercise the busy-retry path.
    pub(crate) struct CaptureTx {
        pub mac: MacAddr,
        pub sent: Vec<Vec<u8>>,
        pub reject_next: usize,
    }

    impl CaptureTx {
        pub fn new(mac: MacAddr) -> Self {
            CaptureTx {
                mac,
                sent: Vec::new(),
                reject_next: 0,
            }
        }
    }

    impl TxQueue for CaptureTx {
        type Frame = TestFrame;

        fn mac(&self) -> MacAddr {
            self.mac
        }

        fn transmit(&mut self, frame: TestFrame) -> Result<(), TestFrame> {
            if self.reject_next > 0 {
                self.reject_next -= 1;
                return Err(frame);
            }
            self.sent.push(frame.0);
            Ok(())
        }
    }

    pub(crate) struct ScriptedRx(pub VecDeque<TestFrame>);

    impl RxQueue for ScriptedRx {
        type Frame = TestFrame;

        fn rx_burst(&mut self, out: &mut Vec<TestFrame>, max: usize) -> usize {
            let mut taken = 0;
            while taken < max {
                let Some(frame) = self.0.pop_front() else { break };
                out.push(frame);
                taken += 1;
            }
            taken
        }
    }
}
