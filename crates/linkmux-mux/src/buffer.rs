//! Channel send/receive buffers and the global control-packet buffer.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use linkmux_frame::Packet;

use crate::error::{MuxError, Result};

/// Outbound bytes of one channel, bounded by a fixed size.
///
/// The head of the buffer is the next data to put on the wire. Bytes leave
/// the buffer only once their packet is acknowledged with `consume`.
#[derive(Debug)]
pub struct SendBuffer {
    data: BytesMut,
    size: usize,
    max_packet_size: usize,
}

impl SendBuffer {
    /// Adopt caller-supplied storage. Its capacity becomes the buffer size and
    /// any previous contents are discarded; nothing is copied.
    pub fn from_storage(mut storage: BytesMut, max_packet_size: usize) -> Self {
        storage.clear();
        Self {
            size: storage.capacity(),
            data: storage,
            max_packet_size,
        }
    }

    /// Copy `data` into a new buffer of exactly that size, all of it pending.
    pub fn with_data(data: &[u8], max_packet_size: usize) -> Self {
        Self {
            data: BytesMut::from(data),
            size: data.len(),
            max_packet_size,
        }
    }

    /// Append as much of `src` as fits. Returns the number of bytes taken.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free_space());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// Copy of the first `len` pending bytes.
    pub fn peek(&self, len: usize) -> Bytes {
        Bytes::copy_from_slice(&self.data[..len.min(self.data.len())])
    }

    /// Drop `len` acknowledged bytes from the head.
    pub fn consume(&mut self, len: usize) {
        self.data.advance(len.min(self.data.len()));
    }

    /// Discard everything pending.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn pending(&self) -> usize {
        self.data.len()
    }

    pub fn free_space(&self) -> usize {
        self.size - self.data.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

/// Inbound bytes of one channel, bounded by a fixed capacity.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: BytesMut,
    capacity: usize,
}

impl ReceiveBuffer {
    /// Adopt caller-supplied storage; its capacity bounds the buffered bytes.
    ///
    /// The storage is grown to at least `min_capacity` and starts out holding
    /// `carried`, the unread bytes of a buffer it replaces.
    pub fn from_storage(mut storage: BytesMut, carried: &[u8], min_capacity: usize) -> Self {
        storage.clear();
        let wanted = min_capacity.max(carried.len());
        if storage.capacity() < wanted {
            storage.reserve(wanted);
        }
        storage.extend_from_slice(carried);
        Self {
            capacity: storage.capacity(),
            data: storage,
        }
    }

    /// Bytes received but not yet read.
    pub fn unread(&self) -> &[u8] {
        &self.data
    }

    /// Store all of `src`, or nothing if it does not fit.
    pub fn write(&mut self, src: &[u8]) -> bool {
        if src.len() > self.free_space() {
            return false;
        }
        self.data.extend_from_slice(src);
        true
    }

    /// Move up to `out.len()` buffered bytes into `out`.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.data.len());
        self.data.copy_to_slice(&mut out[..n]);
        n
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// FIFO of channel-less control packets (error notifications).
#[derive(Debug)]
pub struct GlobalSendBuffer {
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl GlobalSendBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add_packet(&mut self, packet: Packet) -> Result<()> {
        if self.packets.len() >= self.capacity {
            return Err(MuxError::GlobalSendBufferFull);
        }
        self.packets.push_back(packet);
        Ok(())
    }

    /// The packet to send next, if any.
    pub fn next_packet(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// Retire the head packet after transmission.
    pub fn remove_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
