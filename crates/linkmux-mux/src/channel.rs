//! Per-channel protocol state: buffers, sequencing and flow control.
//!
//! A channel only ever offers one outbound packet at a time. The packet stays
//! at the head until the link layer acknowledges it through `remove_packet`,
//! so repeated queries return the same packet.
//!
//! Flow control is offset based. Each side tracks an absolute stream limit:
//! the sender may transmit bytes whose stream offset is below the limit the
//! receiver last announced in a `MaxData` packet (or the configured initial
//! window before any announcement).
//!
//! Credit granted to the peer is always backed by receive storage. A nonzero
//! initial window comes with a receive buffer of that size, and installing a
//! new buffer never leaves less room than the credit still outstanding. A
//! peer that stays below its limit therefore never overruns the buffer.

use std::sync::Arc;

use bytes::BytesMut;
use linkmux_frame::{ChannelId, Packet, PacketHeader, PacketType};
use serde::{Deserialize, Serialize};

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::config::ChannelConfig;
use crate::error::{MuxError, Result};
use crate::factory::PacketFactory;

/// Connection state of a channel as seen from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Opened,
    /// The peer reported the channel as unknown. No further output is offered.
    Disconnected,
}

#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    factory: Arc<PacketFactory>,
    config: ChannelConfig,
    version: u16,
    state: ChannelState,
    send_buffer: Option<SendBuffer>,
    receive_buffer: Option<ReceiveBuffer>,

    next_send_sequence: u64,
    /// Stream offset of the first unacknowledged byte.
    send_offset: u64,
    /// Peer-announced limit on our stream offset.
    peer_limit: u64,

    next_receive_sequence: u64,
    /// Bytes handed to the application so far.
    consumed: u64,
    /// Highest limit announced (or queued for announcement) to the peer.
    announced_limit: u64,
    pending_max_data: Option<u64>,
}

impl Channel {
    pub fn new(id: ChannelId, factory: Arc<PacketFactory>, config: ChannelConfig) -> Self {
        let receive_buffer = (config.initial_window > 0).then(|| {
            ReceiveBuffer::from_storage(BytesMut::new(), &[], credit(config.initial_window))
        });
        Self {
            id,
            factory,
            config,
            version: linkmux_frame::PROTOCOL_VERSION,
            state: ChannelState::Opened,
            send_buffer: None,
            receive_buffer,
            next_send_sequence: 1,
            send_offset: 0,
            peer_limit: config.initial_window,
            next_receive_sequence: 1,
            consumed: 0,
            announced_limit: config.initial_window,
            pending_max_data: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Handle a packet addressed to this channel.
    pub fn process_receive_packet(&mut self, header: &PacketHeader, body: &[u8]) -> Result<()> {
        match header.packet_type {
            PacketType::Data => self.process_data(header, body),
            PacketType::MaxData => {
                if header.share > self.peer_limit {
                    tracing::trace!(channel = %self.id, limit = header.share, "peer window raised");
                    self.peer_limit = header.share;
                }
                Ok(())
            }
            PacketType::Error => {
                tracing::debug!(channel = %self.id, "peer reports channel unknown, disconnecting");
                self.state = ChannelState::Disconnected;
                self.pending_max_data = None;
                if let Some(buf) = self.send_buffer.as_mut() {
                    buf.clear();
                }
                Ok(())
            }
        }
    }

    fn process_data(&mut self, header: &PacketHeader, body: &[u8]) -> Result<()> {
        if header.sequence_id != self.next_receive_sequence {
            return Err(MuxError::SequenceMismatch {
                channel: self.id,
                expected: self.next_receive_sequence,
                actual: header.sequence_id,
            });
        }

        let buf = self
            .receive_buffer
            .as_mut()
            .ok_or(MuxError::ReceiveBufferNotSet(self.id))?;
        if !buf.write(body) {
            return Err(MuxError::ReceiveBufferFull {
                channel: self.id,
                size: body.len(),
                available: buf.free_space(),
            });
        }

        self.next_receive_sequence += 1;
        Ok(())
    }

    /// The packet this channel wants sent next, without consuming it.
    ///
    /// Window announcements go before data.
    pub fn query_send_packet(&self) -> Option<Packet> {
        if self.state == ChannelState::Disconnected {
            return None;
        }

        if let Some(limit) = self.pending_max_data {
            return Some(
                self.factory
                    .make_max_data_packet(self.id, self.version, limit),
            );
        }

        let buf = self.send_buffer.as_ref()?;
        let size = self.next_data_size(buf);
        if size == 0 {
            return None;
        }

        Some(self.factory.make_data_packet(
            self.id,
            self.version,
            self.next_send_sequence,
            self.send_offset,
            buf.peek(size),
        ))
    }

    fn next_data_size(&self, buf: &SendBuffer) -> usize {
        let window = self.peer_limit.saturating_sub(self.send_offset);
        let per_packet = match buf.max_packet_size() {
            0 => self.config.max_body_size,
            n => n.min(self.config.max_body_size),
        };
        let window = usize::try_from(window).unwrap_or(usize::MAX);
        buf.pending().min(per_packet).min(window)
    }

    /// Retire the packet described by `header` after transmission.
    ///
    /// Headers that do not match the current head packet are stale
    /// acknowledgments and are ignored.
    pub fn remove_packet(&mut self, header: &PacketHeader) {
        match header.packet_type {
            PacketType::Data => {
                let Some(buf) = self.send_buffer.as_mut() else {
                    return;
                };
                let len = header.body_len();
                if header.sequence_id != self.next_send_sequence || buf.pending() < len {
                    tracing::trace!(
                        channel = %self.id,
                        sequence_id = header.sequence_id,
                        "ignoring stale data acknowledgment"
                    );
                    return;
                }
                buf.consume(len);
                self.send_offset += len as u64;
                self.next_send_sequence += 1;
            }
            PacketType::MaxData => {
                if self.pending_max_data == Some(header.share) {
                    self.pending_max_data = None;
                }
            }
            PacketType::Error => {}
        }
    }

    /// Re-evaluate internal state. Queues a window announcement when the
    /// application freed receive space since the last one.
    pub fn update_state(&mut self) {
        if self.state == ChannelState::Disconnected {
            return;
        }
        let Some(buf) = self.receive_buffer.as_ref() else {
            return;
        };

        let limit = self.consumed + buf.capacity() as u64;
        if limit > self.announced_limit {
            self.announced_limit = limit;
            self.pending_max_data = Some(limit);
        }
    }

    /// Install caller-supplied send storage (moved in, not copied).
    pub fn set_send_buffer(&mut self, storage: BytesMut, max_packet_size: usize) {
        self.send_buffer = Some(SendBuffer::from_storage(storage, max_packet_size));
    }

    /// Install a send buffer pre-filled with a copy of `data`.
    pub fn set_send_buffer_with_data(&mut self, data: &[u8], max_packet_size: usize) {
        self.send_buffer = Some(SendBuffer::with_data(data, max_packet_size));
    }

    /// Install caller-supplied receive storage.
    ///
    /// Unread bytes of a replaced buffer move into the new one. Storage
    /// smaller than the credit already granted to the peer is grown to match.
    pub fn set_receive_buffer(&mut self, storage: BytesMut) {
        let outstanding = credit(self.announced_limit.saturating_sub(self.consumed));
        let requested = storage.capacity();
        let buf = match self.receive_buffer.take() {
            Some(old) => ReceiveBuffer::from_storage(storage, old.unread(), outstanding),
            None => ReceiveBuffer::from_storage(storage, &[], outstanding),
        };
        if buf.capacity() > requested {
            tracing::debug!(
                channel = %self.id,
                requested,
                capacity = buf.capacity(),
                "receive buffer grown to cover granted credit"
            );
        }
        self.receive_buffer = Some(buf);
        self.update_state();
    }

    /// Queue application data. Returns how many bytes fit.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.state == ChannelState::Disconnected {
            return Err(MuxError::ChannelDisconnected(self.id));
        }
        let buf = self
            .send_buffer
            .as_mut()
            .ok_or(MuxError::SendBufferNotSet(self.id))?;
        Ok(buf.write(data))
    }

    /// Move received bytes into `out`. Returns how many were copied.
    pub fn receive(&mut self, out: &mut [u8]) -> Result<usize> {
        let buf = self
            .receive_buffer
            .as_mut()
            .ok_or(MuxError::ReceiveBufferNotSet(self.id))?;
        let n = buf.read(out);
        self.consumed += n as u64;
        self.update_state();
        Ok(n)
    }

    /// Bytes queued but not yet acknowledged.
    pub fn pending_send_bytes(&self) -> usize {
        self.send_buffer.as_ref().map_or(0, SendBuffer::pending)
    }

    /// Bytes received but not yet read.
    pub fn received_bytes(&self) -> usize {
        self.receive_buffer.as_ref().map_or(0, ReceiveBuffer::len)
    }
}

fn credit(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}
