use bytes::Bytes;
use linkmux_frame::{ChannelId, Packet, PacketHeader, PacketType, PROTOCOL_VERSION};

/// Builds outbound packets with a correctly stamped header.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFactory;

impl PacketFactory {
    pub fn new() -> Self {
        Self
    }

    /// Channel-not-found notification for `channel`.
    ///
    /// Receivers never check the version of error packets, so the default
    /// protocol version is stamped regardless of negotiation.
    pub fn make_error_packet(&self, channel: ChannelId) -> Packet {
        Packet::header_only(PacketHeader::new(
            PacketType::Error,
            channel,
            PROTOCOL_VERSION,
            0,
        ))
    }

    /// Data packet carrying `body`, which starts at stream `offset`.
    pub fn make_data_packet(
        &self,
        channel: ChannelId,
        version: u16,
        sequence_id: u64,
        offset: u64,
        body: Bytes,
    ) -> Packet {
        let header = PacketHeader::new(PacketType::Data, channel, version, 0)
            .with_share(offset)
            .with_sequence_id(sequence_id);
        Packet::new(header, body)
    }

    /// Window announcement: the peer may send bytes below `limit`.
    pub fn make_max_data_packet(&self, channel: ChannelId, version: u16, limit: u64) -> Packet {
        Packet::header_only(
            PacketHeader::new(PacketType::MaxData, channel, version, 0).with_share(limit),
        )
    }
}
