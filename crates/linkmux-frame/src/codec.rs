use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::header::{ChannelId, PacketHeader, PacketType, MAX_BODY_SIZE, SIGNATURE};

/// Header size on the wire.
pub const HEADER_SIZE: usize = 40;

/// A header together with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Bytes,
}

impl Packet {
    /// Create a packet. `header.body_size` is set from the body length.
    ///
    /// A body longer than `u32::MAX` bytes cannot be described on the wire.
    /// Its size field saturates and `encode_packet` rejects it.
    pub fn new(mut header: PacketHeader, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        header.body_size = body_size_field(body.len());
        Self { header, body }
    }

    /// Create a packet with an empty body.
    pub fn header_only(header: PacketHeader) -> Self {
        Self::new(header, Bytes::new())
    }

    /// The total wire size of this packet (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Encode a header into the wire format.
///
/// Wire format (all fields little-endian):
/// ```text
/// ┌───────────┬─────────┬──────────┬────────┬──────────┬────────────┐
/// │ Signature │ Version │ Type     │ Module │ Reserved │ Channel    │
/// │ (4B)      │ (2B)    │ (2B)     │ (2B)   │ (2B)     │ (4B)       │
/// ├───────────┼─────────┴──────────┼────────┴──────────┼────────────┤
/// │ Body size │ Reserved (4B)      │ Share (8B)        │ Seq (8B)   │
/// │ (4B)      │                    │                   │            │
/// └───────────┴────────────────────┴───────────────────┴────────────┘
/// ```
pub fn encode_header(header: &PacketHeader, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    dst.put_u32_le(header.signature);
    dst.put_u16_le(header.version);
    dst.put_u16_le(header.packet_type.as_u16());
    dst.put_u16_le(header.channel.module_id);
    dst.put_u16_le(0);
    dst.put_u32_le(header.channel.channel_id);
    dst.put_u32_le(header.body_size);
    dst.put_u32_le(0);
    dst.put_u64_le(header.share);
    dst.put_u64_le(header.sequence_id);
}

/// Decode a header from the first [`HEADER_SIZE`] bytes of `src`.
///
/// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
pub fn decode_header(src: &[u8]) -> Result<Option<PacketHeader>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut cur = &src[..HEADER_SIZE];
    let signature = cur.get_u32_le();
    if signature != SIGNATURE {
        return Err(FrameError::InvalidSignature { found: signature });
    }

    let version = cur.get_u16_le();
    let packet_type = PacketType::from_u16(cur.get_u16_le())?;
    let module_id = cur.get_u16_le();
    cur.advance(2);
    let channel_id = cur.get_u32_le();
    let body_size = cur.get_u32_le();
    cur.advance(4);
    let share = cur.get_u64_le();
    let sequence_id = cur.get_u64_le();

    Ok(Some(PacketHeader {
        signature,
        version,
        packet_type,
        channel: ChannelId::new(module_id, channel_id),
        body_size,
        share,
        sequence_id,
    }))
}

/// Encode a complete packet.
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let size = packet.body.len();
    let mut header = packet.header;
    header.body_size = u32::try_from(size).map_err(|_| FrameError::BodyTooLarge {
        size,
        max: u32::MAX as usize,
    })?;

    dst.reserve(packet.wire_size());
    encode_header(&header, dst);
    dst.put_slice(&packet.body);
    Ok(())
}

fn body_size_field(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_body_size: usize) -> Result<Option<Packet>> {
    let header = match decode_header(&src[..])? {
        Some(header) => header,
        None => return Ok(None), // Need more data
    };

    let body_len = header.body_len();
    if body_len > max_body_size {
        return Err(FrameError::BodyTooLarge {
            size: body_len,
            max: max_body_size,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Packet { header, body }))
}

/// Configuration for packet readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: [`MAX_BODY_SIZE`].
    pub max_body_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
