//! Packet header data model.
//!
//! Headers are plain values. Validation against the negotiated protocol
//! version happens in the multiplexer, not here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Protocol generation signature: "HTC2" read as a little-endian u32.
pub const SIGNATURE: u32 = u32::from_le_bytes(*b"HTC2");

/// Protocol version spoken until a different one is negotiated.
pub const PROTOCOL_VERSION: u16 = 5;

/// Largest body a `Data` packet may carry.
pub const MAX_BODY_SIZE: usize = 0xE000;

/// Identifies one logical channel on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    /// Owning module on the target side.
    pub module_id: u16,
    /// Channel number within the module.
    pub channel_id: u32,
}

impl ChannelId {
    pub const fn new(module_id: u16, channel_id: u32) -> Self {
        Self {
            module_id,
            channel_id,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module_id, self.channel_id)
    }
}

/// Packet kinds carried on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PacketType {
    /// Payload-bearing packet.
    Data = 24,
    /// Flow-control window announcement, empty body.
    MaxData = 25,
    /// Channel-not-found notification, empty body.
    Error = 26,
}

impl PacketType {
    /// Wire value of this packet type.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value.
    pub fn from_u16(value: u16) -> Result<Self, FrameError> {
        match value {
            24 => Ok(PacketType::Data),
            25 => Ok(PacketType::MaxData),
            26 => Ok(PacketType::Error),
            other => Err(FrameError::UnknownPacketType(other)),
        }
    }

    /// Short lowercase name, used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Data => "data",
            PacketType::MaxData => "max_data",
            PacketType::Error => "error",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-size header preceding every packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Must equal [`SIGNATURE`].
    pub signature: u32,
    /// Protocol version the sender stamped.
    pub version: u16,
    pub packet_type: PacketType,
    /// Addressed channel.
    pub channel: ChannelId,
    /// Number of body bytes following the header.
    pub body_size: u32,
    /// `MaxData`: absolute receive limit. `Data`: stream offset of the first body byte.
    pub share: u64,
    /// Per-channel `Data` sequence number, starting at 1.
    pub sequence_id: u64,
}

impl PacketHeader {
    /// Header with the protocol signature and zeroed flow-control fields.
    pub fn new(packet_type: PacketType, channel: ChannelId, version: u16, body_size: u32) -> Self {
        Self {
            signature: SIGNATURE,
            version,
            packet_type,
            channel,
            body_size,
            share: 0,
            sequence_id: 0,
        }
    }

    pub fn with_share(mut self, share: u64) -> Self {
        self.share = share;
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: u64) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    /// Body size as a host `usize`.
    pub fn body_len(&self) -> usize {
        self.body_size as usize
    }
}
