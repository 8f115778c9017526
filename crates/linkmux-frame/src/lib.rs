//! Packet data model and wire codec for the linkmux multiplexer.
//!
//! Every packet on the link starts with a fixed 40-byte header:
//! - A 4-byte signature ("HTC2") identifying the protocol generation
//! - The negotiated protocol version and the packet type
//! - The addressed channel (module id + channel number)
//! - Body size, a flow-control `share` value and a per-channel sequence id
//!
//! The multiplexer itself lives in `linkmux-mux`; this crate only knows how
//! packets look and how to move them across a byte stream.

pub mod codec;
pub mod error;
pub mod header;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_header, decode_packet, encode_header, encode_packet, FrameConfig, Packet, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use header::{
    ChannelId, PacketHeader, PacketType, MAX_BODY_SIZE, PROTOCOL_VERSION, SIGNATURE,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;
