use crate::header::SIGNATURE;

/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet header does not start with the protocol signature.
    #[error(
        "invalid packet signature 0x{found:08x} (expected 0x{expected:08x})",
        expected = SIGNATURE
    )]
    InvalidSignature { found: u32 },

    /// The packet type field holds a value this protocol does not define.
    #[error("unknown packet type {0}")]
    UnknownPacketType(u16),

    /// The body exceeds the configured maximum size.
    #[error("packet body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream, possibly mid-packet.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
