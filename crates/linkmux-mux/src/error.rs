use linkmux_frame::ChannelId;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// A received header is malformed for its packet type.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The addressed channel is not open.
    #[error("channel {0} does not exist")]
    ChannelNotExist(ChannelId),

    /// The channel is already open.
    #[error("channel {0} already exists")]
    ChannelAlreadyExist(ChannelId),

    /// An error notification is already waiting to be sent.
    #[error("global send buffer full")]
    GlobalSendBufferFull,

    /// The channel table is at capacity.
    #[error("too many open channels (max {max})")]
    TooManyChannels { max: usize },

    /// Received data does not fit in the channel's receive buffer.
    #[error("receive buffer full on channel {channel} ({size} bytes, {available} available)")]
    ReceiveBufferFull {
        channel: ChannelId,
        size: usize,
        available: usize,
    },

    /// Data arrived before a receive buffer was installed.
    #[error("channel {0} has no receive buffer")]
    ReceiveBufferNotSet(ChannelId),

    /// Data was submitted before a send buffer was installed.
    #[error("channel {0} has no send buffer")]
    SendBufferNotSet(ChannelId),

    /// A data packet arrived out of order.
    #[error("sequence mismatch on channel {channel}: expected {expected}, got {actual}")]
    SequenceMismatch {
        channel: ChannelId,
        expected: u64,
        actual: u64,
    },

    /// The peer reported the channel as unknown.
    #[error("channel {0} disconnected by peer")]
    ChannelDisconnected(ChannelId),

    /// No task is registered under this id.
    #[error("task {0} does not exist")]
    TaskNotExist(u32),

    /// Packet-level I/O error from the link driver.
    #[error("frame error: {0}")]
    Frame(#[from] linkmux_frame::FrameError),
}

impl MuxError {
    /// True for errors that only affect a single received packet.
    ///
    /// The link driver drops the packet and keeps reading when this holds.
    pub fn is_per_packet(&self) -> bool {
        !matches!(self, MuxError::Frame(_))
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
