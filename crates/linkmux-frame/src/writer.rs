use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_packet, FrameConfig, Packet, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Writes complete packets to any `Write` stream.
///
/// Each packet is encoded into a reusable scratch buffer and pushed out in
/// full before the stream is flushed. A link never sees half a header
/// followed by another packet.
pub struct PacketWriter<T> {
    inner: T,
    scratch: BytesMut,
    config: FrameConfig,
    packets_written: u64,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::with_capacity(HEADER_SIZE + config.max_body_size.min(64 * 1024)),
            config,
            packets_written: 0,
        }
    }

    /// Encode and write one packet, then flush (blocking).
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let size = packet.body.len();
        if size > self.config.max_body_size {
            return Err(FrameError::BodyTooLarge {
                size,
                max: self.config.max_body_size,
            });
        }

        self.scratch.clear();
        encode_packet(packet, &mut self.scratch)?;
        push_all(&mut self.inner, &self.scratch)?;
        flush_retrying(&mut self.inner)?;
        self.packets_written += 1;

        tracing::trace!(
            channel = %packet.header.channel,
            packet_type = %packet.header.packet_type,
            sequence_id = packet.header.sequence_id,
            share = packet.header.share,
            body_size = size,
            "packet written"
        );
        Ok(())
    }

    /// Number of packets fully written and flushed so far.
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(unix)]
impl PacketWriter<std::os::unix::net::UnixStream> {
    /// Wrap a Unix stream, applying the configured write timeout to the socket.
    pub fn with_config_unix(
        inner: std::os::unix::net::UnixStream,
        config: FrameConfig,
    ) -> Result<Self> {
        inner.set_write_timeout(config.write_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

fn retryable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

fn push_all<W: Write>(sink: &mut W, mut wire: &[u8]) -> Result<()> {
    while !wire.is_empty() {
        match sink.write(wire) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => wire = &wire[n..],
            Err(err) if retryable(err.kind()) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn flush_retrying<W: Write>(sink: &mut W) -> Result<()> {
    loop {
        match sink.flush() {
            Ok(()) => return Ok(()),
            Err(err) if retryable(err.kind()) => {}
            Err(err) => return Err(err.into()),
        }
    }
}
