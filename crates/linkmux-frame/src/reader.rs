use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_packet, FrameConfig, Packet, HEADER_SIZE};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally. Callers always get complete packets.
/// Bytes that arrive ahead of the current packet stay buffered for the next
/// call, so a timed-out read loses nothing.
pub struct PacketReader<T> {
    inner: T,
    pending: BytesMut,
    config: FrameConfig,
    packets_read: u64,
}

impl<T: Read> PacketReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(HEADER_SIZE + READ_CHUNK_SIZE),
            config,
            packets_read: 0,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// EOF yields `FrameError::ConnectionClosed`, whether or not part of a
    /// packet was already buffered. `WouldBlock` and `TimedOut` from the
    /// stream are returned as `FrameError::Io` and the read can be retried.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = decode_packet(&mut self.pending, self.config.max_body_size)? {
                self.packets_read += 1;
                tracing::trace!(
                    channel = %packet.header.channel,
                    packet_type = %packet.header.packet_type,
                    sequence_id = packet.header.sequence_id,
                    share = packet.header.share,
                    body_size = packet.header.body_size,
                    "packet read"
                );
                return Ok(packet);
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        let start = self.pending.len();
        self.pending.resize(start + READ_CHUNK_SIZE, 0);
        let outcome = loop {
            match self.inner.read(&mut self.pending[start..]) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        let read = match outcome {
            Ok(n) => n,
            Err(err) => {
                self.pending.truncate(start);
                return Err(FrameError::Io(err));
            }
        };
        self.pending.truncate(start + read);
        if read == 0 {
            if start > 0 {
                tracing::debug!(buffered = start, "stream ended inside a packet");
            }
            return Err(FrameError::ConnectionClosed);
        }
        Ok(())
    }

    /// Number of complete packets returned so far.
    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Bytes received but not yet returned as part of a packet.
    pub fn buffered(&self) -> usize {
        self.pending.len()
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
impl PacketReader<std::os::unix::net::UnixStream> {
    /// Wrap a Unix stream, applying the configured read timeout to the socket.
    pub fn with_config_unix(
        inner: std::os::unix::net::UnixStream,
        config: FrameConfig,
    ) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::codec::{encode_header, encode_packet, HEADER_SIZE};
    use crate::header::{ChannelId, PacketHeader, PacketType, PROTOCOL_VERSION};

    fn data(channel: u32, body: &[u8]) -> Packet {
        let header = PacketHeader::new(
            PacketType::Data,
            ChannelId::new(0, channel),
            PROTOCOL_VERSION,
            0,
        );
        Packet::new(header, Bytes::copy_from_slice(body))
    }

    fn wire(packets: &[Packet]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for packet in packets {
            encode_packet(packet, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_packet() {
        let mut reader = PacketReader::new(Cursor::new(wire(&[data(1, b"hello")])));
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.header.channel, ChannelId::new(0, 1));
        assert_eq!(packet.body.as_ref(), b"hello");
    }

    #[test]
    fn read_mixed_packet_types() {
        let channel = ChannelId::new(2, 4);
        let max_data = Packet::header_only(
            PacketHeader::new(PacketType::MaxData, channel, PROTOCOL_VERSION, 0).with_share(4096),
        );
        let error = Packet::header_only(PacketHeader::new(PacketType::Error, channel, 0, 0));

        let mut reader =
            PacketReader::new(Cursor::new(wire(&[data(4, b"one"), max_data.clone(), error])));

        assert_eq!(reader.read_packet().unwrap().body.as_ref(), b"one");
        let p2 = reader.read_packet().unwrap();
        assert_eq!(p2, max_data);
        let p3 = reader.read_packet().unwrap();
        assert_eq!(p3.header.packet_type, PacketType::Error);
        assert!(p3.body.is_empty());
    }

    #[test]
    fn read_packet_with_max_body() {
        let body = vec![0xAB; crate::MAX_BODY_SIZE];
        let mut reader = PacketReader::new(Cursor::new(wire(&[data(9, &body)])));
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.body.as_ref(), body.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[data(4, b"slow")]),
            pos: 0,
        };
        let mut reader = PacketReader::new(byte_reader);

        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.header.channel.channel_id, 4);
        assert_eq!(packet.body.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = PacketReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_packet() {
        let mut partial = BytesMut::new();
        let header = PacketHeader::new(PacketType::Data, ChannelId::new(0, 2), 5, 16);
        encode_header(&header, &mut partial);
        partial.put_slice(b"only-part");

        let mut reader = PacketReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn invalid_signature_in_stream() {
        let mut reader = PacketReader::new(Cursor::new(vec![0u8; HEADER_SIZE]));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::InvalidSignature { found: 0 }));
    }

    #[test]
    fn oversized_packet_in_stream() {
        let mut wire = BytesMut::new();
        let header = PacketHeader::new(PacketType::Data, ChannelId::new(0, 1), 5, 1024);
        encode_header(&header, &mut wire);

        let cfg = FrameConfig {
            max_body_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = PacketReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge { size: 1024, max: 16 }));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        writer.write_packet(&data(1, b"ping")).unwrap();
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.header.channel.channel_id, 1);
        assert_eq!(packet.body.as_ref(), b"ping");
    }

    #[test]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::PacketWriter::new(left);
        let reader = Arc::new(Mutex::new(PacketReader::new(right)));

        let reader_thread = {
            let reader = Arc::clone(&reader);
            std::thread::spawn(move || {
                for expected in 0..64u32 {
                    let packet = reader.lock().unwrap().read_packet().unwrap();
                    assert_eq!(packet.header.channel.channel_id, expected % 5);
                    assert_eq!(packet.body.as_ref(), format!("msg-{expected}").as_bytes());
                }
            })
        };

        for i in 0..64u32 {
            writer
                .write_packet(&data(i % 5, format!("msg-{i}").as_bytes()))
                .unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[test]
    fn read_would_block_propagates_io_error() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: wire(&[data(7, b"ok")]),
            pos: 0,
        };
        let mut packets = PacketReader::new(reader);
        let err = packets.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = WouldBlockThenData {
            state: 2,
            bytes: wire(&[data(8, b"ok")]),
            pos: 0,
        };
        let mut packets = PacketReader::new(reader);
        let packet = packets.read_packet().unwrap();

        assert_eq!(packet.header.channel.channel_id, 8);
        assert_eq!(packet.body.as_ref(), b"ok");
    }

    /// Fails the first read with `WouldBlock` (state 0) or `Interrupted` (state 2).
    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.state {
                0 => {
                    self.state = 1;
                    return Err(std::io::Error::from(ErrorKind::WouldBlock));
                }
                2 => {
                    self.state = 1;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                _ => {}
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn timeout_mid_packet_keeps_partial_bytes() {
        let bytes = wire(&[data(3, b"split across reads")]);
        let reader = SplitWithStall {
            first: bytes[..HEADER_SIZE + 4].to_vec(),
            rest: bytes[HEADER_SIZE + 4..].to_vec(),
            step: 0,
        };
        let mut packets = PacketReader::new(reader);

        let err = packets.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
        assert_eq!(packets.buffered(), HEADER_SIZE + 4);
        assert_eq!(packets.packets_read(), 0);

        let packet = packets.read_packet().unwrap();
        assert_eq!(packet.body.as_ref(), b"split across reads");
        assert_eq!(packets.buffered(), 0);
        assert_eq!(packets.packets_read(), 1);
    }

    /// Delivers `first`, stalls once with `TimedOut`, then delivers `rest`.
    struct SplitWithStall {
        first: Vec<u8>,
        rest: Vec<u8>,
        step: u8,
    }

    impl Read for SplitWithStall {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.step += 1;
            let chunk = match self.step {
                1 => std::mem::take(&mut self.first),
                2 => return Err(std::io::Error::from(ErrorKind::TimedOut)),
                3 => std::mem::take(&mut self.rest),
                _ => return Ok(0),
            };
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn applies_read_timeout_for_unix_stream() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let cfg = FrameConfig {
            read_timeout: Some(std::time::Duration::from_millis(10)),
            ..FrameConfig::default()
        };

        let mut reader = PacketReader::with_config_unix(left, cfg).unwrap();
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        ));
    }
}
