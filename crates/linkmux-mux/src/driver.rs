//! Blocking pump between a [`Mux`] and a packet stream.
//!
//! One thread runs the receive loop and another the send loop; both share the
//! driver through `&self`.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkmux_frame::{FrameError, PacketReader, PacketType, PacketWriter};

use crate::error::{MuxError, Result};
use crate::mux::Mux;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What happened to one received packet.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Accepted by its channel.
    Delivered(PacketType),
    /// Rejected by the mux; the stream is still usable.
    Dropped(MuxError),
}

pub struct LinkDriver {
    mux: Arc<Mux>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl LinkDriver {
    pub fn new(mux: Arc<Mux>) -> Self {
        Self {
            mux,
            stop: Arc::new(AtomicBool::new(false)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How long the send loop sleeps when idle before re-polling link and
    /// channel state.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn mux(&self) -> &Arc<Mux> {
        &self.mux
    }

    /// Ask both loops to return. The send loop is woken immediately; the
    /// receive loop notices on its next read timeout or packet.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.mux.readiness_event().signal();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Read one packet and dispatch it.
    pub fn receive_once<R: Read>(&self, reader: &mut PacketReader<R>) -> Result<ReceiveOutcome> {
        let packet = reader.read_packet()?;
        let header = &packet.header;

        if let Err(err) = self.mux.check_received_header(header) {
            tracing::warn!(channel = %header.channel, error = %err, "dropping malformed packet");
            return Ok(ReceiveOutcome::Dropped(err));
        }

        match self.mux.process_receive_packet(header, &packet.body) {
            Ok(()) => Ok(ReceiveOutcome::Delivered(header.packet_type)),
            Err(err) if err.is_per_packet() => {
                tracing::warn!(
                    channel = %header.channel,
                    packet_type = %header.packet_type,
                    error = %err,
                    "dropping received packet"
                );
                Ok(ReceiveOutcome::Dropped(err))
            }
            Err(err) => Err(err),
        }
    }

    /// Write the next sendable packet, if any, and retire it.
    /// Returns whether a packet was sent.
    pub fn send_once<W: Write>(&self, writer: &mut PacketWriter<W>) -> Result<bool> {
        let Some(packet) = self.mux.query_send_packet() else {
            return Ok(false);
        };

        writer.write_packet(&packet)?;
        self.mux.remove_packet(&packet.header);
        Ok(true)
    }

    /// Dispatch packets until the peer closes the stream or [`stop`](Self::stop)
    /// is called. Read timeouts only serve to check the stop flag.
    pub fn run_receive_loop<R: Read>(&self, reader: &mut PacketReader<R>) -> Result<()> {
        tracing::debug!("receive loop started");
        while !self.is_stopped() {
            match self.receive_once(reader) {
                Ok(_) => {}
                Err(MuxError::Frame(FrameError::Io(err)))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(MuxError::Frame(ref err)) if is_disconnect(err) => {
                    tracing::debug!("peer closed the link");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        tracing::debug!("receive loop finished");
        Ok(())
    }

    /// Send packets as they become available until the stream closes or
    /// [`stop`](Self::stop) is called.
    pub fn run_send_loop<W: Write>(&self, writer: &mut PacketWriter<W>) -> Result<()> {
        tracing::debug!("send loop started");
        let event = self.mux.readiness_event();

        while !self.is_stopped() {
            self.mux.update_mux_state();
            self.mux.update_channel_state();

            match self.send_once(writer) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(MuxError::Frame(ref err)) if is_disconnect(err) => {
                    tracing::debug!("link closed while sending");
                    break;
                }
                Err(err) => return Err(err),
            }

            event.clear();
            // Output queued between the query and the clear would be missed.
            if self.mux.query_send_packet().is_some() {
                continue;
            }
            event.wait_timeout(self.poll_interval);
        }
        tracing::debug!("send loop finished");
        Ok(())
    }
}

fn is_disconnect(err: &FrameError) -> bool {
    match err {
        FrameError::ConnectionClosed => true,
        FrameError::Io(io) => matches!(
            io.kind(),
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
