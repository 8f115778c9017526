//! The multiplexer: routes inbound packets to channels and picks the next
//! outbound packet for the link.
//!
//! All mutable state sits behind one mutex that every public operation holds
//! for its full duration, so entry points are atomic with respect to each
//! other. Nothing here blocks on I/O; callers wait on the readiness event or
//! on task events outside the lock.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use linkmux_frame::{ChannelId, Packet, PacketHeader, PacketType, SIGNATURE};
use serde::{Deserialize, Serialize};

use crate::buffer::GlobalSendBuffer;
use crate::channel::{Channel, ChannelState};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::event::Event;
use crate::factory::PacketFactory;
use crate::link_state::LinkStateSource;
use crate::table::ChannelTable;
use crate::task::{TaskKind, TaskManager};

/// Link-wide send gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuxState {
    Normal,
    /// Channel output is held back. Receives and error notifications still flow.
    Sleep,
}

impl MuxState {
    /// Whether channel packets may be handed to the link.
    pub fn allows_send(self) -> bool {
        match self {
            MuxState::Normal => true,
            MuxState::Sleep => false,
        }
    }
}

/// Counters for tooling. Snapshot taken under the mux lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuxStats {
    pub packets_received: u64,
    pub unknown_channel_packets: u64,
    pub error_notifications_queued: u64,
    pub error_notifications_dropped: u64,
    pub packets_removed: u64,
    pub send_ready_notifications: u64,
    pub open_channels: usize,
}

#[derive(Debug)]
struct MuxInner {
    table: ChannelTable,
    global: GlobalSendBuffer,
    tasks: TaskManager,
    state: MuxState,
    stats: MuxStats,
}

pub struct Mux {
    inner: Mutex<MuxInner>,
    /// Negotiated version. Written only under `inner`, read lock-free by
    /// header validation.
    version: AtomicU16,
    event: Arc<Event>,
    factory: Arc<PacketFactory>,
    link_state: Arc<dyn LinkStateSource>,
    config: MuxConfig,
}

impl std::fmt::Debug for Mux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mux")
            .field("version", &self.version())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Mux {
    pub fn new(factory: Arc<PacketFactory>, link_state: Arc<dyn LinkStateSource>) -> Self {
        Self::with_config(factory, link_state, MuxConfig::default())
    }

    pub fn with_config(
        factory: Arc<PacketFactory>,
        link_state: Arc<dyn LinkStateSource>,
        config: MuxConfig,
    ) -> Self {
        let inner = MuxInner {
            table: ChannelTable::new(config.max_channels),
            global: GlobalSendBuffer::new(config.global_send_capacity),
            tasks: TaskManager::new(),
            state: MuxState::Normal,
            stats: MuxStats::default(),
        };
        Self {
            inner: Mutex::new(inner),
            version: AtomicU16::new(config.protocol_version),
            event: Arc::new(Event::new()),
            factory,
            link_state,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MuxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn version(&self) -> u16 {
        self.version.load(Ordering::Acquire)
    }

    /// Set the negotiated version on the mux and every open channel.
    pub fn set_version(&self, version: u16) {
        let mut inner = self.lock();
        self.version.store(version, Ordering::Release);
        for channel in inner.table.iter_mut() {
            channel.set_version(version);
        }
        tracing::debug!(version, "protocol version set");
    }

    /// Validate a received header before its body is dispatched.
    ///
    /// # Panics
    ///
    /// Panics if the signature is not [`SIGNATURE`]; the framing layer must
    /// never deliver such a header.
    pub fn check_received_header(&self, header: &PacketHeader) -> Result<()> {
        assert_eq!(
            header.signature, SIGNATURE,
            "packet with foreign signature reached the mux"
        );

        let version = self.version();
        match header.packet_type {
            PacketType::Data => {
                if header.version != version {
                    return Err(version_mismatch(header, version));
                }
                if header.body_len() > self.config.channel.max_body_size {
                    return Err(MuxError::ProtocolError(format!(
                        "data body of {} bytes exceeds {}",
                        header.body_size, self.config.channel.max_body_size
                    )));
                }
            }
            PacketType::MaxData => {
                if header.version != version {
                    return Err(version_mismatch(header, version));
                }
                if header.body_size != 0 {
                    return Err(non_empty_body(header));
                }
            }
            PacketType::Error => {
                if header.body_size != 0 {
                    return Err(non_empty_body(header));
                }
            }
        }
        Ok(())
    }

    /// Hand a received packet to its channel.
    ///
    /// A `Data` or `MaxData` packet for an unknown channel queues an error
    /// notification for the peer. Failing to queue it is logged; the call
    /// still reports `ChannelNotExist`.
    pub fn process_receive_packet(&self, header: &PacketHeader, body: &[u8]) -> Result<()> {
        if body.len() != header.body_len() {
            return Err(MuxError::ProtocolError(format!(
                "header announces {} body bytes, got {}",
                header.body_size,
                body.len()
            )));
        }

        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.stats.packets_received += 1;

        if let Some(channel) = inner.table.get_mut(header.channel) {
            channel.process_receive_packet(header, body)?;
            match header.packet_type {
                PacketType::Data => inner.tasks.notify_receive_data(header.channel),
                PacketType::MaxData => self.event.signal(),
                PacketType::Error => inner.tasks.notify_send_ready(),
            }
            return Ok(());
        }

        inner.stats.unknown_channel_packets += 1;
        match header.packet_type {
            PacketType::Data | PacketType::MaxData => {
                if let Err(err) = self.enqueue_error_packet(inner, header.channel) {
                    inner.stats.error_notifications_dropped += 1;
                    tracing::warn!(
                        channel = %header.channel,
                        error = %err,
                        "could not queue channel-not-found notification"
                    );
                }
            }
            PacketType::Error => {
                tracing::debug!(channel = %header.channel, "error packet for unknown channel ignored");
            }
        }
        Err(MuxError::ChannelNotExist(header.channel))
    }

    /// The next packet to put on the link, if any. Nothing is consumed until
    /// [`Mux::remove_packet`] is called with its header.
    ///
    /// Pending error notifications always win and ignore the sleep gate.
    /// Otherwise the first channel with output decides the result; when the
    /// link sleeps this is `None` even if later channels have output too.
    pub fn query_send_packet(&self) -> Option<Packet> {
        let inner = self.lock();

        if let Some(packet) = inner.global.next_packet() {
            return Some(packet.clone());
        }

        let packet = inner.table.iter().find_map(Channel::query_send_packet)?;
        if inner.state.allows_send() {
            Some(packet)
        } else {
            tracing::trace!(channel = %packet.header.channel, "send held back while link sleeps");
            None
        }
    }

    /// Queue an error notification telling the peer `channel` is unknown.
    pub fn send_error_packet(&self, channel: ChannelId) -> Result<()> {
        let mut inner = self.lock();
        self.enqueue_error_packet(&mut inner, channel)
    }

    fn enqueue_error_packet(&self, inner: &mut MuxInner, channel: ChannelId) -> Result<()> {
        inner
            .global
            .add_packet(self.factory.make_error_packet(channel))?;
        inner.stats.error_notifications_queued += 1;
        self.event.signal();
        tracing::debug!(%channel, "channel-not-found notification queued");
        Ok(())
    }

    /// Retire a transmitted packet. Unknown channels and stale headers are
    /// ignored. Send waiters are notified in every case.
    pub fn remove_packet(&self, header: &PacketHeader) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if header.packet_type == PacketType::Error {
            inner.global.remove_packet();
        } else if let Some(channel) = inner.table.get_mut(header.channel) {
            channel.remove_packet(header);
        }

        inner.stats.packets_removed += 1;
        inner.tasks.notify_send_ready();
    }

    /// Let every channel re-evaluate its flow-control state.
    pub fn update_channel_state(&self) {
        let mut inner = self.lock();
        for channel in inner.table.iter_mut() {
            channel.update_state();
        }
    }

    /// Refresh the send gate from the link state. Waking signals the
    /// readiness event.
    pub fn update_mux_state(&self) {
        let mut inner = self.lock();
        let next = if self.link_state.is_sleeping() {
            MuxState::Sleep
        } else {
            self.event.signal();
            MuxState::Normal
        };
        if inner.state != next {
            tracing::debug!(from = ?inner.state, to = ?next, "mux state changed");
        }
        inner.state = next;
    }

    pub fn state(&self) -> MuxState {
        self.lock().state
    }

    pub fn check_channel_exist(&self, channel: ChannelId) -> Result<()> {
        if self.lock().table.contains(channel) {
            Ok(())
        } else {
            Err(MuxError::ChannelNotExist(channel))
        }
    }

    /// Open `channel` at the current negotiated version.
    pub fn open(&self, channel: ChannelId) -> Result<()> {
        let mut inner = self.lock();
        if inner.table.contains(channel) {
            return Err(MuxError::ChannelAlreadyExist(channel));
        }

        let opened = inner.table.add_channel(Channel::new(
            channel,
            Arc::clone(&self.factory),
            self.config.channel,
        ))?;
        opened.set_version(self.version());
        tracing::debug!(%channel, "channel opened");
        Ok(())
    }

    /// Close `channel`. Its tasks are woken and freed; late acknowledgments
    /// for its packets become no-ops.
    pub fn close(&self, channel: ChannelId) -> Result<()> {
        let mut inner = self.lock();
        inner
            .table
            .remove(channel)
            .ok_or(MuxError::ChannelNotExist(channel))?;
        inner.tasks.free_channel_tasks(channel);
        tracing::debug!(%channel, "channel closed");
        Ok(())
    }

    pub fn get_task_event(&self, task_id: u32) -> Result<Arc<Event>> {
        self.lock()
            .tasks
            .get_task_event(task_id)
            .ok_or(MuxError::TaskNotExist(task_id))
    }

    /// Register a waiter for send space or receive data on `channel`.
    pub fn reserve_task(&self, channel: ChannelId, kind: TaskKind) -> Result<u32> {
        let mut inner = self.lock();
        if !inner.table.contains(channel) {
            return Err(MuxError::ChannelNotExist(channel));
        }
        Ok(inner.tasks.allocate(channel, kind))
    }

    pub fn free_task(&self, task_id: u32) -> Result<()> {
        if self.lock().tasks.free(task_id) {
            Ok(())
        } else {
            Err(MuxError::TaskNotExist(task_id))
        }
    }

    /// Install caller storage as the send buffer of `channel`.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is not open.
    pub fn set_send_buffer(&self, channel: ChannelId, storage: BytesMut, max_packet_size: usize) {
        let mut inner = self.lock();
        open_channel(&mut inner.table, channel).set_send_buffer(storage, max_packet_size);
        self.event.signal();
    }

    /// Install a send buffer holding a copy of `data`, all of it pending.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is not open.
    pub fn set_send_buffer_with_data(&self, channel: ChannelId, data: &[u8], max_packet_size: usize) {
        let mut inner = self.lock();
        open_channel(&mut inner.table, channel).set_send_buffer_with_data(data, max_packet_size);
        self.event.signal();
    }

    /// # Panics
    ///
    /// Panics if `channel` is not open.
    pub fn set_receive_buffer(&self, channel: ChannelId, storage: BytesMut) {
        let mut inner = self.lock();
        open_channel(&mut inner.table, channel).set_receive_buffer(storage);
        self.event.signal();
    }

    /// Queue application bytes on `channel`. Returns how many fit.
    pub fn send(&self, channel: ChannelId, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        let queued = inner
            .table
            .get_mut(channel)
            .ok_or(MuxError::ChannelNotExist(channel))?
            .send(data)?;
        if queued > 0 {
            self.event.signal();
        }
        Ok(queued)
    }

    /// Read received bytes from `channel` into `out`.
    pub fn receive(&self, channel: ChannelId, out: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock();
        let read = inner
            .table
            .get_mut(channel)
            .ok_or(MuxError::ChannelNotExist(channel))?
            .receive(out)?;
        if read > 0 {
            self.event.signal();
        }
        Ok(read)
    }

    /// Manual-reset event signaled when output may have become available.
    /// The mux never clears it.
    pub fn readiness_event(&self) -> Arc<Event> {
        Arc::clone(&self.event)
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.lock().table.ids()
    }

    pub fn channel_state(&self, channel: ChannelId) -> Result<ChannelState> {
        self.with_channel(channel, Channel::state)
    }

    pub fn pending_send_bytes(&self, channel: ChannelId) -> Result<usize> {
        self.with_channel(channel, Channel::pending_send_bytes)
    }

    pub fn received_bytes(&self, channel: ChannelId) -> Result<usize> {
        self.with_channel(channel, Channel::received_bytes)
    }

    pub fn stats(&self) -> MuxStats {
        let inner = self.lock();
        MuxStats {
            send_ready_notifications: inner.tasks.send_ready_notifications(),
            open_channels: inner.table.len(),
            ..inner.stats.clone()
        }
    }

    /// Number of error notifications waiting to be sent.
    pub fn pending_error_packets(&self) -> usize {
        self.lock().global.len()
    }

    fn with_channel<T>(&self, channel: ChannelId, f: impl FnOnce(&Channel) -> T) -> Result<T> {
        self.lock()
            .table
            .get(channel)
            .map(f)
            .ok_or(MuxError::ChannelNotExist(channel))
    }
}

fn open_channel(table: &mut ChannelTable, channel: ChannelId) -> &mut Channel {
    match table.get_mut(channel) {
        Some(found) => found,
        None => panic!("buffer configured on channel {channel} which is not open"),
    }
}

fn version_mismatch(header: &PacketHeader, expected: u16) -> MuxError {
    MuxError::ProtocolError(format!(
        "{} packet version {} does not match negotiated version {expected}",
        header.packet_type, header.version
    ))
}

fn non_empty_body(header: &PacketHeader) -> MuxError {
    MuxError::ProtocolError(format!(
        "{} packet must have an empty body, got {} bytes",
        header.packet_type, header.body_size
    ))
}

#[cfg(test)]
mod tests {
    use linkmux_frame::{MAX_BODY_SIZE, PROTOCOL_VERSION};

    use super::*;
    use crate::config::ChannelConfig;
    use crate::link_state::LinkState;

    const CH: ChannelId = ChannelId::new(1, 5);

    /// A mux whose channels may send before the peer announces a window.
    fn mux() -> (Mux, Arc<LinkState>) {
        let link = Arc::new(LinkState::new());
        let config = MuxConfig {
            channel: ChannelConfig {
                initial_window: 1024,
                ..ChannelConfig::default()
            },
            ..MuxConfig::default()
        };
        let mux = Mux::with_config(Arc::new(PacketFactory::new()), link.clone(), config);
        (mux, link)
    }

    fn header(packet_type: PacketType, version: u16, body_size: u32) -> PacketHeader {
        PacketHeader::new(packet_type, CH, version, body_size)
    }

    #[test]
    fn starts_normal_at_default_version() {
        let (mux, _) = mux();
        assert_eq!(mux.state(), MuxState::Normal);
        assert_eq!(mux.version(), PROTOCOL_VERSION);
        assert!(mux.channel_ids().is_empty());
    }

    #[test]
    fn configured_version_used_for_validation() {
        let config = MuxConfig {
            protocol_version: 3,
            ..MuxConfig::default()
        };
        let mux = Mux::with_config(
            Arc::new(PacketFactory::new()),
            Arc::new(LinkState::new()),
            config,
        );

        assert!(mux.check_received_header(&header(PacketType::Data, 3, 0)).is_ok());
        assert!(mux
            .check_received_header(&header(PacketType::Data, PROTOCOL_VERSION, 0))
            .is_err());
    }

    #[test]
    fn data_body_limit_is_inclusive() {
        let (mux, _) = mux();
        let at_limit = header(PacketType::Data, PROTOCOL_VERSION, MAX_BODY_SIZE as u32);
        assert!(mux.check_received_header(&at_limit).is_ok());
    }

    #[test]
    #[should_panic(expected = "foreign signature")]
    fn foreign_signature_panics() {
        let (mux, _) = mux();
        let mut bad = header(PacketType::Error, 0, 0);
        bad.signature = 0;
        let _ = mux.check_received_header(&bad);
    }

    #[test]
    fn body_length_must_match_header() {
        let (mux, _) = mux();
        mux.open(CH).unwrap();

        let err = mux
            .process_receive_packet(&header(PacketType::Data, PROTOCOL_VERSION, 4), b"ab")
            .unwrap_err();
        assert!(matches!(err, MuxError::ProtocolError(_)));
    }

    #[test]
    fn second_unknown_channel_notification_is_dropped() {
        let (mux, _) = mux();
        let data = header(PacketType::Data, PROTOCOL_VERSION, 0);

        assert!(matches!(
            mux.process_receive_packet(&data, &[]),
            Err(MuxError::ChannelNotExist(CH))
        ));
        assert!(matches!(
            mux.process_receive_packet(&data, &[]),
            Err(MuxError::ChannelNotExist(CH))
        ));

        let stats = mux.stats();
        assert_eq!(stats.error_notifications_queued, 1);
        assert_eq!(stats.error_notifications_dropped, 1);
        assert_eq!(mux.pending_error_packets(), 1);
        assert!(matches!(
            mux.send_error_packet(CH),
            Err(MuxError::GlobalSendBufferFull)
        ));
    }

    #[test]
    fn error_enqueue_signals_readiness() {
        let (mux, _) = mux();
        let event = mux.readiness_event();
        assert!(!event.is_signaled());

        mux.send_error_packet(CH).unwrap();
        assert!(event.is_signaled());
    }

    #[test]
    fn wake_signals_readiness_but_sleep_does_not() {
        let (mux, link) = mux();
        let event = mux.readiness_event();

        link.sleep();
        mux.update_mux_state();
        assert_eq!(mux.state(), MuxState::Sleep);
        assert!(!event.is_signaled());

        link.wake();
        mux.update_mux_state();
        assert_eq!(mux.state(), MuxState::Normal);
        assert!(event.is_signaled());
    }

    #[test]
    fn sleep_stops_at_first_ready_channel() {
        let (mux, link) = mux();
        let first = ChannelId::new(0, 1);
        let second = ChannelId::new(0, 2);
        mux.open(first).unwrap();
        mux.open(second).unwrap();
        mux.set_send_buffer_with_data(second, b"later", 0);

        link.sleep();
        mux.update_mux_state();
        assert!(mux.query_send_packet().is_none());

        mux.set_send_buffer_with_data(first, b"first", 0);
        link.wake();
        mux.update_mux_state();
        let packet = mux.query_send_packet().unwrap();
        assert_eq!(packet.header.channel, first);
    }

    #[test]
    fn close_frees_tasks_and_ignores_late_acks() {
        let (mux, _) = mux();
        mux.open(CH).unwrap();
        mux.set_send_buffer_with_data(CH, b"bye", 0);
        let task = mux.reserve_task(CH, TaskKind::Send).unwrap();
        let handle = mux.get_task_event(task).unwrap();
        let packet = mux.query_send_packet().unwrap();

        mux.close(CH).unwrap();
        assert!(handle.is_signaled());
        assert!(matches!(mux.get_task_event(task), Err(MuxError::TaskNotExist(_))));

        mux.remove_packet(&packet.header);
        assert!(mux.query_send_packet().is_none());
        assert!(matches!(mux.close(CH), Err(MuxError::ChannelNotExist(CH))));
    }

    #[test]
    fn receive_wakes_receive_task() {
        let (mux, _) = mux();
        mux.open(CH).unwrap();
        mux.set_receive_buffer(CH, BytesMut::with_capacity(64));
        let task = mux.reserve_task(CH, TaskKind::Receive).unwrap();

        let data = header(PacketType::Data, PROTOCOL_VERSION, 3).with_sequence_id(1);
        mux.process_receive_packet(&data, b"abc").unwrap();

        assert!(mux.get_task_event(task).unwrap().is_signaled());
        assert_eq!(mux.received_bytes(CH).unwrap(), 3);

        let mut out = [0u8; 8];
        assert_eq!(mux.receive(CH, &mut out).unwrap(), 3);
        assert_eq!(&out[..3], b"abc");
        mux.free_task(task).unwrap();
        assert!(mux.free_task(task).is_err());
    }

    #[test]
    fn send_queues_into_installed_buffer() {
        let (mux, _) = mux();
        mux.open(CH).unwrap();
        assert!(matches!(
            mux.send(CH, b"x"),
            Err(MuxError::SendBufferNotSet(CH))
        ));

        mux.set_send_buffer(CH, BytesMut::with_capacity(16), 0);
        mux.readiness_event().clear();
        assert_eq!(mux.send(CH, b"payload").unwrap(), 7);
        assert!(mux.readiness_event().is_signaled());
        assert_eq!(mux.pending_send_bytes(CH).unwrap(), 7);
    }

    #[test]
    fn peer_error_disconnects_open_channel() {
        let (mux, _) = mux();
        mux.open(CH).unwrap();
        mux.set_send_buffer_with_data(CH, b"data", 0);

        mux.process_receive_packet(&header(PacketType::Error, 0, 0), &[])
            .unwrap();

        assert_eq!(mux.channel_state(CH).unwrap(), ChannelState::Disconnected);
        assert!(mux.query_send_packet().is_none());
    }

    #[test]
    fn too_many_channels() {
        let config = MuxConfig {
            max_channels: 1,
            ..MuxConfig::default()
        };
        let mux = Mux::with_config(
            Arc::new(PacketFactory::new()),
            Arc::new(LinkState::new()),
            config,
        );
        mux.open(ChannelId::new(0, 1)).unwrap();

        assert!(matches!(
            mux.open(ChannelId::new(0, 2)),
            Err(MuxError::TooManyChannels { max: 1 })
        ));
    }

    #[test]
    #[should_panic(expected = "not open")]
    fn buffer_on_missing_channel_panics() {
        let (mux, _) = mux();
        mux.set_receive_buffer(CH, BytesMut::new());
    }

    #[test]
    fn lock_survives_poisoning() {
        let (mux, _) = mux();
        let mux = Arc::new(mux);
        let poisoner = Arc::clone(&mux);

        let result = std::thread::spawn(move || {
            poisoner.set_send_buffer(CH, BytesMut::new(), 0);
        })
        .join();
        assert!(result.is_err());

        mux.open(CH).unwrap();
        assert!(mux.check_channel_exist(CH).is_ok());
    }
}
