#![cfg(unix)]

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use linkmux_frame::{ChannelId, FrameConfig, PacketReader, PacketWriter};
use linkmux_mux::{
    ChannelConfig, LinkDriver, LinkState, Mux, MuxConfig, PacketFactory, TaskKind,
};

struct Side {
    driver: Arc<LinkDriver>,
    threads: Vec<JoinHandle<linkmux_mux::Result<()>>>,
}

impl Side {
    fn start(stream: UnixStream, config: MuxConfig) -> Self {
        let mux = Arc::new(Mux::with_config(
            Arc::new(PacketFactory::new()),
            Arc::new(LinkState::new()),
            config,
        ));
        let driver =
            Arc::new(LinkDriver::new(mux).with_poll_interval(Duration::from_millis(10)));

        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(25)),
            ..FrameConfig::default()
        };
        let read_half = stream.try_clone().expect("stream should clone");
        let mut reader =
            PacketReader::with_config_unix(read_half, config.clone()).expect("reader should build");
        let mut writer =
            PacketWriter::with_config_unix(stream, config).expect("writer should build");

        let rx = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.run_receive_loop(&mut reader))
        };
        let tx = {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver.run_send_loop(&mut writer))
        };

        Self {
            driver,
            threads: vec![rx, tx],
        }
    }

    fn mux(&self) -> &Arc<Mux> {
        self.driver.mux()
    }

    fn shutdown(self) {
        self.driver.stop();
        for handle in self.threads {
            handle
                .join()
                .expect("driver thread should not panic")
                .expect("driver loop should end cleanly");
        }
    }
}

#[test]
fn payload_crosses_socket_pair() {
    let (left, right) = UnixStream::pair().expect("socket pair should open");
    let sender = Side::start(left, MuxConfig::default());
    let receiver = Side::start(right, MuxConfig::default());
    let id = ChannelId::new(2, 5);

    sender.mux().open(id).unwrap();
    receiver.mux().open(id).unwrap();
    receiver
        .mux()
        .set_receive_buffer(id, BytesMut::with_capacity(16 * 1024));
    let task = receiver.mux().reserve_task(id, TaskKind::Receive).unwrap();
    let arrived = receiver.mux().get_task_event(task).unwrap();

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    sender.mux().set_send_buffer_with_data(id, &payload, 4096);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut delivered = Vec::with_capacity(payload.len());
    let mut out = vec![0u8; 8192];
    while delivered.len() < payload.len() {
        assert!(Instant::now() < deadline, "transfer timed out");
        arrived.clear();
        let n = receiver.mux().receive(id, &mut out).unwrap();
        if n == 0 {
            arrived.wait_timeout(Duration::from_millis(50));
        }
        delivered.extend_from_slice(&out[..n]);
    }

    assert_eq!(delivered, payload);
    assert_eq!(sender.mux().pending_send_bytes(id).unwrap(), 0);

    sender.shutdown();
    receiver.shutdown();
}

#[test]
fn unopened_peer_channel_disconnects_sender() {
    let (left, right) = UnixStream::pair().expect("socket pair should open");
    let granted = MuxConfig {
        channel: ChannelConfig {
            initial_window: 4096,
            ..ChannelConfig::default()
        },
        ..MuxConfig::default()
    };
    let sender = Side::start(left, granted);
    let receiver = Side::start(right, MuxConfig::default());
    let id = ChannelId::new(0, 42);

    sender.mux().open(id).unwrap();
    sender.mux().set_send_buffer_with_data(id, b"anyone there?", 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while sender.mux().channel_state(id).unwrap() != linkmux_mux::ChannelState::Disconnected {
        assert!(Instant::now() < deadline, "no error notification arrived");
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(receiver.mux().stats().unknown_channel_packets, 1);
    assert_eq!(receiver.mux().stats().error_notifications_queued, 1);

    sender.shutdown();
    receiver.shutdown();
}
