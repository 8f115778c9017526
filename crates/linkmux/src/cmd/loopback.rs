use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use linkmux_frame::{FrameConfig, PacketReader, PacketWriter};
use linkmux_mux::{LinkDriver, LinkState, Mux, MuxConfig, MuxStats, PacketFactory, TaskKind};
use serde::Serialize;

use crate::cmd::{parse_duration, LoopbackArgs};
use crate::exit::{
    frame_error, io_error, mux_error, CliError, CliResult, DATA_INVALID, INTERNAL, SUCCESS,
    TIMEOUT,
};
use crate::output::{print_json, table, OutputFormat};

const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// One multiplexer with its receive and send threads.
struct Endpoint {
    name: &'static str,
    driver: Arc<LinkDriver>,
    threads: Vec<JoinHandle<linkmux_mux::Result<()>>>,
}

impl Endpoint {
    fn start(name: &'static str, stream: UnixStream, config: MuxConfig) -> CliResult<Self> {
        let frame_config = FrameConfig {
            max_body_size: config.channel.max_body_size,
            read_timeout: Some(READ_TIMEOUT),
            write_timeout: None,
        };
        let mux = Mux::with_config(
            Arc::new(PacketFactory::new()),
            Arc::new(LinkState::new()),
            config,
        );
        let driver = Arc::new(LinkDriver::new(Arc::new(mux)));

        let read_half = stream
            .try_clone()
            .map_err(|err| io_error("clone socket", err))?;
        let mut reader = PacketReader::with_config_unix(read_half, frame_config.clone())
            .map_err(|err| frame_error("configure reader", err))?;
        let mut writer = PacketWriter::with_config_unix(stream, frame_config)
            .map_err(|err| frame_error("configure writer", err))?;

        let rx = {
            let driver = Arc::clone(&driver);
            thread::Builder::new()
                .name(format!("{name}-rx"))
                .spawn(move || driver.run_receive_loop(&mut reader))
                .map_err(|err| io_error("spawn receive thread", err))?
        };
        let tx = {
            let driver = Arc::clone(&driver);
            thread::Builder::new()
                .name(format!("{name}-tx"))
                .spawn(move || driver.run_send_loop(&mut writer))
                .map_err(|err| io_error("spawn send thread", err))?
        };

        tracing::debug!(endpoint = name, "endpoint started");
        Ok(Self {
            name,
            driver,
            threads: vec![rx, tx],
        })
    }

    fn mux(&self) -> &Arc<Mux> {
        self.driver.mux()
    }

    fn shutdown(self) -> CliResult<MuxStats> {
        self.driver.stop();
        for handle in self.threads {
            handle
                .join()
                .map_err(|_| CliError::new(INTERNAL, format!("{} driver thread panicked", self.name)))?
                .map_err(|err| mux_error(self.name, err))?;
        }
        Ok(self.driver.mux().stats())
    }
}

#[derive(Serialize)]
struct LoopbackOutput {
    channel: String,
    bytes: usize,
    elapsed_ms: f64,
    throughput_mib_s: f64,
    host: MuxStats,
    target: MuxStats,
}

pub fn run(args: LoopbackArgs, format: OutputFormat, config: MuxConfig) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;

    let (left, right) = UnixStream::pair().map_err(|err| io_error("socket pair", err))?;
    let host = Endpoint::start("host", left, config.clone())?;
    let target = Endpoint::start("target", right, config)?;
    let channel = args.channel;

    for endpoint in [&host, &target] {
        endpoint
            .mux()
            .open(channel)
            .map_err(|err| mux_error(endpoint.name, err))?;
    }
    target
        .mux()
        .set_receive_buffer(channel, BytesMut::with_capacity(args.receive_buffer));
    let task = target
        .mux()
        .reserve_task(channel, TaskKind::Receive)
        .map_err(|err| mux_error("reserve task", err))?;
    let arrived = target
        .mux()
        .get_task_event(task)
        .map_err(|err| mux_error("task event", err))?;

    let payload = pattern(args.size);
    let started = Instant::now();
    host.mux()
        .set_send_buffer_with_data(channel, &payload, args.max_packet_size);
    tracing::info!(%channel, bytes = payload.len(), "transfer started");

    let mut delivered = Vec::with_capacity(payload.len());
    let mut chunk = vec![0u8; 16 * 1024];
    while delivered.len() < payload.len() {
        if started.elapsed() >= timeout {
            return Err(CliError::new(
                TIMEOUT,
                format!(
                    "transfer timed out after {timeout:?} ({} of {} bytes)",
                    delivered.len(),
                    payload.len()
                ),
            ));
        }
        arrived.clear();
        let n = target
            .mux()
            .receive(channel, &mut chunk)
            .map_err(|err| mux_error("receive", err))?;
        if n == 0 {
            arrived.wait_timeout(READ_TIMEOUT);
        }
        delivered.extend_from_slice(&chunk[..n]);
    }
    let elapsed = started.elapsed();

    if delivered != payload {
        return Err(CliError::new(DATA_INVALID, "payload corrupted in transit"));
    }
    tracing::info!(%channel, elapsed_ms = elapsed.as_millis() as u64, "transfer complete");

    let out = LoopbackOutput {
        channel: channel.to_string(),
        bytes: payload.len(),
        elapsed_ms: round2(elapsed.as_secs_f64() * 1000.0),
        throughput_mib_s: round2(throughput(payload.len(), elapsed)),
        host: host.shutdown()?,
        target: target.shutdown()?,
    };
    print_output(&out, format);
    Ok(SUCCESS)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn throughput(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    bytes as f64 / (1024.0 * 1024.0) / secs
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn print_output(out: &LoopbackOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut stats = table(&["", "HOST", "TARGET"]);
            let rows: [(&str, fn(&MuxStats) -> String); 6] = [
                ("packets received", |s| s.packets_received.to_string()),
                ("packets removed", |s| s.packets_removed.to_string()),
                ("unknown channel", |s| s.unknown_channel_packets.to_string()),
                ("errors queued", |s| s.error_notifications_queued.to_string()),
                ("errors dropped", |s| s.error_notifications_dropped.to_string()),
                ("send ready", |s| s.send_ready_notifications.to_string()),
            ];
            for (label, field) in rows {
                stats.add_row(vec![label.to_string(), field(&out.host), field(&out.target)]);
            }
            println!(
                "channel {}: {} bytes in {:.2} ms ({:.2} MiB/s)",
                out.channel, out.bytes, out.elapsed_ms, out.throughput_mib_s
            );
            println!("{stats}");
        }
        OutputFormat::Pretty => {
            println!("Loopback transfer:");
            println!("  Channel:    {}", out.channel);
            println!("  Bytes:      {}", out.bytes);
            println!("  Elapsed:    {:.2} ms", out.elapsed_ms);
            println!("  Throughput: {:.2} MiB/s", out.throughput_mib_s);
            println!(
                "  Packets:    host sent {} / target sent {}",
                out.host.packets_removed, out.target.packets_removed
            );
        }
    }
}
