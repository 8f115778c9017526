use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use linkmux_frame::ChannelId;
use linkmux_mux::MuxConfig;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join two multiplexers over a socket pair and transfer a payload.
    Loopback(LoopbackArgs),
    /// Decode a file of raw packets and print their headers.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: MuxConfig) -> CliResult<i32> {
    match command {
        Command::Loopback(args) => loopback::run(args, format, config),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Channel to transfer on, as MODULE:CHANNEL.
    #[arg(long, short = 'c', default_value = "0:1", value_parser = parse_channel)]
    pub channel: ChannelId,
    /// Payload size in bytes.
    #[arg(long, default_value = "262144")]
    pub size: usize,
    /// Largest data packet body (0 = protocol maximum).
    #[arg(long, default_value = "0")]
    pub max_packet_size: usize,
    /// Receive buffer capacity on the target side.
    #[arg(long, default_value = "65536")]
    pub receive_buffer: usize,
    /// Give up after this long (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// File holding concatenated packets.
    pub path: PathBuf,
    /// Largest body accepted while decoding.
    #[arg(long)]
    pub max_body_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `MODULE:CHANNEL`, or a bare channel number in module 0.
pub fn parse_channel(input: &str) -> Result<ChannelId, String> {
    let (module, channel) = match input.split_once(':') {
        Some((module, channel)) => (module, channel),
        None => ("0", input),
    };
    let module_id = module
        .trim()
        .parse()
        .map_err(|_| format!("invalid module id: {module}"))?;
    let channel_id = channel
        .trim()
        .parse()
        .map_err(|_| format!("invalid channel number: {channel}"))?;
    Ok(ChannelId::new(module_id, channel_id))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
