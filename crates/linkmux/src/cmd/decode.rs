use bytes::BytesMut;
use linkmux_frame::{decode_packet, MAX_BODY_SIZE};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_packets, OutputFormat, PacketOutput};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = std::fs::read(&args.path)
        .map_err(|err| io_error(&format!("read {}", args.path.display()), err))?;
    let max_body_size = args.max_body_size.unwrap_or(MAX_BODY_SIZE);

    let mut buf = BytesMut::from(bytes.as_slice());
    let mut packets = Vec::new();
    while let Some(packet) =
        decode_packet(&mut buf, max_body_size).map_err(|err| frame_error("decode", err))?
    {
        packets.push(PacketOutput::from(&packet));
    }
    tracing::debug!(count = packets.len(), "packets decoded");

    if !buf.is_empty() {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "{} trailing bytes after {} packets",
                buf.len(),
                packets.len()
            ),
        ));
    }

    print_packets(&packets, format);
    Ok(SUCCESS)
}
