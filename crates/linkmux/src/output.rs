use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use linkmux_frame::Packet;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One decoded packet as shown by the CLI.
#[derive(Debug, Serialize)]
pub struct PacketOutput {
    pub packet_type: &'static str,
    pub channel: String,
    pub version: u16,
    pub body_size: u32,
    pub share: u64,
    pub sequence_id: u64,
    pub body: String,
}

impl From<&Packet> for PacketOutput {
    fn from(packet: &Packet) -> Self {
        let header = &packet.header;
        Self {
            packet_type: header.packet_type.name(),
            channel: header.channel.to_string(),
            version: header.version,
            body_size: header.body_size,
            share: header.share,
            sequence_id: header.sequence_id,
            body: body_preview(&packet.body),
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

pub fn print_packets(packets: &[PacketOutput], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(packets),
        OutputFormat::Table => {
            let mut out = table(&["TYPE", "CHANNEL", "VER", "SIZE", "SHARE", "SEQ", "BODY"]);
            for p in packets {
                out.add_row(vec![
                    p.packet_type.to_string(),
                    p.channel.clone(),
                    p.version.to_string(),
                    p.body_size.to_string(),
                    p.share.to_string(),
                    p.sequence_id.to_string(),
                    p.body.clone(),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            for p in packets {
                println!(
                    "{} channel={} version={} size={} share={} seq={} body={}",
                    p.packet_type, p.channel, p.version, p.body_size, p.share, p.sequence_id, p.body
                );
            }
        }
    }
}

const PREVIEW_LIMIT: usize = 32;

fn body_preview(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    match std::str::from_utf8(body) {
        Ok(text) if body.len() <= PREVIEW_LIMIT => text.to_string(),
        _ => format!("<{} bytes>", body.len()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use linkmux_frame::{ChannelId, PacketHeader, PacketType};

    use super::*;

    #[test]
    fn packet_output_shows_short_text() {
        let header = PacketHeader::new(PacketType::Data, ChannelId::new(1, 2), 5, 0)
            .with_sequence_id(3);
        let packet = Packet::new(header, Bytes::from_static(b"hi"));

        let out = PacketOutput::from(&packet);
        assert_eq!(out.packet_type, "data");
        assert_eq!(out.channel, "1:2");
        assert_eq!(out.body_size, 2);
        assert_eq!(out.body, "hi");
    }

    #[test]
    fn long_or_binary_bodies_are_summarized() {
        assert_eq!(body_preview(&[0xff, 0xfe]), "<2 bytes>");
        assert_eq!(body_preview(&[b'a'; 64]), "<64 bytes>");
        assert_eq!(body_preview(b""), "");
    }
}
