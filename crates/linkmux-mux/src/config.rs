use linkmux_frame::{MAX_BODY_SIZE, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};

/// Default flow-control window a sender may use before the peer announces one.
///
/// Zero: nothing is sent on a channel until the peer installs a receive
/// buffer and announces its capacity.
pub const DEFAULT_INITIAL_WINDOW: u64 = 0;

/// Multiplexer-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Protocol version used until `set_version` negotiates another one.
    pub protocol_version: u16,
    /// Maximum outstanding error notifications.
    pub global_send_capacity: usize,
    /// Maximum number of simultaneously open channels.
    pub max_channels: usize,
    /// Settings applied to every channel opened on this mux.
    pub channel: ChannelConfig,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            global_send_capacity: 1,
            max_channels: 64,
            channel: ChannelConfig::default(),
        }
    }
}

/// Per-channel flow-control settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bytes the peer may be sent before its first window announcement.
    ///
    /// Both sides must agree on it. A nonzero window reserves a receive
    /// buffer of that size on every channel as soon as it opens.
    pub initial_window: u64,
    /// Largest `Data` body sent or accepted.
    pub max_body_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_INITIAL_WINDOW,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: MuxConfig =
            serde_json::from_str(r#"{ "max_channels": 4, "channel": { "initial_window": 128 } }"#)
                .unwrap();

        assert_eq!(cfg.max_channels, 4);
        assert_eq!(cfg.global_send_capacity, 1);
        assert_eq!(cfg.protocol_version, PROTOCOL_VERSION);
        assert_eq!(cfg.channel.initial_window, 128);
        assert_eq!(cfg.channel.max_body_size, MAX_BODY_SIZE);
    }

    #[test]
    fn default_window_waits_for_announcement() {
        assert_eq!(ChannelConfig::default().initial_window, 0);
    }
}
