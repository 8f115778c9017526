use std::fmt;
use std::io;

use linkmux_frame::FrameError;
use linkmux_mux::MuxError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const LINK_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => LINK_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::InvalidSignature { .. }
        | FrameError::UnknownPacketType(_)
        | FrameError::BodyTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(LINK_ERROR, format!("{context}: {err}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Frame(err) => frame_error(context, err),
        MuxError::ProtocolError(_) | MuxError::SequenceMismatch { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MuxError::ChannelNotExist(_)
        | MuxError::ChannelAlreadyExist(_)
        | MuxError::TooManyChannels { .. }
        | MuxError::SendBufferNotSet(_)
        | MuxError::ReceiveBufferNotSet(_) => CliError::new(USAGE, format!("{context}: {err}")),
        MuxError::ChannelDisconnected(_) => CliError::new(LINK_ERROR, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn config_error(path: &std::path::Path, err: serde_json::Error) -> CliError {
    CliError::new(
        CONFIG_INVALID,
        format!("invalid config {}: {err}", path.display()),
    )
}
