//! Channel multiplexer for a single host/target link.
//!
//! Many logical channels share one physical link. The [`Mux`] validates and
//! routes inbound packets, picks the next outbound packet (error
//! notifications first, then channels in the order they were opened), and
//! holds channel output back while the link sleeps.
//!
//! Per-channel flow control lives in [`channel`]; [`LinkDriver`] pumps a mux
//! over a blocking byte stream.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod factory;
pub mod link_state;
pub mod mux;
pub mod table;
pub mod task;

pub use channel::{Channel, ChannelState};
pub use config::{ChannelConfig, MuxConfig, DEFAULT_INITIAL_WINDOW};
pub use driver::{LinkDriver, ReceiveOutcome};
pub use error::{MuxError, Result};
pub use event::Event;
pub use factory::PacketFactory;
pub use link_state::{LinkState, LinkStateSource};
pub use mux::{Mux, MuxState, MuxStats};
pub use task::{TaskKind, TaskManager};
