//! Many logical channels over one host/target link.
//!
//! # Crate Structure
//!
//! - [`frame`]: packet headers, the 40-byte wire codec and blocking packet I/O
//! - [`mux`]: the multiplexer, per-channel flow control and the link driver

/// Re-export frame types.
pub mod frame {
    pub use linkmux_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use linkmux_mux::*;
}
