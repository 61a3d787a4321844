//! Reverse TCP tunnel.
//!
//! An agent behind NAT registers named services with a public relay; the
//! relay opens one public port per service and forwards every inbound
//! connection back to the agent over a single multiplexed control
//! connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP listeners and dialing
//! - [`frame`]: Type-tagged, length-prefixed framing and the message set
//! - [`session`]: Control sessions and the client/server engines (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use burrow_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use burrow_frame::*;
}

/// Re-export session and engine types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use burrow_session::*;
}
