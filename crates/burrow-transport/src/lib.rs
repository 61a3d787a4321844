//! TCP transport primitives for burrow.
//!
//! This is the lowest layer of the tunnel. It provides:
//! - [`TcpAcceptor`], a listening socket that can be closed from another thread
//! - [`connect`], an outbound dial with contextual errors
//! - [`is_expected`], the classifier used to pick log verbosity for socket errors
//!
//! Everything above (framing, sessions, engines) builds on plain
//! [`std::net::TcpStream`] values handed out here.

pub mod classify;
pub mod error;
pub mod tcp;

pub use classify::is_expected;
pub use error::{Result, TransportError};
pub use tcp::{connect, TcpAcceptor};
