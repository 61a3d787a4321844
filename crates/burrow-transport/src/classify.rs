//! Socket error classification.
//!
//! A tunnel sees a steady stream of ordinary socket failures: peers hang up,
//! local services refuse connections, idle links time out. These are
//! "expected" and only worth a debug line. Anything else is logged louder.
//! The classification never drives control flow.

use std::io::{self, ErrorKind};

/// Returns true if the error is one of the routine network failures.
pub fn is_expected(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::AddrInUse
    )
}
