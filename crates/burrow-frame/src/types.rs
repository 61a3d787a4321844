//! Message type tags.
//!
//! Tags are wire-defined and stable. Tag 0 and 9-255 are not assigned.

/// Client login: the services to expose.
pub const SERVICE_REQUEST: u8 = 1;

/// Server login reply: outcome of opening the public listeners.
pub const SERVICE_RESPONSE: u8 = 2;

/// Server → client: a public connection arrived for a service.
pub const CONNECT_REQUEST: u8 = 3;

/// Client → server: the local service was reached.
pub const CONNECT_RESPONSE: u8 = 4;

/// Stream bytes (two-segment body).
pub const DATA: u8 = 5;

/// Either direction: a stream is finished.
pub const CLOSE_REQUEST: u8 = 6;

/// Client → server liveness check.
pub const HEARTBEAT_REQUEST: u8 = 7;

/// Server → client liveness reply.
pub const HEARTBEAT_RESPONSE: u8 = 8;

/// Returns a human-readable name for a message type tag.
pub fn type_name(tag: u8) -> &'static str {
    match tag {
        SERVICE_REQUEST => "SERVICE_REQUEST",
        SERVICE_RESPONSE => "SERVICE_RESPONSE",
        CONNECT_REQUEST => "CONNECT_REQUEST",
        CONNECT_RESPONSE => "CONNECT_RESPONSE",
        DATA => "DATA",
        CLOSE_REQUEST => "CLOSE_REQUEST",
        HEARTBEAT_REQUEST => "HEARTBEAT_REQUEST",
        HEARTBEAT_RESPONSE => "HEARTBEAT_RESPONSE",
        _ => "UNKNOWN",
    }
}

/// Returns true if the tag belongs to the message set.
pub fn is_known(tag: u8) -> bool {
    (SERVICE_REQUEST..=HEARTBEAT_RESPONSE).contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_range() {
        assert!(!is_known(0));
        for tag in 1..=8 {
            assert!(is_known(tag));
            assert_ne!(type_name(tag), "UNKNOWN");
        }
        assert!(!is_known(9));
        assert!(!is_known(42));
        assert_eq!(type_name(42), "UNKNOWN");
    }
}
