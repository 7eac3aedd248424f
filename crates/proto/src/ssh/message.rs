//! SSH protocol message types (RFC 4253).
//!
//! This module defines the message types the connection core handles, with
//! their numeric identifiers from RFC 4253 Section 12.
//!
//! # Example
//!
//! ```rust
//! use skerry_proto::ssh::message::MessageType;
//!
//! let msg_type = MessageType::KexInit;
//! assert_eq!(msg_type as u8, 20);
//! ```

/// SSH message types used by the transport-layer connection core.
///
/// Each message type has a unique numeric identifier used in the binary
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - can be used for padding or keep-alive.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message - debugging information.
    Debug = 4,
    /// Service request - request a service (e.g., "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept - service request accepted.
    ServiceAccept = 6,

    // Algorithm negotiation (20-29)
    /// Key exchange init - algorithm negotiation.
    KexInit = 20,
    /// New keys - signals transition to new keys.
    NewKeys = 21,

    // Key exchange method specific (30-49)
    /// Diffie-Hellman key exchange init.
    KexdhInit = 30,
    /// Diffie-Hellman key exchange reply.
    KexdhReply = 31,

    /// User authentication banner, stored for `get_issue_banner`.
    UserauthBanner = 53,
}

/// Disconnect reason: the application closed the connection (RFC 4253
/// Section 11.1).
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;

impl MessageType {
    /// Converts a byte to a message type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use skerry_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
    /// assert_eq!(MessageType::from_u8(255), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            30 => Some(MessageType::KexdhInit),
            31 => Some(MessageType::KexdhReply),
            53 => Some(MessageType::UserauthBanner),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_codes() {
        assert_eq!(MessageType::Disconnect as u8, 1);
        assert_eq!(MessageType::ServiceRequest as u8, 5);
        assert_eq!(MessageType::ServiceAccept as u8, 6);
        assert_eq!(MessageType::KexInit as u8, 20);
        assert_eq!(MessageType::NewKeys as u8, 21);
        assert_eq!(MessageType::KexdhInit as u8, 30);
        assert_eq!(MessageType::KexdhReply as u8, 31);
    }

    #[test]
    fn test_from_u8_round_trip() {
        for code in [1u8, 2, 3, 4, 5, 6, 20, 21, 30, 31, 53] {
            let msg = MessageType::from_u8(code).unwrap();
            assert_eq!(msg as u8, code);
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(99), None);
    }
}
