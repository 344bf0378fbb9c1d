//! Garden Shared Protocol Types
//!
//! This crate provides the wire-level types and codecs shared by the gateway
//! and by anything that speaks the garden system protocol (emulators, tools):
//! the device data model, topic classification, the mesh fragment codec and
//! the command crypto.

pub mod codec;
pub mod crypto;
pub mod model;
pub mod topic;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use model::*;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol limits imposed by the mesh radio and the device firmware
pub mod limits {
    /// Longest plaintext command accepted for any destination
    pub const MAX_COMMAND_LEN: usize = 210;

    /// Largest payload the coordinator will rebroadcast over the mesh
    pub const MESH_PAYLOAD_LIMIT: usize = 212;

    /// Longest command that still fits the mesh once nonce and tag are added
    pub const MAX_ENCRYPTED_COMMAND_LEN: usize =
        MESH_PAYLOAD_LIMIT - crate::crypto::NONCE_LEN - crate::crypto::TAG_LEN;

    /// Radio payload bytes available per fragment after the 6 byte header
    pub const FRAGMENT_CHUNK_LEN: usize = 244;

    /// Size of a full fragment on the radio, header included
    pub const FRAGMENT_WIRE_LEN: usize = 250;

    /// Fragment numbers and totals are single bytes
    pub const MAX_FRAGMENTS: usize = 255;

    /// Reading history kept per device
    pub const MAX_READING_HISTORY: usize = 1440;

    /// Default lifetime of an incomplete fragment buffer
    pub const FRAGMENT_TTL_MS: u64 = 5000;

    /// Default bound on a single outbound publish
    pub const PUBLISH_TIMEOUT_MS: u64 = 2000;
}

/// Identifier that addresses every node on the mesh at once
pub const BROADCAST_ID: &str = "FFFFFFFFFFFF";

/// Check that `id` is a 12 character hexadecimal system identifier
pub fn is_valid_identifier(id: &str) -> bool {
    id.len() == 12 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Check whether `id` is the mesh-wide broadcast identifier.
///
/// Firmware compares the destination byte for byte, so only the upper case
/// form counts.
pub fn is_broadcast(id: &str) -> bool {
    id == BROADCAST_ID
}

/// Format a system identifier as a colon separated MAC address.
///
/// Returns `None` if the identifier is not 12 hex characters.
pub fn identifier_to_address(id: &str) -> Option<String> {
    if !is_valid_identifier(id) {
        return None;
    }

    let octets: Vec<&str> = (0..12).step_by(2).map(|i| &id[i..i + 2]).collect();
    Some(octets.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("84cca8abcdef"));
        assert!(is_valid_identifier("84CCA8ABCDEF"));
        assert!(!is_valid_identifier("84cca8abcde"));
        assert!(!is_valid_identifier("84cca8abcdeg"));
        assert!(!is_valid_identifier("discovery"));
    }

    #[test]
    fn test_identifier_to_address() {
        assert_eq!(
            identifier_to_address("84cca8abcdef").as_deref(),
            Some("84:cc:a8:ab:cd:ef")
        );
        assert_eq!(identifier_to_address("short"), None);
    }

    #[test]
    fn test_broadcast() {
        assert!(is_broadcast("FFFFFFFFFFFF"));
        assert!(!is_broadcast("ffffffffffff"));
        assert!(!is_broadcast("84cca8abcdef"));
    }

    #[test]
    fn test_encrypted_limit() {
        assert_eq!(limits::MAX_ENCRYPTED_COMMAND_LEN, 184);
    }
}
