//! Type-safe identifier for relayed connections.
//!
//! Connection ids are non-negative integers, unique and strictly increasing
//! for the lifetime of a listening session. They are allocated by the
//! [`ConnectionRegistry`](crate::relay::ConnectionRegistry) and never
//! reused, even after the connection closes.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// ConnectionId
// ============================================================================

/// Identifier of a relayed connection.
///
/// Ids start at 0 per listening session and increase monotonically; a
/// closed connection's id is never revived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a connection id from a raw value.
    ///
    /// Only the registry allocates fresh ids; this constructor exists for
    /// lookups parsed out of Control API paths and for tests.
    #[inline]
    #[must_use]
    pub const fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ConnectionId::from_u64(42).to_string(), "42");
    }

    #[test]
    fn test_parse() {
        let id: ConnectionId = "17".parse().expect("parse should succeed");
        assert_eq!(id, ConnectionId::from_u64(17));
    }

    #[test]
    fn test_parse_rejects_negative() {
        assert!("-1".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(ConnectionId::from_u64(1) < ConnectionId::from_u64(2));
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&ConnectionId::from_u64(5)).unwrap();
        assert_eq!(json, "5");
    }
}
