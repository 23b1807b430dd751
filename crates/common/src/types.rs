//! Common data types for the leave-vote components.
//!
//! Room and participant identifiers are opaque strings handed to us by the
//! host platform inside the connection credential. They are never generated
//! here, so the newtypes only exist to keep the two from being swapped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one voting session (e.g. a meeting instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap an opaque room identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a participant, meaningful only within one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an opaque participant identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display_raw_value() {
        assert_eq!(RoomId::from("R1").to_string(), "R1");
        assert_eq!(ParticipantId::from("u1").to_string(), "u1");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&RoomId::new("room-42")).unwrap();
        assert_eq!(json, "\"room-42\"");

        let pid: ParticipantId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(pid.as_str(), "alice");
    }

    #[test]
    fn test_is_empty() {
        assert!(RoomId::new("").is_empty());
        assert!(!ParticipantId::new("u1").is_empty());
    }
}
