//! Session identity
//!
//! The user-entered session id doubles as the publish path segment and as the
//! correlation key for telemetry and recordings.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WhipcastError};

/// Normalized session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Normalize a raw identifier: trim whitespace, then strip leading and
    /// trailing `/`.
    pub fn normalize(raw: &str) -> Result<Self> {
        let normalized = raw.trim().trim_matches('/');
        if normalized.is_empty() {
            return Err(WhipcastError::InvalidSessionId(raw.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = WhipcastError;

    fn from_str(s: &str) -> Result<Self> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = WhipcastError;

    fn try_from(value: String) -> Result<Self> {
        Self::normalize(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_whitespace_and_slashes() {
        assert_eq!(SessionId::normalize("  room-1  ").unwrap().as_str(), "room-1");
        assert_eq!(SessionId::normalize("/room-1/").unwrap().as_str(), "room-1");
        assert_eq!(SessionId::normalize(" //room-1// ").unwrap().as_str(), "room-1");
    }

    #[test]
    fn test_inner_separators_are_kept() {
        assert_eq!(SessionId::normalize("/team/room 2/").unwrap().as_str(), "team/room 2");
    }

    #[test]
    fn test_whitespace_inside_slashes_is_kept() {
        // Trimming happens before slash stripping, once each
        assert_eq!(SessionId::normalize("/ a /").unwrap().as_str(), " a ");
    }

    #[test]
    fn test_empty_is_rejected() {
        assert!(matches!(
            SessionId::normalize("   "),
            Err(WhipcastError::InvalidSessionId(_))
        ));
        assert!(SessionId::normalize("///").is_err());
    }

    #[test]
    fn test_parse() {
        let id: SessionId = "room-1".parse().unwrap();
        assert_eq!(id.to_string(), "room-1");
    }
}
