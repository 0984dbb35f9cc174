//! Identifier: opaque key for a record in a collection.
//!
//! Identifiers double as the external API handle and as the storage-key
//! suffix behind a collection prefix, so the accepted alphabet is kept to
//! characters that are safe in both places.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Longest identifier accepted by [`Identifier::parse`].
pub const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Identifier is empty")]
    Empty,
    #[error("Identifier longer than {MAX_IDENTIFIER_LEN} characters")]
    TooLong,
    #[error("Invalid character {0:?} in identifier")]
    InvalidChar(char),
}

/// An opaque, unique record identifier.
///
/// There is deliberately no `From<String>`: untyped strings only become
/// identifiers through [`Identifier::parse`].
///
/// # Examples
/// ```
/// use media_store::Identifier;
///
/// let id = Identifier::generate();
/// let parsed = Identifier::parse(id.as_str()).unwrap();
/// assert_eq!(id, parsed);
///
/// assert!(Identifier::parse("metadata/escape").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Generate a new random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parse an identifier from an untrusted string.
    ///
    /// Accepts 1 to [`MAX_IDENTIFIER_LEN`] characters from `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        if s.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if s.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdentifierError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Serialized as a bare string; deserialization re-validates.
impl serde::Serialize for Identifier {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Identifier {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_parseable() {
        let id = Identifier::generate();
        assert_eq!(Identifier::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_generate_unique() {
        let a = Identifier::generate();
        let b = Identifier::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_simple() {
        let id: Identifier = "id1".parse().unwrap();
        assert_eq!(id.to_string(), "id1");
    }

    #[test]
    fn test_reject_empty() {
        assert_eq!(Identifier::parse(""), Err(IdentifierError::Empty));
    }

    #[test]
    fn test_reject_too_long() {
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert_eq!(Identifier::parse(&long), Err(IdentifierError::TooLong));
        assert!(Identifier::parse(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn test_reject_key_separators() {
        assert_eq!(
            Identifier::parse("metadata/x"),
            Err(IdentifierError::InvalidChar('/'))
        );
        assert_eq!(
            Identifier::parse("has space"),
            Err(IdentifierError::InvalidChar(' '))
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = Identifier::generate();
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, format!("\"{}\"", original));
        let parsed: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        assert!(serde_json::from_str::<Identifier>("\"../etc\"").is_err());
    }
}
