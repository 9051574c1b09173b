//! Totem identity and name normalization.
//!
//! # Invariants
//! - A `TotemName` is trimmed, lowercase and non-empty.
//! - Display form is always the uppercase name.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Words that route to a subcommand and therefore cannot name a totem.
pub const RESERVED_NAMES: &[&str] = &[
    "add", "join", "yield", "release", "kick", "evict", "create", "destroy", "list", "info",
    "help",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TotemNameError {
    /// Name is empty after trimming.
    Empty,
    /// Name collides with a command keyword.
    Reserved(String),
}

impl Display for TotemNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "totem name must not be blank"),
            Self::Reserved(name) => write!(f, "totem name `{name}` is a reserved word"),
        }
    }
}

impl Error for TotemNameError {}

/// Canonical (trimmed, lowercase) totem name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TotemName(String);

impl TotemName {
    /// Normalizes raw user input into a canonical name.
    ///
    /// Reserved words are accepted here; only creation rejects them, see
    /// [`TotemName::ensure_not_reserved`].
    pub fn parse(raw: &str) -> Result<Self, TotemNameError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(TotemNameError::Empty);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reserved(&self) -> bool {
        RESERVED_NAMES.contains(&self.0.as_str())
    }

    pub fn ensure_not_reserved(&self) -> Result<(), TotemNameError> {
        if self.is_reserved() {
            return Err(TotemNameError::Reserved(self.0.clone()));
        }
        Ok(())
    }
}

impl Display for TotemName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_uppercase())
    }
}

impl TryFrom<String> for TotemName {
    type Error = TotemNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TotemName> for String {
    fn from(value: TotemName) -> Self {
        value.0
    }
}

/// A registered totem as read from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totem {
    pub name: TotemName,
    /// Registry membership at read time. Callers must re-check before acting.
    pub exists: bool,
}

#[cfg(test)]
mod tests {
    use super::{TotemName, TotemNameError};

    #[test]
    fn parse_trims_and_lowercases() {
        let name = TotemName::parse("  Deploy-Lock ").unwrap();
        assert_eq!(name.as_str(), "deploy-lock");
        assert_eq!(name.to_string(), "DEPLOY-LOCK");
    }

    #[test]
    fn parse_rejects_blank() {
        assert_eq!(TotemName::parse("   "), Err(TotemNameError::Empty));
        assert_eq!(TotemName::parse(""), Err(TotemNameError::Empty));
    }

    #[test]
    fn reserved_words_are_detected_after_normalization() {
        let name = TotemName::parse(" KICK ").unwrap();
        assert!(name.is_reserved());
        assert_eq!(
            name.ensure_not_reserved(),
            Err(TotemNameError::Reserved("kick".to_string()))
        );
        assert!(TotemName::parse("staging").unwrap().ensure_not_reserved().is_ok());
    }
}
