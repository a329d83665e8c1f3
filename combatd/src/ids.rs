//! Encounter and participant ID validation
//!
//! IDs follow DNS subdomain-style naming:
//! - 3-64 characters
//! - Lowercase alphanumeric and hyphens
//! - Must start and end with alphanumeric
//! - No consecutive hyphens

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::error::EngineError;

/// Why an ID was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Shorter than 3 or longer than 64 characters
    Length,
    /// Characters outside `[a-z0-9-]`, or a leading/trailing hyphen
    InvalidFormat,
    ConsecutiveHyphens,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdError::Length => write!(f, "ID must be 3-64 characters"),
            IdError::InvalidFormat => write!(
                f,
                "ID must be lowercase alphanumeric, may contain hyphens, and must start/end with alphanumeric"
            ),
            IdError::ConsecutiveHyphens => {
                write!(f, "ID cannot contain consecutive hyphens (--)")
            }
        }
    }
}

impl std::error::Error for IdError {}

impl From<IdError> for EngineError {
    fn from(err: IdError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap());

/// Validate an encounter or participant ID, lowercasing it.
///
/// ```
/// use combatd::ids::validate_id;
///
/// assert_eq!(validate_id("Goblin-Ambush").unwrap(), "goblin-ambush");
/// assert!(validate_id("ab").is_err());
/// assert!(validate_id("bad--id").is_err());
/// ```
pub fn validate_id(id: &str) -> Result<String, IdError> {
    let normalized = id.to_lowercase();

    if normalized.len() < 3 || normalized.len() > 64 {
        return Err(IdError::Length);
    }
    if !ID_REGEX.is_match(&normalized) {
        return Err(IdError::InvalidFormat);
    }
    if normalized.contains("--") {
        return Err(IdError::ConsecutiveHyphens);
    }

    Ok(normalized)
}

/// Fresh random ID for callers that do not name their encounter
pub fn generate_id() -> String {
    format!("enc-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert_eq!(validate_id("tavern-brawl").unwrap(), "tavern-brawl");
        assert_eq!(validate_id("Dragon-Lair-2").unwrap(), "dragon-lair-2");
        assert_eq!(validate_id("a1b").unwrap(), "a1b");
        let longest = "x".repeat(64);
        assert_eq!(validate_id(&longest).unwrap(), longest);
    }

    #[test]
    fn test_rejected_ids() {
        assert_eq!(validate_id("ab"), Err(IdError::Length));
        assert_eq!(validate_id(&"x".repeat(65)), Err(IdError::Length));
        assert_eq!(validate_id("-cave"), Err(IdError::InvalidFormat));
        assert_eq!(validate_id("cave-"), Err(IdError::InvalidFormat));
        assert_eq!(validate_id("dark cave"), Err(IdError::InvalidFormat));
        assert_eq!(validate_id("dark_cave"), Err(IdError::InvalidFormat));
        assert_eq!(validate_id("dark--cave"), Err(IdError::ConsecutiveHyphens));
    }

    #[test]
    fn test_generated_ids_validate() {
        let id = generate_id();
        assert_eq!(validate_id(&id).unwrap(), id);
        assert_ne!(generate_id(), id);
    }
}
