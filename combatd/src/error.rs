//! Engine error types
//!
//! Every error is scoped to one encounter or combatant. [`ErrorKind`]
//! groups them so the HTTP layer can pick a status code.

use thiserror::Error;

use crate::combat::{CombatantId, ConditionError, DiceError};

/// Broad error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; never silently corrected
    Validation,
    /// Operation not allowed in the current combat state
    InvalidState,
    NotFound,
    /// Optimistic version mismatch; re-read and retry
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Dice(#[from] DiceError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("unknown ability '{0}'")]
    UnknownAbility(String),

    #[error("unknown skill '{0}'")]
    UnknownSkill(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("combatant {0} is not in the turn order")]
    NotInTurnOrder(CombatantId),

    #[error("combatant {0} not found")]
    CombatantNotFound(CombatantId),

    #[error("participant '{0}' not found")]
    ParticipantNotFound(String),

    #[error("encounter '{0}' not found")]
    EncounterNotFound(String),

    #[error("encounter '{0}' already exists")]
    EncounterExists(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        EngineError::InvalidState(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Dice(_)
            | EngineError::Condition(_)
            | EngineError::UnknownAbility(_)
            | EngineError::UnknownSkill(_)
            | EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::InvalidState(_)
            | EngineError::NotInTurnOrder(_)
            | EngineError::EncounterExists(_) => ErrorKind::InvalidState,
            EngineError::CombatantNotFound(_)
            | EngineError::ParticipantNotFound(_)
            | EngineError::EncounterNotFound(_) => ErrorKind::NotFound,
            EngineError::VersionConflict { .. } => ErrorKind::Conflict,
            EngineError::Storage(_) | EngineError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
