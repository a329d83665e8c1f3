//! Narration events
//!
//! Every state change an encounter goes through is described by a
//! [`NarrationEvent`] for the narrative layer to surface. Each encounter
//! keeps the most recent ones in a bounded [`EventLog`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::combat::CombatantId;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CombatStarted,
    TurnAdvanced,
    CombatEnded,
    CombatantJoined,
    CombatantLeft,
    Attack,
    Damage,
    Healing,
    Downed,
    ConditionAdded,
    ConditionRemoved,
    ConcentrationStarted,
    ConcentrationEnded,
    Roll,
    ParticipantJoined,
    Nudge,
    AutoSkip,
    FollowParty,
    Inactive,
}

impl EventKind {
    /// Raised by the escalation sweep rather than by a request
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            EventKind::Nudge | EventKind::AutoSkip | EventKind::FollowParty | EventKind::Inactive
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationEvent {
    /// Position in the encounter's event stream, starting at 1
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combatant: Option<CombatantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    pub message: String,
}

impl NarrationEvent {
    pub fn about(&mut self, combatant: CombatantId) -> &mut Self {
        self.combatant = Some(combatant);
        self
    }

    pub fn for_participant(&mut self, participant: impl Into<String>) -> &mut Self {
        self.participant = Some(participant.into());
        self
    }
}

/// Bounded, ordered event history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    entries: VecDeque<NarrationEvent>,
    capacity: usize,
    last_seq: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            last_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the bound, dropping the oldest entries if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.trim();
    }

    fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Append an event; returns it for further decoration
    pub fn push(
        &mut self,
        at: DateTime<Utc>,
        kind: EventKind,
        message: impl Into<String>,
    ) -> &mut NarrationEvent {
        self.last_seq += 1;
        self.entries.push_back(NarrationEvent {
            seq: self.last_seq,
            at,
            kind,
            combatant: None,
            participant: None,
            message: message.into(),
        });
        self.trim();
        // Capacity is at least one, so the new entry survives the trim
        let index = self.entries.len() - 1;
        &mut self.entries[index]
    }

    /// Sequence number of the newest event, 0 if none yet
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Retained events newer than `seq`, oldest first
    pub fn since(&self, seq: u64) -> Vec<NarrationEvent> {
        self.entries.iter().filter(|e| e.seq > seq).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NarrationEvent> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
