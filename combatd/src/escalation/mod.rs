//! Turn-timeout escalation
//!
//! Decides what to do about stalled turns and idle participants:
//! - Nudge: the active combatant's turn has run past the nudge threshold
//! - AutoSkip: the turn has run past the skip threshold; the engine dodges
//!   and advances on the combatant's behalf
//! - FollowParty: a participant idle in exploration follows the party
//! - MarkInactive: a participant idle in any mode goes inactive and, in
//!   combat, leaves the turn order
//!
//! [`evaluate`] is a pure function of `now`; the sweep driver applies
//! the transitions it returns under the encounter lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::combat::{CombatState, CombatantId};

/// Escalation thresholds, in seconds of elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationThresholds {
    /// Combat turn age before the combatant is nudged
    pub nudge_after_secs: u64,
    /// Combat turn age before the turn is skipped
    pub skip_after_secs: u64,
    /// Exploration idle time before a participant follows the party
    pub follow_after_secs: u64,
    /// Idle time in any mode before a participant goes inactive
    pub must_advance_after_secs: u64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            nudge_after_secs: 2 * 3600,
            skip_after_secs: 4 * 3600,
            follow_after_secs: 12 * 3600,
            must_advance_after_secs: 24 * 3600,
        }
    }
}

impl EscalationThresholds {
    /// Thresholds must escalate in order
    pub fn validate(&self) -> Result<(), String> {
        if self.nudge_after_secs > self.skip_after_secs {
            return Err("nudge threshold exceeds skip threshold".to_string());
        }
        if self.follow_after_secs > self.must_advance_after_secs {
            return Err("follow threshold exceeds must-advance threshold".to_string());
        }
        Ok(())
    }
}

/// How far a participant has escalated, least severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    OnTime,
    NudgeDue,
    SkipDue,
    FollowingDue,
    MustAdvance,
}

impl std::fmt::Display for EscalationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationStage::OnTime => write!(f, "on_time"),
            EscalationStage::NudgeDue => write!(f, "nudge_due"),
            EscalationStage::SkipDue => write!(f, "skip_due"),
            EscalationStage::FollowingDue => write!(f, "following_due"),
            EscalationStage::MustAdvance => write!(f, "must_advance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    #[default]
    Active,
    Following,
    Inactive,
}

impl std::str::FromStr for ParticipantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ParticipantStatus::Active),
            "following" => Ok(ParticipantStatus::Following),
            "inactive" => Ok(ParticipantStatus::Inactive),
            _ => Err(format!("Unknown participant status: {}", s)),
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantStatus::Active => write!(f, "active"),
            ParticipantStatus::Following => write!(f, "following"),
            ParticipantStatus::Inactive => write!(f, "inactive"),
        }
    }
}

/// A player taking part in an encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    /// Combatant this participant controls, if any
    #[serde(default)]
    pub combatant_id: Option<CombatantId>,
    pub last_action_at: DateTime<Utc>,
    #[serde(default)]
    pub status: ParticipantStatus,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            combatant_id: None,
            last_action_at: now,
            status: ParticipantStatus::Active,
        }
    }

    pub fn controlling(mut self, combatant: CombatantId) -> Self {
        self.combatant_id = Some(combatant);
        self
    }

    /// Record a real action; any escalation status is reset
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_action_at = now;
        self.status = ParticipantStatus::Active;
    }
}

/// A state change the sweep should apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    Nudge {
        combatant: CombatantId,
        round: u32,
    },
    AutoSkip {
        combatant: CombatantId,
        round: u32,
    },
    FollowParty {
        participant: String,
    },
    MarkInactive {
        participant: String,
        /// Combatant to drop from the turn order
        remove_from_combat: Option<CombatantId>,
    },
}

fn elapsed_secs(now: DateTime<Utc>, since: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_seconds()).unwrap_or(0)
}

/// Stage reached by a turn that has been running for `elapsed` seconds
pub fn turn_stage(elapsed: u64, thresholds: &EscalationThresholds) -> EscalationStage {
    if elapsed > thresholds.skip_after_secs {
        EscalationStage::SkipDue
    } else if elapsed > thresholds.nudge_after_secs {
        EscalationStage::NudgeDue
    } else {
        EscalationStage::OnTime
    }
}

/// Stage reached by a participant idle for `idle` seconds
pub fn idle_stage(idle: u64, in_combat: bool, thresholds: &EscalationThresholds) -> EscalationStage {
    if idle > thresholds.must_advance_after_secs {
        EscalationStage::MustAdvance
    } else if !in_combat && idle > thresholds.follow_after_secs {
        EscalationStage::FollowingDue
    } else {
        EscalationStage::OnTime
    }
}

/// Current escalation stage of one participant
pub fn participant_stage(
    now: DateTime<Utc>,
    combat: &CombatState,
    participant: &Participant,
    thresholds: &EscalationThresholds,
) -> EscalationStage {
    let idle = idle_stage(
        elapsed_secs(now, participant.last_action_at),
        combat.is_active(),
        thresholds,
    );
    let turn = match (combat.current(), combat.turn_started_at()) {
        (Some(current), Some(started)) if participant.combatant_id == Some(current) => {
            turn_stage(elapsed_secs(now, started), thresholds)
        }
        _ => EscalationStage::OnTime,
    };
    idle.max(turn)
}

/// Work out which transitions are due at `now`.
///
/// Repeated calls against unchanged state return only what has not been
/// applied yet: auto-skips are guarded by the round's skip set, nudges by
/// the round's nudge set and idle transitions by participant status.
pub fn evaluate(
    now: DateTime<Utc>,
    combat: &CombatState,
    participants: &[Participant],
    thresholds: &EscalationThresholds,
) -> Vec<Transition> {
    let mut transitions = Vec::new();
    let in_combat = combat.is_active();
    let mut leaving = Vec::new();

    for participant in participants {
        if participant.status == ParticipantStatus::Inactive {
            continue;
        }
        let idle = elapsed_secs(now, participant.last_action_at);
        match idle_stage(idle, in_combat, thresholds) {
            EscalationStage::MustAdvance => {
                let remove_from_combat = participant
                    .combatant_id
                    .filter(|&id| in_combat && combat.contains(id));
                leaving.extend(remove_from_combat);
                transitions.push(Transition::MarkInactive {
                    participant: participant.id.clone(),
                    remove_from_combat,
                });
            }
            EscalationStage::FollowingDue if participant.status == ParticipantStatus::Active => {
                transitions.push(Transition::FollowParty {
                    participant: participant.id.clone(),
                });
            }
            _ => {}
        }
    }

    if let (Some(current), Some(started)) = (combat.current(), combat.turn_started_at()) {
        if !leaving.contains(&current) && !combat.was_auto_skipped(current) {
            let round = combat.round();
            match turn_stage(elapsed_secs(now, started), thresholds) {
                EscalationStage::SkipDue => {
                    transitions.push(Transition::AutoSkip {
                        combatant: current,
                        round,
                    });
                }
                EscalationStage::NudgeDue if !combat.was_nudged(current) => {
                    transitions.push(Transition::Nudge {
                        combatant: current,
                        round,
                    });
                }
                _ => {}
            }
        }
    }

    transitions
}
