//! Serializable snapshots of an encounter for collaborators

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Encounter;
use crate::combat::{CombatPhase, Combatant, CombatantId, ConditionList};
use crate::escalation::{participant_stage, EscalationStage, EscalationThresholds, Participant};

/// Turn-order entry as collaborators see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatantSummary {
    pub id: CombatantId,
    pub name: String,
    pub initiative: i32,
    pub hp: i32,
    pub max_hp: i32,
    pub conditions: ConditionList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concentrating_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombatView {
    pub active: bool,
    pub phase: CombatPhase,
    pub round: u32,
    /// Combatants in turn order
    pub combatants: Vec<CombatantSummary>,
    pub current_turn: usize,
    pub current: Option<CombatantId>,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub auto_skipped_ids: Vec<CombatantId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    #[serde(flatten)]
    pub participant: Participant,
    pub stage: EscalationStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncounterView {
    pub id: String,
    pub name: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub combat: CombatView,
    /// Every combatant, in or out of the turn order
    pub roster: Vec<Combatant>,
    pub participants: Vec<ParticipantView>,
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncounterSummary {
    pub id: String,
    pub name: String,
    pub version: u64,
    pub combat_active: bool,
    pub round: u32,
    pub combatants: usize,
}

impl Encounter {
    pub fn combat_view(&self) -> CombatView {
        let combat = self.combat();
        let combatants = combat
            .order()
            .iter()
            .filter_map(|entry| {
                let combatant = self.combatant(entry.combatant).ok()?;
                Some(CombatantSummary {
                    id: combatant.id,
                    name: combatant.name.clone(),
                    initiative: entry.initiative,
                    hp: combatant.hp,
                    max_hp: combatant.max_hp,
                    conditions: combatant.conditions.clone(),
                    concentrating_on: self
                        .concentration()
                        .current(combatant.id)
                        .map(str::to_string),
                })
            })
            .collect();

        CombatView {
            active: combat.is_active(),
            phase: combat.phase(),
            round: combat.round(),
            combatants,
            current_turn: combat.current_turn(),
            current: combat.current(),
            turn_started_at: combat.turn_started_at(),
            auto_skipped_ids: combat.auto_skipped_ids().iter().copied().collect(),
        }
    }

    /// Full snapshot, with each participant's escalation stage at `now`
    pub fn view(&self, now: DateTime<Utc>, thresholds: &EscalationThresholds) -> EncounterView {
        EncounterView {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            combat: self.combat_view(),
            roster: self.combatants().cloned().collect(),
            participants: self
                .participants()
                .iter()
                .map(|p| ParticipantView {
                    participant: p.clone(),
                    stage: participant_stage(now, self.combat(), p, thresholds),
                })
                .collect(),
        }
    }

    pub fn summary(&self) -> EncounterSummary {
        EncounterSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version,
            combat_active: self.combat().is_active(),
            round: self.combat().round(),
            combatants: self.combatants().count(),
        }
    }
}
