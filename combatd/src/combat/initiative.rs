//! Initiative and turn order
//!
//! `CombatState` is the encounter-scoped turn-order state machine:
//!
//! ```text
//! NotStarted --start--> Active --end / last combatant removed--> Ended
//!                        |  ^
//!                        +--+  advance / insert / remove
//! ```
//!
//! Order is descending initiative, then higher DEX modifier, then the
//! order combatants entered. Entries only reference combatants; the
//! combatants themselves (HP, conditions) live in the encounter roster
//! and outlive the turn order.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dice::{DiceRoll, RollResult, Roller};
use super::CombatantId;
use crate::error::{EngineError, EngineResult};

/// Turn-order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatPhase {
    #[default]
    NotStarted,
    Active,
    Ended,
}

/// Roll initiative: 1d20 + DEX modifier
pub fn roll_initiative<R: Roller + ?Sized>(roller: &mut R, dex_modifier: i32) -> RollResult {
    DiceRoll {
        count: 1,
        sides: 20,
        modifier: dex_modifier,
    }
    .roll(roller)
}

/// A combatant's slot in the turn order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub combatant: CombatantId,
    pub initiative: i32,
    pub dex_modifier: i32,
    /// Entry sequence, kept for stable tie-breaking
    #[serde(default)]
    seq: u64,
}

impl InitiativeEntry {
    pub fn new(combatant: CombatantId, initiative: i32, dex_modifier: i32) -> Self {
        Self {
            combatant,
            initiative,
            dex_modifier,
            seq: 0,
        }
    }

    /// Descending initiative, then descending DEX, then entry order
    fn turn_cmp(&self, other: &Self) -> Ordering {
        other
            .initiative
            .cmp(&self.initiative)
            .then(other.dex_modifier.cmp(&self.dex_modifier))
            .then(self.seq.cmp(&other.seq))
    }
}

/// Result of advancing the turn pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnChange {
    pub previous: CombatantId,
    pub current: CombatantId,
    pub round: u32,
    pub new_round: bool,
}

/// Result of removing a combatant from the order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub removed: CombatantId,
    /// The removed combatant was the one acting
    pub was_current: bool,
    /// Who acts now; None once combat has ended
    pub current: Option<CombatantId>,
    pub new_round: bool,
    /// Removing the last combatant ended combat
    pub ended: bool,
}

/// Encounter-scoped turn order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatState {
    phase: CombatPhase,
    order: Vec<InitiativeEntry>,
    current_turn: usize,
    round: u32,
    turn_started_at: Option<DateTime<Utc>>,
    /// Combatants already auto-skipped this round
    auto_skipped_ids: BTreeSet<CombatantId>,
    /// Combatants already nudged this round
    #[serde(default)]
    nudged_ids: BTreeSet<CombatantId>,
    #[serde(default)]
    next_seq: u64,
}

impl CombatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> CombatPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == CombatPhase::Active
    }

    pub fn order(&self) -> &[InitiativeEntry] {
        &self.order
    }

    /// Combatant IDs in turn order
    pub fn order_ids(&self) -> Vec<CombatantId> {
        self.order.iter().map(|e| e.combatant).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: CombatantId) -> bool {
        self.position(id).is_some()
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn turn_started_at(&self) -> Option<DateTime<Utc>> {
        self.turn_started_at
    }

    /// The combatant whose turn it is
    pub fn current(&self) -> Option<CombatantId> {
        if !self.is_active() {
            return None;
        }
        self.order.get(self.current_turn).map(|e| e.combatant)
    }

    pub fn auto_skipped_ids(&self) -> &BTreeSet<CombatantId> {
        &self.auto_skipped_ids
    }

    pub fn was_auto_skipped(&self, id: CombatantId) -> bool {
        self.auto_skipped_ids.contains(&id)
    }

    pub fn mark_auto_skipped(&mut self, id: CombatantId) {
        self.auto_skipped_ids.insert(id);
    }

    pub fn was_nudged(&self, id: CombatantId) -> bool {
        self.nudged_ids.contains(&id)
    }

    pub fn mark_nudged(&mut self, id: CombatantId) {
        self.nudged_ids.insert(id);
    }

    fn position(&self, id: CombatantId) -> Option<usize> {
        self.order.iter().position(|e| e.combatant == id)
    }

    fn require_active(&self, action: &str) -> EngineResult<()> {
        match self.phase {
            CombatPhase::Active => Ok(()),
            CombatPhase::NotStarted => Err(EngineError::invalid_state(format!(
                "cannot {}: combat has not started",
                action
            ))),
            CombatPhase::Ended => Err(EngineError::invalid_state(format!(
                "cannot {}: combat has ended",
                action
            ))),
        }
    }

    fn begin_round(&mut self) {
        self.round += 1;
        self.auto_skipped_ids.clear();
        self.nudged_ids.clear();
    }

    /// Start combat with already-rolled entrants, listed in entry order
    pub fn start(&mut self, entrants: Vec<InitiativeEntry>, now: DateTime<Utc>) -> EngineResult<()> {
        if self.is_active() {
            return Err(EngineError::invalid_state("combat is already active"));
        }
        if entrants.is_empty() {
            return Err(EngineError::invalid_state(
                "cannot start combat without combatants",
            ));
        }

        let mut seen = BTreeSet::new();
        let mut seq = self.next_seq;
        let mut order = Vec::with_capacity(entrants.len());
        for mut entry in entrants {
            if !seen.insert(entry.combatant) {
                return Err(EngineError::Validation(format!(
                    "combatant {} entered twice",
                    entry.combatant
                )));
            }
            entry.seq = seq;
            seq += 1;
            order.push(entry);
        }
        order.sort_by(InitiativeEntry::turn_cmp);

        *self = CombatState {
            phase: CombatPhase::Active,
            order,
            current_turn: 0,
            round: 1,
            turn_started_at: Some(now),
            auto_skipped_ids: BTreeSet::new(),
            nudged_ids: BTreeSet::new(),
            next_seq: seq,
        };
        debug!(order = ?self.order_ids(), "combat started");
        Ok(())
    }

    /// Move to the next combatant, wrapping into a new round
    pub fn advance(&mut self, now: DateTime<Utc>) -> EngineResult<TurnChange> {
        self.require_active("advance turn")?;
        // Active combat always has at least one entry
        let previous = self.order[self.current_turn].combatant;

        self.current_turn = (self.current_turn + 1) % self.order.len();
        let new_round = self.current_turn == 0;
        if new_round {
            self.begin_round();
        }
        self.turn_started_at = Some(now);

        Ok(TurnChange {
            previous,
            current: self.order[self.current_turn].combatant,
            round: self.round,
            new_round,
        })
    }

    /// Add a combatant mid-combat, keeping the sort order and the
    /// current actor. Returns the new entry's index.
    pub fn insert(&mut self, mut entry: InitiativeEntry) -> EngineResult<usize> {
        self.require_active("add combatant")?;
        if self.contains(entry.combatant) {
            return Err(EngineError::invalid_state(format!(
                "combatant {} is already in the turn order",
                entry.combatant
            )));
        }
        entry.seq = self.next_seq;
        self.next_seq += 1;

        let index = self
            .order
            .iter()
            .position(|existing| entry.turn_cmp(existing) == Ordering::Less)
            .unwrap_or(self.order.len());
        self.order.insert(index, entry);
        if index <= self.current_turn {
            self.current_turn += 1;
        }
        Ok(index)
    }

    /// Remove a combatant, keeping the pointer on the same actor, or on the
    /// next one if the actor itself was removed
    pub fn remove(&mut self, id: CombatantId, now: DateTime<Utc>) -> EngineResult<Removal> {
        self.require_active("remove combatant")?;
        let index = self.position(id).ok_or(EngineError::NotInTurnOrder(id))?;

        let was_current = index == self.current_turn;
        self.order.remove(index);
        self.auto_skipped_ids.remove(&id);
        self.nudged_ids.remove(&id);

        if self.order.is_empty() {
            self.clear();
            return Ok(Removal {
                removed: id,
                was_current,
                current: None,
                new_round: false,
                ended: true,
            });
        }

        let mut new_round = false;
        if index < self.current_turn {
            self.current_turn -= 1;
        } else if was_current {
            if self.current_turn >= self.order.len() {
                self.current_turn = 0;
                self.begin_round();
                new_round = true;
            }
            self.turn_started_at = Some(now);
        }

        Ok(Removal {
            removed: id,
            was_current,
            current: self.current(),
            new_round,
            ended: false,
        })
    }

    /// End combat, clearing turn-order bookkeeping
    pub fn end(&mut self) -> EngineResult<()> {
        self.require_active("end combat")?;
        self.clear();
        Ok(())
    }

    fn clear(&mut self) {
        self.phase = CombatPhase::Ended;
        self.order.clear();
        self.current_turn = 0;
        self.turn_started_at = None;
        self.auto_skipped_ids.clear();
        self.nudged_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::dice::FixedRoller;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn started(entries: &[(CombatantId, i32, i32)]) -> CombatState {
        let mut state = CombatState::new();
        state
            .start(
                entries
                    .iter()
                    .map(|&(id, init, dex)| InitiativeEntry::new(id, init, dex))
                    .collect(),
                now(),
            )
            .unwrap();
        state
    }

    #[test]
    fn test_sort_descending_with_tie_breaks() {
        let state = started(&[(1, 12, 1), (2, 18, 0), (3, 12, 3), (4, 12, 1), (5, 5, 4)]);
        // 3 beats 1 and 4 on DEX; 1 beats 4 on entry order
        assert_eq!(state.order_ids(), vec![2, 3, 1, 4, 5]);
        assert_eq!(state.current(), Some(2));
        assert_eq!(state.round(), 1);
        assert_eq!(state.turn_started_at(), Some(now()));
    }

    #[test]
    fn test_roll_initiative_adds_dex() {
        let mut roller = FixedRoller::new([14]);
        let roll = roll_initiative(&mut roller, 3);
        assert_eq!(roll.total(), 17);
        assert_eq!(roll.expression(), "1d20+3");
    }

    #[test]
    fn test_advance_wraps_once_per_cycle() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0), (3, 10, 0)]);
        state.advance(now()).unwrap();
        let start_index = state.current_turn();
        let start_round = state.round();

        let mut wraps = 0;
        for step in 1..=3 {
            let change = state.advance(now() + Duration::minutes(step)).unwrap();
            if change.new_round {
                wraps += 1;
            }
        }
        assert_eq!(state.current_turn(), start_index);
        assert_eq!(state.round(), start_round + 1);
        assert_eq!(wraps, 1);
        assert_eq!(state.turn_started_at(), Some(now() + Duration::minutes(3)));
    }

    #[test]
    fn test_new_round_clears_skip_and_nudge_marks() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0)]);
        state.mark_auto_skipped(1);
        state.mark_nudged(1);
        state.advance(now()).unwrap();
        assert!(state.was_auto_skipped(1));
        let change = state.advance(now()).unwrap();
        assert!(change.new_round);
        assert!(!state.was_auto_skipped(1));
        assert!(!state.was_nudged(1));
    }

    #[test]
    fn test_advance_requires_active() {
        let mut state = CombatState::new();
        let err = state.advance(now()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let mut state = started(&[(1, 10, 0)]);
        state.end().unwrap();
        assert!(state.advance(now()).is_err());
        assert!(state.end().is_err());
        assert_eq!(state.phase(), CombatPhase::Ended);
    }

    #[test]
    fn test_start_rejects_empty_and_duplicates() {
        let mut state = CombatState::new();
        assert!(state.start(vec![], now()).is_err());
        let dupes = vec![InitiativeEntry::new(1, 10, 0), InitiativeEntry::new(1, 12, 0)];
        assert!(matches!(
            state.start(dupes, now()),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(state.phase(), CombatPhase::NotStarted);
    }

    #[test]
    fn test_insert_before_current_keeps_actor() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0), (3, 10, 0)]);
        state.advance(now()).unwrap();
        assert_eq!(state.current(), Some(2));

        let index = state.insert(InitiativeEntry::new(4, 18, 0)).unwrap();
        assert_eq!(index, 1);
        assert_eq!(state.order_ids(), vec![1, 4, 2, 3]);
        assert_eq!(state.current(), Some(2));

        // After current: pointer unchanged
        let index = state.insert(InitiativeEntry::new(5, 1, 0)).unwrap();
        assert_eq!(index, 4);
        assert_eq!(state.current(), Some(2));
    }

    #[test]
    fn test_insert_ties_go_after_existing() {
        let mut state = started(&[(1, 15, 2), (2, 10, 0)]);
        state.insert(InitiativeEntry::new(3, 15, 2)).unwrap();
        assert_eq!(state.order_ids(), vec![1, 3, 2]);
        assert!(state.insert(InitiativeEntry::new(3, 1, 0)).is_err());
    }

    #[test]
    fn test_remove_before_current() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0), (3, 10, 0)]);
        state.advance(now()).unwrap();
        state.advance(now()).unwrap();
        assert_eq!(state.current(), Some(3));

        let removal = state.remove(1, now()).unwrap();
        assert!(!removal.was_current);
        assert_eq!(state.current(), Some(3));
        assert_eq!(state.current_turn(), 1);
    }

    #[test]
    fn test_remove_current_moves_to_next() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0), (3, 10, 0), (4, 5, 0)]);
        state.advance(now()).unwrap();
        let later = now() + Duration::minutes(10);

        let removal = state.remove(2, later).unwrap();
        assert!(removal.was_current);
        assert_eq!(removal.current, Some(3));
        assert_eq!(state.len(), 3);
        assert_eq!(state.turn_started_at(), Some(later));
    }

    #[test]
    fn test_remove_current_last_wraps_to_new_round() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0)]);
        state.advance(now()).unwrap();
        let removal = state.remove(2, now()).unwrap();
        assert!(removal.new_round);
        assert_eq!(state.current(), Some(1));
        assert_eq!(state.round(), 2);
    }

    #[test]
    fn test_remove_last_ends_combat() {
        let mut state = started(&[(1, 20, 0)]);
        let removal = state.remove(1, now()).unwrap();
        assert!(removal.ended);
        assert_eq!(state.phase(), CombatPhase::Ended);
        assert!(state.is_empty());
        assert_eq!(state.current(), None);
    }

    #[test]
    fn test_remove_missing_is_state_error() {
        let mut state = started(&[(1, 20, 0)]);
        assert!(matches!(
            state.remove(9, now()),
            Err(EngineError::NotInTurnOrder(9))
        ));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut state = started(&[(1, 20, 0), (2, 15, 0)]);
        state.mark_auto_skipped(2);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["auto_skipped_ids"], serde_json::json!([2]));
        let back: CombatState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
