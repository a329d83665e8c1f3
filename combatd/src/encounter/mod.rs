//! Encounters
//!
//! An [`Encounter`] owns everything that changes together during a fight:
//! - The roster of combatants (HP, conditions, initiative)
//! - The turn order ([`CombatState`])
//! - Concentration per caster
//! - The players taking part and when they last acted
//! - A bounded narration log
//!
//! Each operation either succeeds completely or returns an error. The
//! [`EncounterRegistry`] runs operations on a copy and commits it only on
//! success, so a failed operation never leaves partial changes behind.

mod events;
mod registry;
mod view;

pub use events::{EventKind, EventLog, NarrationEvent, DEFAULT_EVENT_CAPACITY};
pub use registry::{EncounterEvent, EncounterRegistry, RollerFactory};
pub use view::{CombatView, CombatantSummary, EncounterSummary, EncounterView, ParticipantView};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::combat::{
    check_modifier, resolve_attack, resolve_check, resolve_contested_check, resolve_saving_throw, roll_initiative,
    Ability, AbilityScores, AdvantageMode, Attack, AttackOutcome, CheckOutcome, CombatState,
    Combatant, CombatantId, CombatantKind, Condition, ConditionKind, ConditionList,
    ConcentrationTracker, ContestOutcome, ContestSide, Contestant, InitiativeEntry, Removal,
    DiceRoll, Roller, SaveOutcome, Skill, TurnChange, MAX_MODIFIER,
};
use crate::error::{EngineError, EngineResult};
use crate::escalation::{self, EscalationThresholds, Participant, ParticipantStatus, Transition};
use crate::ids::validate_id;

/// Highest ability score a combatant may have
const MAX_ABILITY_SCORE: i32 = 30;

/// A combatant joining an encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCombatant {
    pub name: String,
    #[serde(default)]
    pub kind: CombatantKind,
    pub max_hp: i32,
    /// Starting HP; defaults to `max_hp`
    #[serde(default)]
    pub hp: Option<i32>,
    pub armor_class: i32,
    #[serde(default)]
    pub abilities: AbilityScores,
    #[serde(default)]
    pub conditions: ConditionList,
    /// Pre-rolled initiative; rolled on entry to combat when absent
    #[serde(default)]
    pub initiative: Option<i32>,
}

impl NewCombatant {
    pub fn new(name: impl Into<String>, max_hp: i32, armor_class: i32) -> Self {
        Self {
            name: name.into(),
            kind: CombatantKind::Character,
            max_hp,
            hp: None,
            armor_class,
            abilities: AbilityScores::default(),
            conditions: ConditionList::new(),
            initiative: None,
        }
    }

    pub fn monster(mut self) -> Self {
        self.kind = CombatantKind::Monster;
        self
    }

    pub fn with_abilities(mut self, abilities: AbilityScores) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn with_initiative(mut self, initiative: i32) -> Self {
        self.initiative = Some(initiative);
        self
    }

    fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation("combatant name is empty".into()));
        }
        if self.max_hp < 1 {
            return Err(EngineError::Validation(format!(
                "max_hp must be at least 1, got {}",
                self.max_hp
            )));
        }
        if let Some(hp) = self.hp {
            if hp < 0 || hp > self.max_hp {
                return Err(EngineError::Validation(format!(
                    "hp must be between 0 and {}, got {}",
                    self.max_hp, hp
                )));
            }
        }
        if !(0..=MAX_MODIFIER).contains(&self.armor_class) {
            return Err(EngineError::Validation(format!(
                "armor_class must be between 0 and {}, got {}",
                MAX_MODIFIER, self.armor_class
            )));
        }
        if let Some(initiative) = self.initiative {
            if !(-MAX_MODIFIER..=MAX_MODIFIER).contains(&initiative) {
                return Err(EngineError::Validation(format!(
                    "initiative must be within -{0}..={0}, got {1}",
                    MAX_MODIFIER, initiative
                )));
            }
        }
        for &ability in Ability::all() {
            let score = self.abilities.score(ability);
            if !(1..=MAX_ABILITY_SCORE).contains(&score) {
                return Err(EngineError::Validation(format!(
                    "{} score must be between 1 and {}, got {}",
                    ability, MAX_ABILITY_SCORE, score
                )));
            }
        }
        Ok(())
    }
}

/// What a check or contest rolls: a skill, or a bare ability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSubject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability: Option<String>,
}

impl CheckSubject {
    pub fn skill(name: impl Into<String>) -> Self {
        Self {
            skill: Some(name.into()),
            ability: None,
        }
    }

    pub fn ability(name: impl Into<String>) -> Self {
        Self {
            skill: None,
            ability: Some(name.into()),
        }
    }

    /// The ability whose modifier applies
    pub fn resolve(&self) -> EngineResult<Ability> {
        match (&self.skill, &self.ability) {
            (Some(skill), None) => skill
                .parse::<Skill>()
                .map(|s| s.ability())
                .map_err(|_| EngineError::UnknownSkill(skill.clone())),
            (None, Some(ability)) => parse_ability(ability),
            _ => Err(EngineError::Validation(
                "give exactly one of skill or ability".into(),
            )),
        }
    }
}

fn parse_ability(name: &str) -> EngineResult<Ability> {
    name.parse::<Ability>()
        .map_err(|_| EngineError::UnknownAbility(name.to_string()))
}

fn check_dc(dc: i32) -> EngineResult<()> {
    if (0..=MAX_MODIFIER).contains(&dc) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "dc must be between 0 and {}, got {}",
            MAX_MODIFIER, dc
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRequest {
    pub attacker: CombatantId,
    pub target: CombatantId,
    #[serde(flatten)]
    pub attack: Attack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub combatant: CombatantId,
    #[serde(flatten)]
    pub subject: CheckSubject,
    pub dc: i32,
    #[serde(default)]
    pub mode: AdvantageMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub combatant: CombatantId,
    pub ability: String,
    pub dc: i32,
    #[serde(default)]
    pub mode: AdvantageMode,
}

/// One side of a contest request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestSideRequest {
    pub combatant: CombatantId,
    #[serde(flatten)]
    pub subject: CheckSubject,
    #[serde(default)]
    pub mode: AdvantageMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestRequest {
    pub actor: ContestSideRequest,
    pub target: ContestSideRequest,
}

/// Concentration save forced by damage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcentrationReport {
    pub effect: String,
    pub dc: i32,
    /// None when the combatant dropped and lost concentration outright
    pub save: Option<SaveOutcome>,
    pub maintained: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageReport {
    pub combatant: CombatantId,
    pub amount: i32,
    /// HP actually lost
    pub lost: i32,
    pub hp: i32,
    /// Dropped to 0 HP with this hit
    pub downed: bool,
    pub concentration: Option<ConcentrationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackReport {
    pub attacker: CombatantId,
    pub target: CombatantId,
    pub outcome: AttackOutcome,
    pub damage: Option<DamageReport>,
}

/// Encounter aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
    pub name: String,
    /// Bumped on every committed change
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    roster: BTreeMap<CombatantId, Combatant>,
    next_combatant_id: CombatantId,
    combat: CombatState,
    concentration: ConcentrationTracker,
    participants: Vec<Participant>,
    events: EventLog,
}

impl Encounter {
    /// Create an empty encounter; `id` must be a valid encounter id
    pub fn new(id: &str, name: impl Into<String>, now: DateTime<Utc>) -> EngineResult<Self> {
        let id = validate_id(id)?;
        let name = name.into();
        Ok(Self {
            name: if name.trim().is_empty() { id.clone() } else { name },
            id,
            version: 0,
            created_at: now,
            updated_at: now,
            roster: BTreeMap::new(),
            next_combatant_id: 1,
            combat: CombatState::new(),
            concentration: ConcentrationTracker::new(),
            participants: Vec::new(),
            events: EventLog::default(),
        })
    }

    pub fn combat(&self) -> &CombatState {
        &self.combat
    }

    pub fn concentration(&self) -> &ConcentrationTracker {
        &self.concentration
    }

    pub fn combatant(&self, id: CombatantId) -> EngineResult<&Combatant> {
        self.roster.get(&id).ok_or(EngineError::CombatantNotFound(id))
    }

    fn combatant_mut(&mut self, id: CombatantId) -> EngineResult<&mut Combatant> {
        self.roster
            .get_mut(&id)
            .ok_or(EngineError::CombatantNotFound(id))
    }

    pub fn combatants(&self) -> impl Iterator<Item = &Combatant> {
        self.roster.values()
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> EngineResult<&Participant> {
        self.participants
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::ParticipantNotFound(id.to_string()))
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    fn name_of(&self, id: CombatantId) -> String {
        self.roster
            .get(&id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("combatant {}", id))
    }

    fn controller_of(&self, id: CombatantId) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.combatant_id == Some(id))
    }

    /// A combatant acted; its player is no longer idle
    fn touch_controller(&mut self, id: CombatantId, now: DateTime<Utc>) {
        if let Some(index) = self.controller_of(id) {
            self.participants[index].touch(now);
        }
    }

    // ---- Roster ----

    /// Add a combatant. During combat it rolls initiative (unless given)
    /// and joins the turn order without disturbing the current actor.
    pub fn add_combatant<R: Roller + ?Sized>(
        &mut self,
        new: NewCombatant,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<Combatant> {
        new.validate()?;

        let id = self.next_combatant_id;
        let mut combatant = Combatant::new(id, new.name, new.max_hp, new.armor_class)
            .with_kind(new.kind)
            .with_abilities(new.abilities);
        combatant.hp = new.hp.unwrap_or(new.max_hp);
        combatant.conditions = new.conditions;
        combatant.initiative = new.initiative;

        if self.combat.is_active() {
            let initiative = match combatant.initiative {
                Some(value) => value,
                None => roll_initiative(roller, combatant.dex_modifier()).total(),
            };
            combatant.initiative = Some(initiative);
            self.combat.insert(InitiativeEntry::new(
                id,
                initiative,
                combatant.dex_modifier(),
            ))?;
            debug!(encounter = %self.id, combatant = id, initiative, "combatant joined combat");
        }

        self.next_combatant_id += 1;
        let message = match combatant.initiative.filter(|_| self.combat.is_active()) {
            Some(init) => format!("{} joins the fight (initiative {})", combatant.name, init),
            None => format!("{} joins the encounter", combatant.name),
        };
        self.events
            .push(now, EventKind::CombatantJoined, message)
            .about(id);
        self.roster.insert(id, combatant.clone());
        Ok(combatant)
    }

    /// Remove a combatant from the encounter entirely
    pub fn remove_combatant(
        &mut self,
        id: CombatantId,
        now: DateTime<Utc>,
    ) -> EngineResult<Combatant> {
        self.combatant(id)?;
        if self.combat.contains(id) {
            self.leave_turn_order(id, now)?;
        }
        self.concentration.end(id);
        for participant in self.participants.iter_mut() {
            if participant.combatant_id == Some(id) {
                participant.combatant_id = None;
            }
        }
        let combatant = self
            .roster
            .remove(&id)
            .ok_or(EngineError::CombatantNotFound(id))?;
        self.events
            .push(
                now,
                EventKind::CombatantLeft,
                format!("{} leaves the encounter", combatant.name),
            )
            .about(id);
        Ok(combatant)
    }

    // ---- Turn order ----

    /// Start combat. Everyone without an initiative rolls 1d20 + DEX.
    pub fn start_combat<R: Roller + ?Sized>(
        &mut self,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<&CombatState> {
        if self.combat.is_active() {
            return Err(EngineError::invalid_state("combat is already active"));
        }
        if self.roster.is_empty() {
            return Err(EngineError::invalid_state(
                "cannot start combat without combatants",
            ));
        }

        let mut entrants = Vec::with_capacity(self.roster.len());
        for combatant in self.roster.values_mut() {
            let initiative = match combatant.initiative {
                Some(value) => value,
                None => roll_initiative(roller, combatant.dex_modifier()).total(),
            };
            combatant.initiative = Some(initiative);
            entrants.push(InitiativeEntry::new(
                combatant.id,
                initiative,
                combatant.dex_modifier(),
            ));
        }
        self.combat.start(entrants, now)?;

        let order: Vec<String> = self
            .combat
            .order()
            .iter()
            .map(|e| format!("{} ({})", self.name_of(e.combatant), e.initiative))
            .collect();
        info!(encounter = %self.id, combatants = order.len(), "combat started");
        self.events.push(
            now,
            EventKind::CombatStarted,
            format!("Roll for initiative! Order: {}", order.join(", ")),
        );
        if let Some(first) = self.combat.current() {
            self.begin_turn(first, now);
        }
        Ok(&self.combat)
    }

    /// Hand the turn to the next combatant
    pub fn advance_turn(&mut self, now: DateTime<Utc>) -> EngineResult<TurnChange> {
        let change = self.combat.advance(now)?;
        debug!(
            encounter = %self.id,
            previous = change.previous,
            current = change.current,
            round = change.round,
            "turn advanced"
        );
        if change.new_round {
            self.events.push(
                now,
                EventKind::TurnAdvanced,
                format!("Round {} begins", change.round),
            );
        }
        self.begin_turn(change.current, now);
        Ok(change)
    }

    /// End combat. Conditions stay; initiative is cleared for the next fight.
    pub fn end_combat(&mut self, now: DateTime<Utc>) -> EngineResult<()> {
        self.combat.end()?;
        for combatant in self.roster.values_mut() {
            combatant.initiative = None;
        }
        info!(encounter = %self.id, "combat ended");
        self.events
            .push(now, EventKind::CombatEnded, "Combat is over");
        Ok(())
    }

    fn begin_turn(&mut self, id: CombatantId, now: DateTime<Utc>) {
        // A dodge lasts until the start of the dodger's next turn
        if let Some(combatant) = self.roster.get_mut(&id) {
            combatant.conditions.remove(ConditionKind::Dodging);
        }
        let message = format!("It is {}'s turn", self.name_of(id));
        self.events
            .push(now, EventKind::TurnAdvanced, message)
            .about(id);
    }

    fn leave_turn_order(&mut self, id: CombatantId, now: DateTime<Utc>) -> EngineResult<Removal> {
        let removal = self.combat.remove(id, now)?;
        if let Some(combatant) = self.roster.get_mut(&id) {
            combatant.initiative = None;
        }
        debug!(encounter = %self.id, combatant = id, ended = removal.ended, "combatant left turn order");

        if removal.ended {
            for combatant in self.roster.values_mut() {
                combatant.initiative = None;
            }
            info!(encounter = %self.id, "combat ended: no combatants left");
            self.events.push(
                now,
                EventKind::CombatEnded,
                "Combat is over: nobody is left standing in the order",
            );
        } else if removal.was_current {
            if removal.new_round {
                self.events.push(
                    now,
                    EventKind::TurnAdvanced,
                    format!("Round {} begins", self.combat.round()),
                );
            }
            if let Some(next) = removal.current {
                self.begin_turn(next, now);
            }
        }
        Ok(removal)
    }

    // ---- Conditions ----

    /// Add or update a condition. Incapacitating conditions end
    /// concentration. Returns true if the tag was new.
    pub fn add_condition(
        &mut self,
        id: CombatantId,
        condition: Condition,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let combatant = self.combatant_mut(id)?;
        let added = combatant.conditions.add(condition);
        let name = combatant.name.clone();

        self.events
            .push(
                now,
                EventKind::ConditionAdded,
                format!("{} is {}", name, condition),
            )
            .about(id);
        if condition.kind().incapacitates() {
            self.drop_concentration(id, now);
        }
        Ok(added)
    }

    /// Remove a condition. Returns false if the combatant did not have it.
    pub fn remove_condition(
        &mut self,
        id: CombatantId,
        kind: ConditionKind,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let combatant = self.combatant_mut(id)?;
        let removed = combatant.conditions.remove(kind);
        let name = combatant.name.clone();
        if removed {
            self.events
                .push(
                    now,
                    EventKind::ConditionRemoved,
                    format!("{} is no longer {}", name, kind),
                )
                .about(id);
        }
        Ok(removed)
    }

    // ---- Concentration ----

    /// Concentrate on `effect`, ending whatever the combatant held before.
    /// Returns the displaced effect.
    pub fn start_concentration(
        &mut self,
        id: CombatantId,
        effect: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<String>> {
        let effect = effect.trim();
        if effect.is_empty() {
            return Err(EngineError::Validation("effect name is empty".into()));
        }
        let combatant = self.combatant(id)?;
        if combatant.conditions.is_incapacitated() {
            return Err(EngineError::invalid_state(format!(
                "{} is incapacitated and cannot concentrate",
                combatant.name
            )));
        }
        let name = combatant.name.clone();

        let displaced = self.concentration.start(id, effect);
        if let Some(old) = &displaced {
            self.events
                .push(
                    now,
                    EventKind::ConcentrationEnded,
                    format!("{} stops concentrating on {}", name, old),
                )
                .about(id);
        }
        self.events
            .push(
                now,
                EventKind::ConcentrationStarted,
                format!("{} concentrates on {}", name, effect),
            )
            .about(id);
        self.touch_controller(id, now);
        Ok(displaced)
    }

    /// Stop concentrating; a no-op if nothing is held
    pub fn end_concentration(
        &mut self,
        id: CombatantId,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<String>> {
        self.combatant(id)?;
        Ok(self.drop_concentration(id, now))
    }

    fn drop_concentration(&mut self, id: CombatantId, now: DateTime<Utc>) -> Option<String> {
        let ended = self.concentration.end(id);
        if let Some(effect) = &ended {
            let message = format!("{} loses concentration on {}", self.name_of(id), effect);
            self.events
                .push(now, EventKind::ConcentrationEnded, message)
                .about(id);
        }
        ended
    }

    // ---- Hit points ----

    /// Apply damage. A concentrating combatant makes a Constitution save
    /// against `max(10, amount / 2)`; dropping to 0 HP knocks the
    /// combatant unconscious and ends concentration outright.
    pub fn apply_damage<R: Roller + ?Sized>(
        &mut self,
        id: CombatantId,
        amount: i32,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<DamageReport> {
        if amount < 0 {
            return Err(EngineError::Validation(format!(
                "damage cannot be negative, got {}",
                amount
            )));
        }
        let combatant = self.combatant_mut(id)?;
        let was_up = !combatant.is_down();
        let lost = combatant.take_damage(amount);
        let hp = combatant.hp;
        let name = combatant.name.clone();
        let downed = was_up && combatant.is_down();

        self.events
            .push(
                now,
                EventKind::Damage,
                format!("{} takes {} damage ({} HP left)", name, amount, hp),
            )
            .about(id);

        let mut concentration = None;
        if downed {
            self.combatant_mut(id)?
                .conditions
                .add(Condition::bare(ConditionKind::Unconscious));
            self.events
                .push(
                    now,
                    EventKind::Downed,
                    format!("{} falls unconscious", name),
                )
                .about(id);
            if let Some(check) = self.concentration.check(id, amount) {
                self.drop_concentration(id, now);
                concentration = Some(ConcentrationReport {
                    effect: check.effect,
                    dc: check.dc,
                    save: None,
                    maintained: false,
                });
            }
        } else if amount > 0 {
            if let Some(check) = self.concentration.check(id, amount) {
                let combatant = self.combatant(id)?;
                let save = resolve_saving_throw(
                    roller,
                    &combatant.conditions,
                    Ability::Constitution,
                    combatant.modifier(Ability::Constitution),
                    check.dc,
                    AdvantageMode::Normal,
                );
                let maintained = self.concentration.record_save(id, save.success);
                let message = if maintained {
                    format!(
                        "{} keeps concentrating on {} (DC {}, rolled {})",
                        name,
                        check.effect,
                        check.dc,
                        save.roll.total()
                    )
                } else {
                    format!(
                        "{} loses concentration on {} (DC {}, rolled {})",
                        name,
                        check.effect,
                        check.dc,
                        save.roll.total()
                    )
                };
                let kind = if maintained {
                    EventKind::Roll
                } else {
                    EventKind::ConcentrationEnded
                };
                self.events.push(now, kind, message).about(id);
                concentration = Some(ConcentrationReport {
                    effect: check.effect,
                    dc: check.dc,
                    save: Some(save),
                    maintained,
                });
            }
        }

        Ok(DamageReport {
            combatant: id,
            amount,
            lost,
            hp,
            downed,
            concentration,
        })
    }

    /// Restore HP. Regaining any HP from 0 removes unconsciousness.
    pub fn heal(&mut self, id: CombatantId, amount: i32, now: DateTime<Utc>) -> EngineResult<i32> {
        if amount < 0 {
            return Err(EngineError::Validation(format!(
                "healing cannot be negative, got {}",
                amount
            )));
        }
        let combatant = self.combatant_mut(id)?;
        let was_down = combatant.is_down();
        let restored = combatant.heal(amount);
        if was_down && restored > 0 {
            combatant.conditions.remove(ConditionKind::Unconscious);
        }
        let message = format!(
            "{} regains {} HP ({} HP)",
            combatant.name, restored, combatant.hp
        );
        self.events
            .push(now, EventKind::Healing, message)
            .about(id);
        Ok(restored)
    }

    // ---- Resolution ----

    /// Resolve an attack and apply any damage to the target
    pub fn attack<R: Roller + ?Sized>(
        &mut self,
        request: &AttackRequest,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<AttackReport> {
        check_modifier(request.attack.attack_bonus)?;
        let damage = &request.attack.damage;
        DiceRoll::new(damage.count, damage.sides, damage.modifier)?;
        let attacker = self.combatant(request.attacker)?;
        let target = self.combatant(request.target)?;
        if attacker.conditions.is_incapacitated() {
            return Err(EngineError::invalid_state(format!(
                "{} is incapacitated and cannot attack",
                attacker.name
            )));
        }

        let outcome = resolve_attack(roller, attacker, target, &request.attack);
        let message = match (outcome.hit, outcome.critical) {
            (true, true) => format!(
                "{} critically hits {} for {} damage",
                attacker.name,
                target.name,
                outcome.damage_total()
            ),
            (true, false) => format!(
                "{} hits {} ({} vs AC {}) for {} damage",
                attacker.name,
                target.name,
                outcome.attack_roll.total(),
                outcome.target_ac,
                outcome.damage_total()
            ),
            (false, _) => format!(
                "{} misses {} ({} vs AC {})",
                attacker.name,
                target.name,
                outcome.attack_roll.total(),
                outcome.target_ac
            ),
        };
        self.events
            .push(now, EventKind::Attack, message)
            .about(request.attacker);
        self.touch_controller(request.attacker, now);

        let damage = if outcome.hit {
            Some(self.apply_damage(request.target, outcome.damage_total(), roller, now)?)
        } else {
            None
        };

        Ok(AttackReport {
            attacker: request.attacker,
            target: request.target,
            outcome,
            damage,
        })
    }

    /// Roll an ability or skill check
    pub fn check<R: Roller + ?Sized>(
        &mut self,
        request: &CheckRequest,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<CheckOutcome> {
        check_dc(request.dc)?;
        let ability = request.subject.resolve()?;
        let combatant = self.combatant(request.combatant)?;
        let mode = check_mode(&combatant.conditions, request.mode);
        let outcome = resolve_check(roller, combatant.modifier(ability), request.dc, mode);

        let message = format!(
            "{} rolls {} for a {} check against DC {}: {}",
            combatant.name,
            outcome.roll.total(),
            subject_label(&request.subject, ability),
            request.dc,
            if outcome.success { "success" } else { "failure" }
        );
        self.events
            .push(now, EventKind::Roll, message)
            .about(request.combatant);
        self.touch_controller(request.combatant, now);
        Ok(outcome)
    }

    /// Roll a saving throw
    pub fn saving_throw<R: Roller + ?Sized>(
        &mut self,
        request: &SaveRequest,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<SaveOutcome> {
        check_dc(request.dc)?;
        let ability = parse_ability(&request.ability)?;
        let combatant = self.combatant(request.combatant)?;
        let outcome = resolve_saving_throw(
            roller,
            &combatant.conditions,
            ability,
            combatant.modifier(ability),
            request.dc,
            request.mode,
        );

        let message = if outcome.auto_failed {
            format!(
                "{} automatically fails a {} save",
                combatant.name, ability
            )
        } else {
            format!(
                "{} rolls {} on a {} save against DC {}: {}",
                combatant.name,
                outcome.roll.total(),
                ability,
                request.dc,
                if outcome.success { "success" } else { "failure" }
            )
        };
        self.events
            .push(now, EventKind::Roll, message)
            .about(request.combatant);
        self.touch_controller(request.combatant, now);
        Ok(outcome)
    }

    /// Roll a contested check; ties go to the target
    pub fn contest<R: Roller + ?Sized>(
        &mut self,
        request: &ContestRequest,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<ContestOutcome> {
        let actor_ability = request.actor.subject.resolve()?;
        let target_ability = request.target.subject.resolve()?;
        let actor = self.combatant(request.actor.combatant)?;
        let target = self.combatant(request.target.combatant)?;

        let outcome = resolve_contested_check(
            roller,
            Contestant::new(
                actor.modifier(actor_ability),
                check_mode(&actor.conditions, request.actor.mode),
            ),
            Contestant::new(
                target.modifier(target_ability),
                check_mode(&target.conditions, request.target.mode),
            ),
        );

        let winner = match outcome.winner {
            ContestSide::Actor => &actor.name,
            ContestSide::Target => &target.name,
        };
        let message = format!(
            "{} ({}) vs {} ({}): {} wins",
            actor.name,
            outcome.actor_roll.total(),
            target.name,
            outcome.target_roll.total(),
            winner
        );
        self.events
            .push(now, EventKind::Roll, message)
            .about(request.actor.combatant);
        self.touch_controller(request.actor.combatant, now);
        Ok(outcome)
    }

    // ---- Participants ----

    /// Register a player, optionally linked to a combatant they control
    pub fn add_participant(
        &mut self,
        id: &str,
        name: &str,
        combatant: Option<CombatantId>,
        now: DateTime<Utc>,
    ) -> EngineResult<Participant> {
        let id = validate_id(id)?;
        if self.participants.iter().any(|p| p.id == id) {
            return Err(EngineError::Validation(format!(
                "participant '{}' already exists",
                id
            )));
        }
        let mut participant = Participant::new(
            id.clone(),
            if name.trim().is_empty() { id.as_str() } else { name },
            now,
        );
        if let Some(cid) = combatant {
            self.combatant(cid)?;
            if let Some(index) = self.controller_of(cid) {
                return Err(EngineError::invalid_state(format!(
                    "combatant {} is already controlled by '{}'",
                    cid, self.participants[index].id
                )));
            }
            participant = participant.controlling(cid);
        }

        self.events
            .push(
                now,
                EventKind::ParticipantJoined,
                format!("{} joins the table", participant.name),
            )
            .for_participant(participant.id.clone());
        self.participants.push(participant.clone());
        Ok(participant)
    }

    /// Record that a player acted. A player returning from inactivity
    /// during combat rejoins the turn order with a fresh initiative.
    pub fn participant_act<R: Roller + ?Sized>(
        &mut self,
        id: &str,
        roller: &mut R,
        now: DateTime<Utc>,
    ) -> EngineResult<Participant> {
        let index = self
            .participants
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| EngineError::ParticipantNotFound(id.to_string()))?;
        let was_inactive = self.participants[index].status == ParticipantStatus::Inactive;
        self.participants[index].touch(now);

        if let Some(cid) = self.participants[index].combatant_id {
            if was_inactive && self.combat.is_active() && !self.combat.contains(cid) {
                let combatant = self.combatant_mut(cid)?;
                let dex = combatant.dex_modifier();
                let initiative = roll_initiative(roller, dex).total();
                combatant.initiative = Some(initiative);
                self.combat
                    .insert(InitiativeEntry::new(cid, initiative, dex))?;
                let message = format!(
                    "{} rejoins the fight (initiative {})",
                    self.name_of(cid),
                    initiative
                );
                self.events
                    .push(now, EventKind::CombatantJoined, message)
                    .about(cid)
                    .for_participant(id);
            }
        }
        Ok(self.participants[index].clone())
    }

    // ---- Escalation ----

    /// Transitions due at `now`
    pub fn pending_transitions(
        &self,
        now: DateTime<Utc>,
        thresholds: &EscalationThresholds,
    ) -> Vec<Transition> {
        escalation::evaluate(now, &self.combat, &self.participants, thresholds)
    }

    /// Apply escalation transitions, re-checking each against the current
    /// state. Returns the ones that took effect.
    pub fn apply_transitions(
        &mut self,
        transitions: &[Transition],
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Transition>> {
        let mut applied = Vec::new();
        for transition in transitions {
            let took_effect = match transition {
                Transition::Nudge { combatant, .. } => self.nudge(*combatant, now),
                Transition::AutoSkip { combatant, .. } => self.auto_skip(*combatant, now)?,
                Transition::FollowParty { participant } => self.follow_party(participant, now),
                Transition::MarkInactive {
                    participant,
                    remove_from_combat,
                } => self.mark_inactive(participant, *remove_from_combat, now)?,
            };
            if took_effect {
                info!(encounter = %self.id, ?transition, "escalation applied");
                applied.push(transition.clone());
            }
        }
        Ok(applied)
    }

    /// Evaluate and apply escalation in one step
    pub fn sweep(
        &mut self,
        now: DateTime<Utc>,
        thresholds: &EscalationThresholds,
    ) -> EngineResult<Vec<Transition>> {
        let due = self.pending_transitions(now, thresholds);
        self.apply_transitions(&due, now)
    }

    fn nudge(&mut self, id: CombatantId, now: DateTime<Utc>) -> bool {
        if self.combat.current() != Some(id) || self.combat.was_nudged(id) {
            return false;
        }
        self.combat.mark_nudged(id);
        let message = format!("{}, it is still your turn", self.name_of(id));
        let controller = self.controller_of(id).map(|i| self.participants[i].id.clone());
        let event = self.events.push(now, EventKind::Nudge, message).about(id);
        if let Some(participant) = controller {
            event.for_participant(participant);
        }
        true
    }

    fn auto_skip(&mut self, id: CombatantId, now: DateTime<Utc>) -> EngineResult<bool> {
        if self.combat.current() != Some(id) || self.combat.was_auto_skipped(id) {
            return Ok(false);
        }
        self.combat.mark_auto_skipped(id);
        if let Some(combatant) = self.roster.get_mut(&id) {
            combatant.conditions.add(Condition::bare(ConditionKind::Dodging));
        }
        let message = format!(
            "{} hesitates and takes the Dodge action",
            self.name_of(id)
        );
        let controller = self.controller_of(id).map(|i| self.participants[i].id.clone());
        let event = self.events.push(now, EventKind::AutoSkip, message).about(id);
        if let Some(participant) = controller {
            event.for_participant(participant);
        }
        self.advance_turn(now)?;
        Ok(true)
    }

    fn follow_party(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let Some(participant) = self.participants.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if participant.status != ParticipantStatus::Active {
            return false;
        }
        participant.status = ParticipantStatus::Following;
        let message = format!("{} follows the party", participant.name);
        self.events
            .push(now, EventKind::FollowParty, message)
            .for_participant(id);
        true
    }

    fn mark_inactive(
        &mut self,
        id: &str,
        remove_from_combat: Option<CombatantId>,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let Some(participant) = self.participants.iter_mut().find(|p| p.id == id) else {
            return Ok(false);
        };
        if participant.status == ParticipantStatus::Inactive {
            return Ok(false);
        }
        participant.status = ParticipantStatus::Inactive;
        let message = format!("{} has gone quiet and steps back", participant.name);
        self.events
            .push(now, EventKind::Inactive, message)
            .for_participant(id);

        if let Some(cid) = remove_from_combat {
            if self.combat.contains(cid) {
                self.leave_turn_order(cid, now)?;
            }
        }
        Ok(true)
    }
}

/// Caller mode merged with condition-imposed check disadvantage
fn check_mode(conditions: &ConditionList, requested: AdvantageMode) -> AdvantageMode {
    if conditions.check_disadvantage() {
        AdvantageMode::combine([requested, AdvantageMode::Disadvantage])
    } else {
        requested
    }
}

fn subject_label(subject: &CheckSubject, ability: Ability) -> String {
    match subject.skill.as_deref().and_then(|s| s.parse::<Skill>().ok()) {
        Some(skill) => skill.to_string(),
        None => ability.to_string(),
    }
}
