//! Attack and check resolution
//!
//! Combines the dice engine with combatant conditions to resolve attack
//! rolls, ability checks, saving throws and contested checks. Nothing here
//! mutates a combatant: callers apply HP loss, concentration checks and
//! condition changes from the returned outcomes.

use serde::{Deserialize, Serialize};

use super::abilities::Ability;
use super::combatant::Combatant;
use super::conditions::ConditionList;
use super::dice::{roll_d20, AdvantageMode, DiceRoll, RollResult, Roller};

/// Cover between attacker and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cover {
    #[default]
    None,
    Half,
    ThreeQuarters,
}

impl Cover {
    pub fn ac_bonus(&self) -> i32 {
        match self {
            Cover::None => 0,
            Cover::Half => 2,
            Cover::ThreeQuarters => 5,
        }
    }
}

/// Parameters of a single attack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    pub attack_bonus: i32,
    pub damage: DiceRoll,
    #[serde(default)]
    pub mode: AdvantageMode,
    #[serde(default)]
    pub cover: Cover,
    #[serde(default = "default_melee")]
    pub melee: bool,
}

fn default_melee() -> bool {
    true
}

impl Attack {
    pub fn new(attack_bonus: i32, damage: DiceRoll) -> Self {
        Self {
            attack_bonus,
            damage,
            mode: AdvantageMode::Normal,
            cover: Cover::None,
            melee: true,
        }
    }

    pub fn with_mode(mut self, mode: AdvantageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cover(mut self, cover: Cover) -> Self {
        self.cover = cover;
        self
    }

    pub fn ranged(mut self) -> Self {
        self.melee = false;
        self
    }
}

/// Result of an attack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub hit: bool,
    pub critical: bool,
    pub fumble: bool,
    /// Mode after merging caller and condition sources
    pub mode: AdvantageMode,
    /// Target AC including cover
    pub target_ac: i32,
    pub attack_roll: RollResult,
    /// Damage rolled on a hit
    pub damage: Option<RollResult>,
}

impl AttackOutcome {
    pub fn damage_total(&self) -> i32 {
        self.damage.as_ref().map(|d| d.total().max(0)).unwrap_or(0)
    }
}

/// Resolve an attack roll and, on a hit, its damage.
///
/// A natural 20 always hits and is critical; a natural 1 always misses.
/// A melee hit on a paralyzed or unconscious target is always critical.
/// Critical hits roll the damage dice twice and add the modifier once.
pub fn resolve_attack<R: Roller + ?Sized>(
    roller: &mut R,
    attacker: &Combatant,
    target: &Combatant,
    attack: &Attack,
) -> AttackOutcome {
    let mut sources = vec![attack.mode];
    sources.extend(attacker.conditions.attacker_sources());
    sources.extend(target.conditions.defender_sources(attack.melee));
    let mode = AdvantageMode::combine(sources);

    let attack_roll = roll_d20(roller, attack.attack_bonus, mode);
    let target_ac = target.armor_class.saturating_add(attack.cover.ac_bonus());

    let (hit, mut critical) = if attack_roll.is_critical() {
        (true, true)
    } else if attack_roll.is_fumble() {
        (false, false)
    } else {
        (attack_roll.total() >= target_ac, false)
    };
    if hit && target.conditions.is_auto_crit(attack.melee) {
        critical = true;
    }

    let damage = hit.then(|| {
        if critical {
            attack.damage.roll_critical(roller)
        } else {
            attack.damage.roll(roller)
        }
    });

    AttackOutcome {
        hit,
        critical,
        fumble: attack_roll.is_fumble(),
        mode,
        target_ac,
        attack_roll,
        damage,
    }
}

/// Result of an ability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub success: bool,
    pub dc: i32,
    pub roll: RollResult,
}

/// Roll d20 + modifier against a DC
pub fn resolve_check<R: Roller + ?Sized>(
    roller: &mut R,
    modifier: i32,
    dc: i32,
    mode: AdvantageMode,
) -> CheckOutcome {
    let roll = roll_d20(roller, modifier, mode);
    CheckOutcome {
        success: roll.total() >= dc,
        dc,
        roll,
    }
}

/// Result of a saving throw
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub ability: Ability,
    pub dc: i32,
    /// Failed without rolling; `roll` then reports a total of 0
    pub auto_failed: bool,
    pub roll: RollResult,
}

/// Roll a saving throw, honouring condition auto-fails and disadvantage
pub fn resolve_saving_throw<R: Roller + ?Sized>(
    roller: &mut R,
    conditions: &ConditionList,
    ability: Ability,
    modifier: i32,
    dc: i32,
    mode: AdvantageMode,
) -> SaveOutcome {
    if conditions.auto_fails_save(ability) {
        let expression = DiceRoll {
            count: 1,
            sides: 20,
            modifier,
        }
        .to_string();
        return SaveOutcome {
            success: false,
            ability,
            dc,
            auto_failed: true,
            roll: RollResult::auto_fail(expression),
        };
    }

    let mut sources = vec![mode];
    if conditions.save_disadvantage() {
        sources.push(AdvantageMode::Disadvantage);
    }
    let roll = roll_d20(roller, modifier, AdvantageMode::combine(sources));
    SaveOutcome {
        success: roll.total() >= dc,
        ability,
        dc,
        auto_failed: false,
        roll,
    }
}

/// One side of a contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contestant {
    pub modifier: i32,
    #[serde(default)]
    pub mode: AdvantageMode,
}

impl Contestant {
    pub fn new(modifier: i32, mode: AdvantageMode) -> Self {
        Self { modifier, mode }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestSide {
    Actor,
    Target,
}

/// Result of a contested check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestOutcome {
    pub winner: ContestSide,
    pub actor_roll: RollResult,
    pub target_roll: RollResult,
}

/// Both sides roll; the higher total wins and ties go to the target
pub fn resolve_contested_check<R: Roller + ?Sized>(
    roller: &mut R,
    actor: Contestant,
    target: Contestant,
) -> ContestOutcome {
    let actor_roll = roll_d20(roller, actor.modifier, actor.mode);
    let target_roll = roll_d20(roller, target.modifier, target.mode);
    let winner = if actor_roll.total() > target_roll.total() {
        ContestSide::Actor
    } else {
        ContestSide::Target
    };
    ContestOutcome {
        winner,
        actor_roll,
        target_roll,
    }
}
