//! Combat rules engine
//!
//! Pure, synchronous building blocks for tabletop combat:
//! - Dice rolling (e.g., "2d6+3") with advantage and disadvantage
//! - Conditions and the roll modes they impose
//! - Concentration tracking
//! - Initiative order, rounds and turn advancement
//! - Attack, check, save and contest resolution
//!
//! Nothing here does I/O; randomness always comes in through a [`Roller`].

mod abilities;
mod combatant;
mod concentration;
mod conditions;
mod dice;
mod initiative;
mod resolution;

/// Identifier of a combatant, unique within an encounter
pub type CombatantId = u32;

pub use abilities::{Ability, AbilityScores, Skill};
pub use combatant::{Combatant, CombatantKind};
pub use concentration::{
    concentration_dc, ConcentrationCheck, ConcentrationTracker, MIN_CONCENTRATION_DC,
};
pub use conditions::{Condition, ConditionError, ConditionKind, ConditionList, MAX_EXHAUSTION};
pub use dice::{
    check_modifier, is_critical, is_fumble, parse_dice, roll, roll_d20, roll_expression,
    roll_with_advantage, AdvantageMode, DiceError, DiceRoll, FixedRoller, RollResult, Roller,
    SecureRoller, MAX_DICE_COUNT, MAX_DICE_SIDES, MAX_MODIFIER,
};
pub use initiative::{
    roll_initiative, CombatPhase, CombatState, InitiativeEntry, Removal, TurnChange,
};
pub use resolution::{
    resolve_attack, resolve_check, resolve_contested_check, resolve_saving_throw, Attack,
    AttackOutcome, CheckOutcome, ContestOutcome, ContestSide, Contestant, Cover, SaveOutcome,
};
