//! Dice rolling system
//!
//! Parses and rolls dice notation like "2d6+3", "1d20", "4d6-2", and
//! resolves d20 rolls with advantage or disadvantage.
//!
//! All randomness flows through the [`Roller`] trait. Production code uses
//! [`SecureRoller`], a ChaCha-based generator seeded from the operating
//! system, so rolls cannot be predicted or biased by clients. Tests and
//! replays use [`FixedRoller`] to script exact die faces.

use std::collections::VecDeque;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest dice pool a single expression may roll
pub const MAX_DICE_COUNT: u32 = 100;

/// Largest die accepted in an expression
pub const MAX_DICE_SIDES: u32 = 1000;

/// Largest flat modifier or bonus magnitude
pub const MAX_MODIFIER: i32 = 1000;

/// Errors from building or rolling dice expressions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("dice count must be at least 1")]
    ZeroCount,

    #[error("die sides must be at least 1")]
    ZeroSides,

    #[error("at most {max} dice may be rolled, got {count}", max = MAX_DICE_COUNT)]
    TooManyDice { count: u32 },

    #[error("dice may have at most {max} sides, got {sides}", max = MAX_DICE_SIDES)]
    TooManySides { sides: u32 },

    #[error("modifier must be within -{max}..={max}, got {modifier}", max = MAX_MODIFIER)]
    ModifierOutOfRange { modifier: i32 },

    #[error("invalid dice notation '{notation}': {reason}")]
    Notation { notation: String, reason: String },
}

impl DiceError {
    fn notation(notation: &str, reason: impl Into<String>) -> Self {
        DiceError::Notation {
            notation: notation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Reject modifiers outside `-MAX_MODIFIER..=MAX_MODIFIER`
pub fn check_modifier(modifier: i32) -> Result<i32, DiceError> {
    if (-MAX_MODIFIER..=MAX_MODIFIER).contains(&modifier) {
        Ok(modifier)
    } else {
        Err(DiceError::ModifierOutOfRange { modifier })
    }
}

fn check_sides(sides: u32) -> Result<u32, DiceError> {
    match sides {
        0 => Err(DiceError::ZeroSides),
        s if s > MAX_DICE_SIDES => Err(DiceError::TooManySides { sides }),
        s => Ok(s),
    }
}

fn saturate(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Source of raw die faces
pub trait Roller {
    /// Roll one die, returning a face in `1..=sides`. `sides` is never zero.
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// Cryptographically strong roller (ChaCha12 seeded from the OS)
#[derive(Debug, Clone)]
pub struct SecureRoller {
    rng: StdRng,
}

impl SecureRoller {
    /// Create a roller seeded from operating system entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Create a reproducible roller from a fixed seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SecureRoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Roller for SecureRoller {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.rng.random_range(1..=sides)
    }
}

/// Roller that returns a scripted sequence of faces.
///
/// Once the script runs out the last face repeats. Faces are clamped to
/// the die being rolled.
#[derive(Debug, Clone)]
pub struct FixedRoller {
    faces: VecDeque<u32>,
    last: u32,
}

impl FixedRoller {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            last: 1,
        }
    }

    /// Number of scripted faces not yet consumed
    pub fn remaining(&self) -> usize {
        self.faces.len()
    }
}

impl Roller for FixedRoller {
    fn roll_die(&mut self, sides: u32) -> u32 {
        let face = self.faces.pop_front().unwrap_or(self.last);
        self.last = face;
        face.clamp(1, sides.max(1))
    }
}

/// How a d20 is rolled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvantageMode {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl AdvantageMode {
    /// Combine modes from several sources.
    ///
    /// Any advantage together with any disadvantage cancels to normal,
    /// no matter how many sources of each there are.
    pub fn combine(modes: impl IntoIterator<Item = AdvantageMode>) -> AdvantageMode {
        let (mut adv, mut dis) = (false, false);
        for mode in modes {
            match mode {
                AdvantageMode::Advantage => adv = true,
                AdvantageMode::Disadvantage => dis = true,
                AdvantageMode::Normal => {}
            }
        }
        match (adv, dis) {
            (true, false) => AdvantageMode::Advantage,
            (false, true) => AdvantageMode::Disadvantage,
            _ => AdvantageMode::Normal,
        }
    }
}

impl FromStr for AdvantageMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" | "none" | "" => Ok(AdvantageMode::Normal),
            "advantage" | "adv" => Ok(AdvantageMode::Advantage),
            "disadvantage" | "dis" => Ok(AdvantageMode::Disadvantage),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AdvantageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdvantageMode::Normal => "normal",
            AdvantageMode::Advantage => "advantage",
            AdvantageMode::Disadvantage => "disadvantage",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single roll.
///
/// Built once per resolution and never changed afterwards, so fields are
/// only exposed through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    expression: String,
    dice: Vec<u32>,
    natural: Option<u32>,
    modifier: i32,
    total: i32,
    is_critical: bool,
    is_fumble: bool,
    used_advantage: bool,
    used_disadvantage: bool,
}

impl RollResult {
    /// Placeholder for a roll that never happened (automatic failure)
    pub fn auto_fail(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            dice: Vec::new(),
            natural: None,
            modifier: 0,
            total: 0,
            is_critical: false,
            is_fumble: false,
            used_advantage: false,
            used_disadvantage: false,
        }
    }

    /// The expression that was evaluated, e.g. "2d8+3"
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Every die face rolled, including discarded advantage dice
    pub fn dice(&self) -> &[u32] {
        &self.dice
    }

    /// The kept raw d20 face, for d20 rolls
    pub fn natural(&self) -> Option<u32> {
        self.natural
    }

    pub fn modifier(&self) -> i32 {
        self.modifier
    }

    pub fn total(&self) -> i32 {
        self.total
    }

    /// Natural 20 on a d20, or doubled dice on a damage roll
    pub fn is_critical(&self) -> bool {
        self.is_critical
    }

    /// Natural 1 on a d20
    pub fn is_fumble(&self) -> bool {
        self.is_fumble
    }

    pub fn used_advantage(&self) -> bool {
        self.used_advantage
    }

    pub fn used_disadvantage(&self) -> bool {
        self.used_disadvantage
    }

    /// Whether this roll was short-circuited rather than rolled
    pub fn is_auto_fail(&self) -> bool {
        self.dice.is_empty()
    }
}

impl std::fmt::Display for RollResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let faces: Vec<String> = self.dice.iter().map(|d| d.to_string()).collect();
        write!(f, "{} [{}] = {}", self.expression, faces.join(", "), self.total)
    }
}

/// A parsed dice roll specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceRoll {
    /// Number of dice to roll
    pub count: u32,
    /// Number of sides per die
    pub sides: u32,
    /// Modifier to add/subtract
    pub modifier: i32,
}

impl DiceRoll {
    /// Create a new dice roll, rejecting empty or oversized pools and
    /// out-of-range dice or modifiers
    pub fn new(count: u32, sides: u32, modifier: i32) -> Result<Self, DiceError> {
        if count == 0 {
            return Err(DiceError::ZeroCount);
        }
        if count > MAX_DICE_COUNT {
            return Err(DiceError::TooManyDice { count });
        }
        check_sides(sides)?;
        check_modifier(modifier)?;
        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    /// Roll the dice
    pub fn roll<R: Roller + ?Sized>(&self, roller: &mut R) -> RollResult {
        self.roll_pool(roller, self.count, false)
    }

    /// Roll as a critical hit: twice the dice, modifier added once
    pub fn roll_critical<R: Roller + ?Sized>(&self, roller: &mut R) -> RollResult {
        let count = self.count.checked_mul(2).unwrap_or(u32::MAX);
        self.roll_pool(roller, count, true)
    }

    fn roll_pool<R: Roller + ?Sized>(&self, roller: &mut R, count: u32, critical: bool) -> RollResult {
        // Fields are public, so a hand-built roll may skip `new`
        let count = count.min(MAX_DICE_COUNT * 2);
        let dice: Vec<u32> = (0..count).map(|_| roller.roll_die(self.sides)).collect();
        let sum: i64 = dice.iter().map(|&d| d as i64).sum();
        let expression = DiceRoll {
            count,
            ..self.clone()
        }
        .to_string();

        RollResult {
            expression,
            dice,
            natural: None,
            modifier: self.modifier,
            total: saturate(sum + self.modifier as i64),
            is_critical: critical,
            is_fumble: false,
            used_advantage: false,
            used_disadvantage: false,
        }
    }

    /// Get the minimum possible result
    pub fn min(&self) -> i32 {
        saturate(self.count as i64 + self.modifier as i64)
    }

    /// Get the maximum possible result
    pub fn max(&self) -> i32 {
        let dice_max = self
            .count
            .checked_mul(self.sides)
            .map_or(i64::MAX, i64::from);
        saturate(dice_max.saturating_add(self.modifier as i64))
    }

    /// Get the expected average (rounded down)
    pub fn average(&self) -> i32 {
        let avg_per_die = (1.0 + self.sides as f64) / 2.0;
        (self.count as f64 * avg_per_die + self.modifier as f64) as i32
    }
}

impl FromStr for DiceRoll {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_dice(s)
    }
}

impl TryFrom<String> for DiceRoll {
    type Error = DiceError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_dice(&s)
    }
}

impl From<DiceRoll> for String {
    fn from(roll: DiceRoll) -> Self {
        roll.to_string()
    }
}

impl std::fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifier > 0 {
            write!(f, "{}d{}+{}", self.count, self.sides, self.modifier)
        } else if self.modifier < 0 {
            write!(f, "{}d{}{}", self.count, self.sides, self.modifier)
        } else {
            write!(f, "{}d{}", self.count, self.sides)
        }
    }
}

/// Parse a dice notation string like "2d6+3"
pub fn parse_dice(notation: &str) -> Result<DiceRoll, DiceError> {
    let original = notation;
    let notation = notation.trim().to_lowercase();

    let d_pos = notation
        .find('d')
        .ok_or_else(|| DiceError::notation(original, "missing 'd'"))?;

    // "d6" means "1d6"
    let count_str = &notation[..d_pos];
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str
            .parse()
            .map_err(|_| DiceError::notation(original, format!("invalid dice count '{}'", count_str)))?
    };

    let rest = &notation[d_pos + 1..];
    let (sides_str, modifier) = match rest.find(['+', '-']) {
        Some(0) | None => (rest, 0),
        Some(pos) => {
            let mod_str = &rest[pos..];
            let modifier: i32 = mod_str
                .parse()
                .map_err(|_| DiceError::notation(original, format!("invalid modifier '{}'", mod_str)))?;
            (&rest[..pos], modifier)
        }
    };

    let sides: u32 = sides_str
        .parse()
        .map_err(|_| DiceError::notation(original, format!("invalid die sides '{}'", sides_str)))?;

    DiceRoll::new(count, sides, modifier)
}

/// Roll a single die with `sides` faces
pub fn roll<R: Roller + ?Sized>(roller: &mut R, sides: u32) -> Result<u32, DiceError> {
    check_sides(sides)?;
    Ok(roller.roll_die(sides))
}

/// Roll `count` dice of `sides` faces and add `modifier`
pub fn roll_expression<R: Roller + ?Sized>(
    roller: &mut R,
    count: u32,
    sides: u32,
    modifier: i32,
) -> Result<RollResult, DiceError> {
    Ok(DiceRoll::new(count, sides, modifier)?.roll(roller))
}

/// Roll one die (twice under advantage/disadvantage) and add `modifier`.
///
/// The higher or lower raw face is chosen before the modifier is added.
/// Critical/fumble flags are set only for d20s.
pub fn roll_with_advantage<R: Roller + ?Sized>(
    roller: &mut R,
    sides: u32,
    modifier: i32,
    mode: AdvantageMode,
) -> Result<RollResult, DiceError> {
    check_sides(sides)?;
    check_modifier(modifier)?;

    let first = roller.roll_die(sides);
    let (dice, kept) = match mode {
        AdvantageMode::Normal => (vec![first], first),
        AdvantageMode::Advantage => {
            let second = roller.roll_die(sides);
            (vec![first, second], first.max(second))
        }
        AdvantageMode::Disadvantage => {
            let second = roller.roll_die(sides);
            (vec![first, second], first.min(second))
        }
    };

    let is_d20 = sides == 20;
    let expression = DiceRoll {
        count: 1,
        sides,
        modifier,
    }
    .to_string();

    Ok(RollResult {
        expression,
        dice,
        natural: Some(kept),
        modifier,
        total: saturate(kept as i64 + modifier as i64),
        is_critical: is_d20 && is_critical(kept),
        is_fumble: is_d20 && is_fumble(kept),
        used_advantage: mode == AdvantageMode::Advantage,
        used_disadvantage: mode == AdvantageMode::Disadvantage,
    })
}

/// Roll a d20 test (attack, check or save)
pub fn roll_d20<R: Roller + ?Sized>(roller: &mut R, modifier: i32, mode: AdvantageMode) -> RollResult {
    // 20 sides and a clamped modifier can never be rejected
    let modifier = modifier.clamp(-MAX_MODIFIER, MAX_MODIFIER);
    match roll_with_advantage(roller, 20, modifier, mode) {
        Ok(result) => result,
        Err(_) => RollResult::auto_fail("1d20"),
    }
}

/// Check if a d20 roll is a natural 20 (critical hit)
pub fn is_critical(roll: u32) -> bool {
    roll == 20
}

/// Check if a d20 roll is a natural 1 (critical fail)
pub fn is_fumble(roll: u32) -> bool {
    roll == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let roll = parse_dice("2d6").unwrap();
        assert_eq!(roll.count, 2);
        assert_eq!(roll.sides, 6);
        assert_eq!(roll.modifier, 0);
    }

    #[test]
    fn test_parse_with_modifiers() {
        let roll = parse_dice("1d8+3").unwrap();
        assert_eq!((roll.count, roll.sides, roll.modifier), (1, 8, 3));

        let roll = parse_dice("3d8-2").unwrap();
        assert_eq!((roll.count, roll.sides, roll.modifier), (3, 8, -2));
    }

    #[test]
    fn test_parse_implicit_one_and_case() {
        let roll = parse_dice("  D6  ").unwrap();
        assert_eq!(roll.count, 1);
        assert_eq!(roll.sides, 6);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(parse_dice("abc"), Err(DiceError::Notation { .. })));
        assert!(parse_dice("2d").is_err());
        assert!(parse_dice("d").is_err());
        assert!(parse_dice("2d6+x").is_err());
        assert_eq!(parse_dice("0d6"), Err(DiceError::ZeroCount));
        assert_eq!(parse_dice("2d0"), Err(DiceError::ZeroSides));
    }

    #[test]
    fn test_non_positive_inputs_fail_fast() {
        let mut roller = SecureRoller::seeded(1);
        assert_eq!(roll(&mut roller, 0), Err(DiceError::ZeroSides));
        assert_eq!(
            roll_expression(&mut roller, 0, 6, 0).unwrap_err(),
            DiceError::ZeroCount
        );
        assert_eq!(
            roll_with_advantage(&mut roller, 0, 0, AdvantageMode::Normal).unwrap_err(),
            DiceError::ZeroSides
        );
    }

    #[test]
    fn test_oversized_expressions_rejected() {
        assert_eq!(
            parse_dice("99999999d6"),
            Err(DiceError::TooManyDice { count: 99_999_999 })
        );
        assert_eq!(
            parse_dice("1d4000000000"),
            Err(DiceError::TooManySides { sides: 4_000_000_000 })
        );
        assert_eq!(
            parse_dice("1d20+2147483647"),
            Err(DiceError::ModifierOutOfRange { modifier: i32::MAX })
        );
        assert_eq!(
            DiceRoll::new(1, 6, i32::MIN),
            Err(DiceError::ModifierOutOfRange { modifier: i32::MIN })
        );

        let mut roller = SecureRoller::seeded(7);
        assert_eq!(
            roll_with_advantage(&mut roller, 20, i32::MAX, AdvantageMode::Advantage).unwrap_err(),
            DiceError::ModifierOutOfRange { modifier: i32::MAX }
        );
        assert_eq!(
            roll(&mut roller, MAX_DICE_SIDES + 1),
            Err(DiceError::TooManySides { sides: MAX_DICE_SIDES + 1 })
        );

        let clamped = roll_d20(&mut FixedRoller::new([5]), i32::MAX, AdvantageMode::Normal);
        assert_eq!(clamped.total(), 5 + MAX_MODIFIER);

        // Limits themselves are accepted
        let largest = DiceRoll::new(MAX_DICE_COUNT, MAX_DICE_SIDES, MAX_MODIFIER).unwrap();
        assert_eq!(largest.max(), 101_000);
        assert_eq!(largest.roll_critical(&mut roller).dice().len(), 200);
        assert!(parse_dice("100d1000-1000").is_ok());
    }

    #[test]
    fn test_hand_built_rolls_saturate() {
        let huge = DiceRoll {
            count: u32::MAX,
            sides: u32::MAX,
            modifier: i32::MAX,
        };
        assert_eq!(huge.max(), i32::MAX);
        assert_eq!(huge.min(), i32::MAX);

        let mut roller = FixedRoller::new([u32::MAX]);
        let result = huge.roll_critical(&mut roller);
        assert_eq!(result.dice().len(), (MAX_DICE_COUNT * 2) as usize);
        assert_eq!(result.total(), i32::MAX);
    }

    #[test]
    fn test_roll_range_and_coverage() {
        let mut roller = SecureRoller::new();
        for sides in [1u32, 2, 4, 6, 8, 10, 12, 20, 100] {
            let mut seen = vec![0u32; sides as usize + 1];
            for _ in 0..10_000 {
                let face = roll(&mut roller, sides).unwrap();
                assert!((1..=sides).contains(&face), "d{} rolled {}", sides, face);
                seen[face as usize] += 1;
            }
            assert!(
                seen[1..].iter().all(|&n| n > 0),
                "d{} never rolled some face: {:?}",
                sides,
                seen
            );
        }
    }

    #[test]
    fn test_expression_sums_dice_and_modifier() {
        let mut roller = FixedRoller::new([3, 5, 6]);
        let result = roll_expression(&mut roller, 3, 6, 2).unwrap();
        assert_eq!(result.dice(), &[3, 5, 6]);
        assert_eq!(result.total(), 16);
        assert_eq!(result.expression(), "3d6+2");
        assert!(!result.is_critical());
    }

    #[test]
    fn test_advantage_keeps_higher_before_modifier() {
        let mut roller = SecureRoller::new();
        for _ in 0..1000 {
            let adv = roll_with_advantage(&mut roller, 20, 0, AdvantageMode::Advantage).unwrap();
            assert!(adv.dice().iter().all(|&d| adv.total() >= d as i32));
            assert!(adv.used_advantage());

            let dis = roll_with_advantage(&mut roller, 20, 0, AdvantageMode::Disadvantage).unwrap();
            assert!(dis.dice().iter().all(|&d| dis.total() <= d as i32));
            assert!(dis.used_disadvantage());
        }
    }

    #[test]
    fn test_advantage_natural_flags() {
        let mut roller = FixedRoller::new([1, 20]);
        let adv = roll_d20(&mut roller, -3, AdvantageMode::Advantage);
        assert_eq!(adv.natural(), Some(20));
        assert_eq!(adv.total(), 17);
        assert!(adv.is_critical());

        let mut roller = FixedRoller::new([1, 20]);
        let dis = roll_d20(&mut roller, 7, AdvantageMode::Disadvantage);
        assert_eq!(dis.natural(), Some(1));
        assert_eq!(dis.total(), 8);
        assert!(dis.is_fumble());
    }

    #[test]
    fn test_critical_doubles_dice_not_modifier() {
        let damage = parse_dice("1d8+3").unwrap();
        let mut roller = FixedRoller::new([5, 7]);
        let result = damage.roll_critical(&mut roller);
        assert_eq!(result.expression(), "2d8+3");
        assert_eq!(result.dice(), &[5, 7]);
        assert_eq!(result.total(), 15);
        assert!(result.is_critical());
    }

    #[test]
    fn test_combine_modes() {
        use AdvantageMode::*;
        assert_eq!(AdvantageMode::combine([]), Normal);
        assert_eq!(AdvantageMode::combine([Advantage, Normal]), Advantage);
        assert_eq!(AdvantageMode::combine([Disadvantage, Disadvantage]), Disadvantage);
        assert_eq!(AdvantageMode::combine([Advantage, Advantage, Disadvantage]), Normal);
    }

    #[test]
    fn test_min_max_average() {
        let roll = DiceRoll::new(2, 6, 3).unwrap();
        assert_eq!(roll.min(), 5);
        assert_eq!(roll.max(), 15);
        assert_eq!(roll.average(), 10);
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(DiceRoll::new(3, 8, -2).unwrap().to_string(), "3d8-2");
        let json = serde_json::to_string(&DiceRoll::new(1, 20, 5).unwrap()).unwrap();
        assert_eq!(json, "\"1d20+5\"");
        let back: DiceRoll = serde_json::from_str("\"2d6\"").unwrap();
        assert_eq!(back, DiceRoll::new(2, 6, 0).unwrap());
        assert!(serde_json::from_str::<DiceRoll>("\"0d6\"").is_err());
    }

    #[test]
    fn test_fixed_roller_repeats_and_clamps() {
        let mut roller = FixedRoller::new([9]);
        assert_eq!(roller.roll_die(20), 9);
        assert_eq!(roller.roll_die(20), 9);
        assert_eq!(roller.roll_die(6), 6);
        assert_eq!(roller.remaining(), 0);
    }
}
