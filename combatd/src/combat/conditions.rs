//! Condition registry
//!
//! Conditions are a closed vocabulary of 5e status effects, each optionally
//! carrying one integer parameter:
//! - `frightened:5`, `grappled:12` - source combatant ID
//! - `exhaustion:2` - severity level (1-6)
//! - `poisoned:1` - variant that also imposes disadvantage on saves
//!
//! On the wire a combatant's conditions are an ordered list of `tag` or
//! `tag:param` strings. Parsing is strict: unknown tags and malformed
//! parameters are rejected, never dropped.
//!
//! Conditions have no duration here. They stay until explicitly removed.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::abilities::Ability;
use super::dice::AdvantageMode;

/// Highest exhaustion level
pub const MAX_EXHAUSTION: u32 = 6;

/// Errors from parsing or building conditions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("unknown condition '{0}'")]
    UnknownTag(String),

    #[error("malformed parameter '{param}' for condition '{tag}'")]
    MalformedParam { tag: String, param: String },

    #[error("condition '{0}' does not take a parameter")]
    ParamNotAccepted(ConditionKind),

    #[error("parameter {param} out of range for condition '{kind}'")]
    ParamOutOfRange { kind: ConditionKind, param: u32 },
}

/// What a condition's parameter means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamRule {
    None,
    Source,
    Level,
    Variant,
}

/// Condition tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Blinded,
    Charmed,
    Deafened,
    /// Took the Dodge action
    Dodging,
    Exhaustion,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Raging,
    /// Attacked recklessly this turn
    Reckless,
    Restrained,
    Stunned,
    Unconscious,
}

impl ConditionKind {
    pub fn all() -> &'static [ConditionKind] {
        &[
            ConditionKind::Blinded,
            ConditionKind::Charmed,
            ConditionKind::Deafened,
            ConditionKind::Dodging,
            ConditionKind::Exhaustion,
            ConditionKind::Frightened,
            ConditionKind::Grappled,
            ConditionKind::Incapacitated,
            ConditionKind::Invisible,
            ConditionKind::Paralyzed,
            ConditionKind::Petrified,
            ConditionKind::Poisoned,
            ConditionKind::Prone,
            ConditionKind::Raging,
            ConditionKind::Reckless,
            ConditionKind::Restrained,
            ConditionKind::Stunned,
            ConditionKind::Unconscious,
        ]
    }

    /// Whether this condition leaves the bearer unable to act or react
    pub fn incapacitates(&self) -> bool {
        matches!(
            self,
            ConditionKind::Incapacitated
                | ConditionKind::Paralyzed
                | ConditionKind::Stunned
                | ConditionKind::Unconscious
                | ConditionKind::Petrified
        )
    }

    /// Whether this condition stops movement
    pub fn prevents_movement(&self) -> bool {
        matches!(
            self,
            ConditionKind::Grappled
                | ConditionKind::Paralyzed
                | ConditionKind::Stunned
                | ConditionKind::Unconscious
                | ConditionKind::Petrified
        )
    }

    fn param_rule(&self) -> ParamRule {
        match self {
            ConditionKind::Frightened | ConditionKind::Grappled => ParamRule::Source,
            ConditionKind::Exhaustion => ParamRule::Level,
            ConditionKind::Poisoned => ParamRule::Variant,
            _ => ParamRule::None,
        }
    }
}

impl FromStr for ConditionKind {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blinded" => Ok(ConditionKind::Blinded),
            "charmed" => Ok(ConditionKind::Charmed),
            "deafened" => Ok(ConditionKind::Deafened),
            "dodging" => Ok(ConditionKind::Dodging),
            "exhaustion" => Ok(ConditionKind::Exhaustion),
            "frightened" => Ok(ConditionKind::Frightened),
            "grappled" => Ok(ConditionKind::Grappled),
            "incapacitated" => Ok(ConditionKind::Incapacitated),
            "invisible" => Ok(ConditionKind::Invisible),
            "paralyzed" => Ok(ConditionKind::Paralyzed),
            "petrified" => Ok(ConditionKind::Petrified),
            "poisoned" => Ok(ConditionKind::Poisoned),
            "prone" => Ok(ConditionKind::Prone),
            "raging" => Ok(ConditionKind::Raging),
            "reckless" => Ok(ConditionKind::Reckless),
            "restrained" => Ok(ConditionKind::Restrained),
            "stunned" => Ok(ConditionKind::Stunned),
            "unconscious" => Ok(ConditionKind::Unconscious),
            other => Err(ConditionError::UnknownTag(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionKind::Blinded => "blinded",
            ConditionKind::Charmed => "charmed",
            ConditionKind::Deafened => "deafened",
            ConditionKind::Dodging => "dodging",
            ConditionKind::Exhaustion => "exhaustion",
            ConditionKind::Frightened => "frightened",
            ConditionKind::Grappled => "grappled",
            ConditionKind::Incapacitated => "incapacitated",
            ConditionKind::Invisible => "invisible",
            ConditionKind::Paralyzed => "paralyzed",
            ConditionKind::Petrified => "petrified",
            ConditionKind::Poisoned => "poisoned",
            ConditionKind::Prone => "prone",
            ConditionKind::Raging => "raging",
            ConditionKind::Reckless => "reckless",
            ConditionKind::Restrained => "restrained",
            ConditionKind::Stunned => "stunned",
            ConditionKind::Unconscious => "unconscious",
        };
        write!(f, "{}", s)
    }
}

/// A condition instance with its optional parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition {
    kind: ConditionKind,
    param: Option<u32>,
}

impl Condition {
    /// Create a condition, validating the parameter against the tag
    pub fn new(kind: ConditionKind, param: Option<u32>) -> Result<Self, ConditionError> {
        match (kind.param_rule(), param) {
            (_, None) | (ParamRule::Source, Some(_)) => {}
            (ParamRule::None, Some(_)) => return Err(ConditionError::ParamNotAccepted(kind)),
            (ParamRule::Level, Some(level)) => {
                if !(1..=MAX_EXHAUSTION).contains(&level) {
                    return Err(ConditionError::ParamOutOfRange { kind, param: level });
                }
            }
            (ParamRule::Variant, Some(flag)) => {
                if flag == 0 {
                    return Err(ConditionError::ParamOutOfRange { kind, param: flag });
                }
            }
        }
        Ok(Self { kind, param })
    }

    /// A parameterless condition
    pub fn bare(kind: ConditionKind) -> Self {
        Self { kind, param: None }
    }

    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn param(&self) -> Option<u32> {
        self.param
    }

    /// Source combatant for frightened/grappled
    pub fn source(&self) -> Option<u32> {
        match self.kind.param_rule() {
            ParamRule::Source => self.param,
            _ => None,
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, param) = match s.split_once(':') {
            Some((tag, param)) => (tag, Some(param)),
            None => (s, None),
        };
        let kind: ConditionKind = tag.parse()?;
        let param = match param {
            None => None,
            Some(raw) => {
                let raw = raw.trim();
                let value = raw.parse::<u32>().map_err(|_| ConditionError::MalformedParam {
                    tag: kind.to_string(),
                    param: raw.to_string(),
                })?;
                Some(value)
            }
        };
        Condition::new(kind, param)
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.param {
            Some(param) => write!(f, "{}:{}", self.kind, param),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Ordered set of conditions on one combatant, at most one per tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ConditionList {
    entries: Vec<Condition>,
}

impl ConditionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a wire list, rejecting the whole list on the first bad entry
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, ConditionError> {
        let mut list = Self::new();
        for entry in raw {
            list.add(entry.as_ref().parse()?);
        }
        Ok(list)
    }

    /// Add a condition. An existing entry with the same tag keeps its
    /// position and takes the new parameter. Returns true if the tag is new.
    pub fn add(&mut self, condition: Condition) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|c| c.kind == condition.kind) {
            existing.param = condition.param;
            false
        } else {
            self.entries.push(condition);
            true
        }
    }

    /// Remove every entry with this tag. Returns true if anything was removed.
    pub fn remove(&mut self, kind: ConditionKind) -> bool {
        let before = self.entries.len();
        self.entries.retain(|c| c.kind != kind);
        self.entries.len() != before
    }

    /// Exact tag match, ignoring any parameter
    pub fn has(&self, kind: ConditionKind) -> bool {
        self.entries.iter().any(|c| c.kind == kind)
    }

    pub fn get(&self, kind: ConditionKind) -> Option<&Condition> {
        self.entries.iter().find(|c| c.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current exhaustion level (0 if not exhausted; bare tag counts as 1)
    pub fn exhaustion_level(&self) -> u32 {
        self.get(ConditionKind::Exhaustion)
            .map(|c| c.param.unwrap_or(1))
            .unwrap_or(0)
    }

    /// Cannot take actions or reactions
    pub fn is_incapacitated(&self) -> bool {
        self.entries.iter().any(|c| c.kind.incapacitates())
    }

    pub fn can_move(&self) -> bool {
        !self.entries.iter().any(|c| c.kind.prevents_movement())
    }

    /// Saving throws of this ability fail without a roll
    pub fn auto_fails_save(&self, ability: Ability) -> bool {
        if self.has(ConditionKind::Unconscious) {
            return true;
        }
        ability.is_physical()
            && (self.has(ConditionKind::Paralyzed) || self.has(ConditionKind::Stunned))
    }

    /// Any hit from a melee attack against this bearer is a critical
    pub fn is_auto_crit(&self, melee: bool) -> bool {
        melee && (self.has(ConditionKind::Paralyzed) || self.has(ConditionKind::Unconscious))
    }

    /// Saving throws are rolled with disadvantage
    pub fn save_disadvantage(&self) -> bool {
        self.has(ConditionKind::Restrained)
            || self
                .get(ConditionKind::Poisoned)
                .is_some_and(|c| c.param.is_some())
            || self.exhaustion_level() >= 3
    }

    /// Ability checks are rolled with disadvantage
    pub fn check_disadvantage(&self) -> bool {
        self.has(ConditionKind::Frightened)
            || self.has(ConditionKind::Poisoned)
            || self.exhaustion_level() >= 1
    }

    /// Roll mode imposed on this bearer's own attacks
    pub fn attacker_mode(&self) -> AdvantageMode {
        AdvantageMode::combine(self.attacker_sources())
    }

    /// Every advantage/disadvantage source on this bearer's own attacks
    pub fn attacker_sources(&self) -> Vec<AdvantageMode> {
        let mut modes = Vec::new();
        if self.has(ConditionKind::Invisible)
            || (self.has(ConditionKind::Raging) && self.has(ConditionKind::Reckless))
        {
            modes.push(AdvantageMode::Advantage);
        }
        if self.has(ConditionKind::Blinded)
            || self.has(ConditionKind::Frightened)
            || self.has(ConditionKind::Poisoned)
            || self.has(ConditionKind::Prone)
            || self.has(ConditionKind::Restrained)
            || self.exhaustion_level() >= 3
        {
            modes.push(AdvantageMode::Disadvantage);
        }
        modes
    }

    /// Roll mode imposed on attacks made against this bearer
    pub fn defender_mode(&self, melee: bool) -> AdvantageMode {
        AdvantageMode::combine(self.defender_sources(melee))
    }

    /// Every advantage/disadvantage source on attacks against this bearer
    pub fn defender_sources(&self, melee: bool) -> Vec<AdvantageMode> {
        let mut modes = Vec::new();
        if self.has(ConditionKind::Blinded)
            || self.has(ConditionKind::Paralyzed)
            || self.has(ConditionKind::Petrified)
            || self.has(ConditionKind::Restrained)
            || self.has(ConditionKind::Stunned)
            || self.has(ConditionKind::Unconscious)
            || self.has(ConditionKind::Reckless)
        {
            modes.push(AdvantageMode::Advantage);
        }
        if self.has(ConditionKind::Prone) {
            modes.push(if melee {
                AdvantageMode::Advantage
            } else {
                AdvantageMode::Disadvantage
            });
        }
        if self.has(ConditionKind::Invisible)
            || (self.has(ConditionKind::Dodging) && !self.is_incapacitated())
        {
            modes.push(AdvantageMode::Disadvantage);
        }
        modes
    }
}

impl TryFrom<Vec<String>> for ConditionList {
    type Error = ConditionError;

    fn try_from(raw: Vec<String>) -> Result<Self, Self::Error> {
        ConditionList::parse(&raw)
    }
}

impl From<ConditionList> for Vec<String> {
    fn from(list: ConditionList) -> Self {
        list.entries.iter().map(|c| c.to_string()).collect()
    }
}
