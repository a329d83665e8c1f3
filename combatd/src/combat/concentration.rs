//! Concentration tracking
//!
//! A caster holds at most one concentration effect. Starting a new one
//! ends the old one. Damage forces a Constitution save against
//! `max(10, damage / 2)`; this module computes the DC and clears the
//! effect when the save fails. The save itself is rolled by the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::CombatantId;

/// Lowest concentration save DC
pub const MIN_CONCENTRATION_DC: i32 = 10;

/// DC of the concentration save forced by `damage`
pub fn concentration_dc(damage: i32) -> i32 {
    MIN_CONCENTRATION_DC.max(damage / 2)
}

/// A pending concentration save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationCheck {
    pub caster: CombatantId,
    pub effect: String,
    pub dc: i32,
}

/// Concentration held per caster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationTracker {
    holders: BTreeMap<CombatantId, String>,
}

impl ConcentrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin concentrating on `effect`, returning the effect it displaced
    pub fn start(&mut self, caster: CombatantId, effect: impl Into<String>) -> Option<String> {
        self.holders.insert(caster, effect.into())
    }

    /// Stop concentrating. Returns the ended effect, if any.
    pub fn end(&mut self, caster: CombatantId) -> Option<String> {
        self.holders.remove(&caster)
    }

    pub fn current(&self, caster: CombatantId) -> Option<&str> {
        self.holders.get(&caster).map(String::as_str)
    }

    pub fn is_concentrating(&self, caster: CombatantId) -> bool {
        self.holders.contains_key(&caster)
    }

    /// The save a caster must make after taking `damage`, or None if the
    /// caster holds nothing
    pub fn check(&self, caster: CombatantId, damage: i32) -> Option<ConcentrationCheck> {
        self.holders.get(&caster).map(|effect| ConcentrationCheck {
            caster,
            effect: effect.clone(),
            dc: concentration_dc(damage),
        })
    }

    /// Record a save outcome. A failure ends the effect.
    /// Returns whether concentration is maintained.
    pub fn record_save(&mut self, caster: CombatantId, saved: bool) -> bool {
        if !self.holders.contains_key(&caster) {
            return false;
        }
        if !saved {
            self.holders.remove(&caster);
        }
        saved
    }

    pub fn iter(&self) -> impl Iterator<Item = (CombatantId, &str)> {
        self.holders.iter().map(|(id, effect)| (*id, effect.as_str()))
    }
}
