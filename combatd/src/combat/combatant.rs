//! Combatants
//!
//! A combatant is a character or monster taking part in an encounter:
//! hit points, armor class, ability scores and active conditions.

use serde::{Deserialize, Serialize};

use super::abilities::{Ability, AbilityScores};
use super::conditions::ConditionList;
use super::CombatantId;

/// What a combatant refers to outside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatantKind {
    #[default]
    Character,
    Monster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    pub name: String,
    #[serde(default)]
    pub kind: CombatantKind,
    /// Current hit points
    pub hp: i32,
    /// Maximum hit points
    pub max_hp: i32,
    /// Armor class
    pub armor_class: i32,
    #[serde(default)]
    pub abilities: AbilityScores,
    #[serde(default)]
    pub conditions: ConditionList,
    /// Rolled initiative; None until combat starts or the combatant joins
    #[serde(default)]
    pub initiative: Option<i32>,
}

impl Combatant {
    /// Create a combatant at full health with no conditions
    pub fn new(id: CombatantId, name: impl Into<String>, max_hp: i32, armor_class: i32) -> Self {
        Self {
            id,
            name: name.into(),
            kind: CombatantKind::Character,
            hp: max_hp,
            max_hp,
            armor_class,
            abilities: AbilityScores::default(),
            conditions: ConditionList::new(),
            initiative: None,
        }
    }

    pub fn with_kind(mut self, kind: CombatantKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_abilities(mut self, abilities: AbilityScores) -> Self {
        self.abilities = abilities;
        self
    }

    pub fn modifier(&self, ability: Ability) -> i32 {
        self.abilities.modifier(ability)
    }

    pub fn dex_modifier(&self) -> i32 {
        self.modifier(Ability::Dexterity)
    }

    /// Check if combatant is down
    pub fn is_down(&self) -> bool {
        self.hp <= 0
    }

    /// Take damage, stopping at 0 HP. Returns HP actually lost.
    pub fn take_damage(&mut self, amount: i32) -> i32 {
        let actual = amount.max(0).min(self.hp.max(0));
        self.hp -= actual;
        actual
    }

    /// Heal (cannot exceed max_hp). Returns HP actually restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let actual = amount.max(0).min((self.max_hp - self.hp).max(0));
        self.hp += actual;
        actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_and_heal() {
        let mut goblin = Combatant::new(1, "goblin", 7, 15).with_kind(CombatantKind::Monster);

        assert_eq!(goblin.take_damage(5), 5);
        assert_eq!(goblin.hp, 2);
        assert!(!goblin.is_down());

        // Can't go below zero
        assert_eq!(goblin.take_damage(10), 2);
        assert_eq!(goblin.hp, 0);
        assert!(goblin.is_down());

        assert_eq!(goblin.heal(3), 3);
        // Can't overheal
        assert_eq!(goblin.heal(50), 4);
        assert_eq!(goblin.hp, 7);
    }

    #[test]
    fn test_negative_amounts_ignored() {
        let mut hero = Combatant::new(2, "hero", 10, 12);
        assert_eq!(hero.take_damage(-4), 0);
        assert_eq!(hero.heal(-4), 0);
        assert_eq!(hero.hp, 10);
    }

    #[test]
    fn test_serde_defaults() {
        let json = r#"{"id":3,"name":"ogre","hp":59,"max_hp":59,"armor_class":11,
                       "conditions":["prone","exhaustion:2"]}"#;
        let ogre: Combatant = serde_json::from_str(json).unwrap();
        assert_eq!(ogre.kind, CombatantKind::Character);
        assert_eq!(ogre.abilities, AbilityScores::default());
        assert_eq!(ogre.conditions.exhaustion_level(), 2);
        assert_eq!(ogre.initiative, None);
    }
}
