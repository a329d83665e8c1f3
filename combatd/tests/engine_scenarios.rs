//! Combat scenarios driven through the library with scripted dice

use chrono::{Duration, Utc};
use combatd::combat::{
    concentration_dc, Ability, Attack, Condition, ConditionKind, CombatPhase, CombatantId,
    FixedRoller,
};
use combatd::encounter::{AttackRequest, Encounter, NewCombatant, SaveRequest};
use combatd::escalation::{EscalationThresholds, Transition};

fn encounter() -> Encounter {
    Encounter::new("scenario", "Scenario", Utc::now()).unwrap()
}

fn join(enc: &mut Encounter, name: &str, hp: i32, ac: i32, initiative: i32) -> CombatantId {
    let mut roller = FixedRoller::new([]);
    enc.add_combatant(
        NewCombatant::new(name, hp, ac).with_initiative(initiative),
        &mut roller,
        Utc::now(),
    )
    .unwrap()
    .id
}

#[test]
fn natural_twenty_crits_through_any_armor() {
    let mut enc = encounter();
    let rogue = join(&mut enc, "rogue", 20, 14, 15);
    let golem = join(&mut enc, "golem", 40, 30, 5);

    // d20, then both damage dice
    let mut roller = FixedRoller::new([20, 4, 6]);
    let request = AttackRequest {
        attacker: rogue,
        target: golem,
        attack: Attack::new(0, "1d8+2".parse().unwrap()),
    };
    let report = enc.attack(&request, &mut roller, Utc::now()).unwrap();

    assert!(report.outcome.hit);
    assert!(report.outcome.critical);
    assert_eq!(report.outcome.damage_total(), 12);
    assert_eq!(enc.combatant(golem).unwrap().hp, 28);
}

#[test]
fn natural_one_misses_an_easy_target() {
    let mut enc = encounter();
    let knight = join(&mut enc, "knight", 20, 18, 15);
    let rat = join(&mut enc, "rat", 3, 5, 5);

    let mut roller = FixedRoller::new([1]);
    let request = AttackRequest {
        attacker: knight,
        target: rat,
        attack: Attack::new(10, "1d6".parse().unwrap()),
    };
    let report = enc.attack(&request, &mut roller, Utc::now()).unwrap();

    assert!(!report.outcome.hit);
    assert!(report.outcome.fumble);
    assert!(report.damage.is_none());
    assert_eq!(enc.combatant(rat).unwrap().hp, 3);
}

#[test]
fn melee_hit_on_paralyzed_target_is_critical() {
    let mut enc = encounter();
    let monk = join(&mut enc, "monk", 20, 15, 15);
    let mage = join(&mut enc, "mage", 30, 12, 5);
    let paralyzed: Condition = "paralyzed".parse().unwrap();
    enc.add_condition(mage, paralyzed, Utc::now()).unwrap();

    // Advantage from paralysis: two d20s, then doubled damage dice
    let mut roller = FixedRoller::new([8, 9, 3, 3]);
    let request = AttackRequest {
        attacker: monk,
        target: mage,
        attack: Attack::new(5, "1d6".parse().unwrap()),
    };
    let report = enc.attack(&request, &mut roller, Utc::now()).unwrap();

    assert!(report.outcome.attack_roll.used_advantage());
    assert!(report.outcome.hit);
    assert!(report.outcome.critical);
    assert_eq!(report.outcome.damage_total(), 6);

    // Paralysis also fails strength saves outright
    let save = enc
        .saving_throw(
            &SaveRequest {
                combatant: mage,
                ability: "str".into(),
                dc: 5,
                mode: Default::default(),
            },
            &mut FixedRoller::new([20]),
            Utc::now(),
        )
        .unwrap();
    assert!(save.auto_failed);
    assert!(!save.success);
    assert_eq!(save.ability, Ability::Strength);
}

#[test]
fn removing_the_acting_combatant_passes_the_turn() {
    let mut enc = encounter();
    let mut roller = FixedRoller::new([]);
    let a = join(&mut enc, "a", 10, 10, 20);
    let b = join(&mut enc, "b", 10, 10, 15);
    let c = join(&mut enc, "c", 10, 10, 10);
    join(&mut enc, "d", 10, 10, 5);

    let now = Utc::now();
    enc.start_combat(&mut roller, now).unwrap();
    assert_eq!(enc.combat().current(), Some(a));
    enc.advance_turn(now).unwrap();
    assert_eq!(enc.combat().current(), Some(b));

    enc.remove_combatant(b, now).unwrap();
    assert_eq!(enc.combat().current(), Some(c));
    assert_eq!(enc.combat().len(), 3);
    assert_eq!(enc.combat().round(), 1);
}

#[test]
fn rounds_advance_after_every_combatant_acts() {
    let mut enc = encounter();
    let mut roller = FixedRoller::new([]);
    let first = join(&mut enc, "first", 10, 10, 17);
    join(&mut enc, "second", 10, 10, 11);
    join(&mut enc, "third", 10, 10, 2);

    let now = Utc::now();
    enc.start_combat(&mut roller, now).unwrap();
    for round in 1..=4u32 {
        assert_eq!(enc.combat().round(), round);
        assert_eq!(enc.combat().current(), Some(first));
        let mut wrapped = false;
        for _ in 0..3 {
            wrapped = enc.advance_turn(now).unwrap().new_round;
        }
        assert!(wrapped);
    }
    assert_eq!(enc.combat().round(), 5);

    enc.end_combat(now).unwrap();
    assert_eq!(enc.combat().phase(), CombatPhase::Ended);
    assert!(enc.advance_turn(now).is_err());
}

#[test]
fn concentration_dc_scales_with_damage() {
    assert_eq!(concentration_dc(4), 10);
    assert_eq!(concentration_dc(20), 10);
    assert_eq!(concentration_dc(22), 11);
    assert_eq!(concentration_dc(40), 20);

    let mut enc = encounter();
    let cleric = join(&mut enc, "cleric", 60, 16, 12);
    let now = Utc::now();
    enc.start_concentration(cleric, "spirit guardians", now).unwrap();

    // Con save of 10 against DC 11 fails
    let report = enc
        .apply_damage(cleric, 22, &mut FixedRoller::new([10]), now)
        .unwrap();
    let concentration = report.concentration.unwrap();
    assert_eq!(concentration.dc, 11);
    assert!(!concentration.maintained);
    assert_eq!(enc.concentration().current(cleric), None);
}

#[test]
fn dropping_to_zero_ends_concentration_without_a_save() {
    let mut enc = encounter();
    let druid = join(&mut enc, "druid", 8, 12, 12);
    let now = Utc::now();
    enc.start_concentration(druid, "entangle", now).unwrap();

    let report = enc
        .apply_damage(druid, 8, &mut FixedRoller::new([20]), now)
        .unwrap();
    assert!(report.downed);
    let concentration = report.concentration.unwrap();
    assert!(concentration.save.is_none());
    assert!(!concentration.maintained);
    assert!(enc
        .combatant(druid)
        .unwrap()
        .conditions
        .has(ConditionKind::Unconscious));
}

#[test]
fn escalation_sweeps_are_idempotent() {
    let mut enc = encounter();
    let mut roller = FixedRoller::new([]);
    let idle = join(&mut enc, "idle", 10, 10, 18);
    let next = join(&mut enc, "next", 10, 10, 3);
    let start = Utc::now();
    enc.add_participant("ana", "Ana", Some(idle), start).unwrap();
    enc.start_combat(&mut roller, start).unwrap();

    let thresholds = EscalationThresholds::default();

    let nudge_time = start + Duration::hours(3);
    let applied = enc.sweep(nudge_time, &thresholds).unwrap();
    assert!(matches!(applied.as_slice(), [Transition::Nudge { combatant, .. }] if *combatant == idle));
    assert!(enc.sweep(nudge_time, &thresholds).unwrap().is_empty());

    let skip_time = start + Duration::hours(5);
    let applied = enc.sweep(skip_time, &thresholds).unwrap();
    assert!(matches!(applied.as_slice(), [Transition::AutoSkip { combatant, .. }] if *combatant == idle));
    assert!(enc.sweep(skip_time, &thresholds).unwrap().is_empty());
    assert_eq!(enc.combat().current(), Some(next));
    assert!(enc
        .combatant(idle)
        .unwrap()
        .conditions
        .has(ConditionKind::Dodging));
}
