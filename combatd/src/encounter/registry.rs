//! Encounter registry
//!
//! Holds every live encounter and serializes changes to each one:
//! - The id map sits behind a `parking_lot::RwLock` held only for lookups
//! - Each encounter sits behind its own `tokio::sync::Mutex`, held for the
//!   whole read-check-act of a mutation or sweep
//! - Callers may pass the version they last saw; a mismatch is rejected
//!   with `VersionConflict` and the caller re-reads
//! - Committed snapshots go to SQLite when a pool is configured
//! - New narration events are published on a broadcast channel

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::{Encounter, EncounterSummary, NarrationEvent, DEFAULT_EVENT_CAPACITY};
use crate::combat::{Roller, SecureRoller};
use crate::error::{EngineError, EngineResult};
use crate::escalation::EscalationThresholds;
use crate::ids::{generate_id, validate_id};

/// Produces the dice source for one mutation
pub type RollerFactory = Arc<dyn Fn() -> Box<dyn Roller + Send> + Send + Sync>;

/// Broadcast channel depth
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A narration event tagged with its encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncounterEvent {
    pub encounter: String,
    #[serde(flatten)]
    pub event: NarrationEvent,
}

type Handle = Arc<Mutex<Encounter>>;

pub struct EncounterRegistry {
    encounters: RwLock<HashMap<String, Handle>>,
    pool: Option<SqlitePool>,
    events: broadcast::Sender<EncounterEvent>,
    event_capacity: usize,
    roller: RollerFactory,
}

impl std::fmt::Debug for EncounterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncounterRegistry")
            .field("encounters", &self.encounters.read().len())
            .field("pool", &self.pool.is_some())
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl Default for EncounterRegistry {
    fn default() -> Self {
        Self::new(None, DEFAULT_EVENT_CAPACITY)
    }
}

impl EncounterRegistry {
    /// Create a registry; `pool` enables persistence
    pub fn new(pool: Option<SqlitePool>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            encounters: RwLock::new(HashMap::new()),
            pool,
            events,
            event_capacity,
            roller: Arc::new(|| Box::new(SecureRoller::new()) as Box<dyn Roller + Send>),
        }
    }

    /// Replace the dice source, e.g. with scripted rolls in tests
    pub fn with_roller(mut self, roller: RollerFactory) -> Self {
        self.roller = roller;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Receive every narration event committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EncounterEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.encounters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.encounters.read().is_empty()
    }

    fn handle(&self, id: &str) -> EngineResult<Handle> {
        self.encounters
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EncounterNotFound(id.to_string()))
    }

    fn is_registered(&self, id: &str, handle: &Handle) -> bool {
        self.encounters
            .read()
            .get(id)
            .is_some_and(|live| Arc::ptr_eq(live, handle))
    }

    /// Create an encounter; a random id is generated when none is given
    pub async fn create(
        &self,
        id: Option<&str>,
        name: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Encounter> {
        let id = match id {
            Some(raw) => validate_id(raw)?,
            None => generate_id(),
        };
        let mut encounter = Encounter::new(&id, name, now)?;
        encounter.events_mut().set_capacity(self.event_capacity);

        let handle = Arc::new(Mutex::new(encounter.clone()));
        // Hold the new encounter's lock until its first snapshot is written
        let guard = handle.lock().await;
        {
            let mut map = self.encounters.write();
            if map.contains_key(&id) {
                return Err(EngineError::EncounterExists(id));
            }
            map.insert(id.clone(), handle.clone());
        }
        self.persist(&guard).await;
        drop(guard);

        info!(encounter = %id, "encounter created");
        Ok(encounter)
    }

    /// Snapshot of one encounter
    pub async fn get(&self, id: &str) -> EngineResult<Encounter> {
        let handle = self.handle(id)?;
        let encounter = handle.lock().await;
        Ok(encounter.clone())
    }

    /// Summaries of every encounter, ordered by id
    pub async fn list(&self) -> Vec<EncounterSummary> {
        let handles: Vec<Handle> = self.encounters.read().values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.lock().await.summary());
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Forget an encounter and drop its snapshot
    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        let handle = self
            .encounters
            .write()
            .remove(id)
            .ok_or_else(|| EngineError::EncounterNotFound(id.to_string()))?;
        // Wait out any in-flight mutation so its snapshot is not left behind
        let _guard = handle.lock().await;

        if let Some(pool) = &self.pool {
            if let Err(e) = sqlx::query("DELETE FROM encounters WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
            {
                warn!(encounter = %id, error = %e, "failed to delete encounter snapshot");
            }
        }
        info!(encounter = %id, "encounter deleted");
        Ok(())
    }

    /// Run `apply` against a copy of the encounter and commit it on success.
    ///
    /// With `expected_version` set, the change is rejected unless the
    /// encounter is still at that version. Returns the closure's value and
    /// the new version.
    pub async fn mutate<T, F>(
        &self,
        id: &str,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
        apply: F,
    ) -> EngineResult<(T, u64)>
    where
        F: FnOnce(&mut Encounter, &mut dyn Roller) -> EngineResult<T> + Send,
        T: Send,
    {
        let handle = self.handle(id)?;
        let mut current = handle.lock().await;
        if !self.is_registered(id, &handle) {
            return Err(EngineError::EncounterNotFound(id.to_string()));
        }
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(EngineError::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }

        let mut draft = current.clone();
        let mark = draft.events().last_seq();
        let value = {
            let mut roller = (self.roller)();
            apply(&mut draft, roller.as_mut())?
        };
        let fresh = commit(&mut current, draft, mark, now);
        let version = current.version;
        self.persist(&current).await;
        drop(current);

        debug!(encounter = %id, version, "encounter updated");
        self.publish(id, fresh);
        Ok((value, version))
    }

    /// Apply due escalation to every encounter. Returns how many
    /// transitions took effect.
    pub async fn sweep(&self, now: DateTime<Utc>, thresholds: &EscalationThresholds) -> usize {
        let handles: Vec<(String, Handle)> = self
            .encounters
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut applied = 0;
        for (id, handle) in handles {
            let mut current = handle.lock().await;
            if !self.is_registered(&id, &handle) {
                continue;
            }
            // Decide on the state as it is now, under the lock
            let due = current.pending_transitions(now, thresholds);
            if due.is_empty() {
                continue;
            }

            let mut draft = current.clone();
            let mark = draft.events().last_seq();
            match draft.apply_transitions(&due, now) {
                Ok(done) if done.is_empty() => {}
                Ok(done) => {
                    applied += done.len();
                    let fresh = commit(&mut current, draft, mark, now);
                    self.persist(&current).await;
                    drop(current);
                    self.publish(&id, fresh);
                }
                Err(e) => {
                    warn!(encounter = %id, error = %e, "escalation failed; encounter unchanged");
                }
            }
        }
        applied
    }

    /// Load persisted snapshots. Unreadable rows are skipped with a warning.
    pub async fn load_from_db(&self) -> EngineResult<usize> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, state FROM encounters")
            .fetch_all(pool)
            .await?;

        let mut loaded = 0;
        for (id, state) in rows {
            let mut encounter: Encounter = match serde_json::from_str(&state) {
                Ok(encounter) => encounter,
                Err(e) => {
                    warn!(encounter = %id, error = %e, "skipping unreadable encounter snapshot");
                    continue;
                }
            };
            encounter.events_mut().set_capacity(self.event_capacity);
            let mut map = self.encounters.write();
            if !map.contains_key(&id) {
                map.insert(id, Arc::new(Mutex::new(encounter)));
                loaded += 1;
            }
        }
        info!(count = loaded, "encounters loaded");
        Ok(loaded)
    }

    /// Write a snapshot. Failures are logged; the in-memory state stays
    /// authoritative.
    async fn persist(&self, encounter: &Encounter) {
        let Some(pool) = &self.pool else {
            return;
        };
        let state = match serde_json::to_string(encounter) {
            Ok(state) => state,
            Err(e) => {
                warn!(encounter = %encounter.id, error = %e, "failed to serialize encounter");
                return;
            }
        };
        let version = i64::try_from(encounter.version).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            INSERT INTO encounters (id, version, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                state = excluded.state,
                updated_at = excluded.updated_at
            WHERE excluded.version >= encounters.version
            "#,
        )
        .bind(&encounter.id)
        .bind(version)
        .bind(&state)
        .bind(encounter.created_at.to_rfc3339())
        .bind(encounter.updated_at.to_rfc3339())
        .execute(pool)
        .await;

        if let Err(e) = result {
            warn!(encounter = %encounter.id, error = %e, "failed to persist encounter");
        }
    }

    fn publish(&self, id: &str, events: Vec<NarrationEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(EncounterEvent {
                encounter: id.to_string(),
                event,
            });
        }
    }
}

/// Swap the draft in with a bumped version; returns the events it added
fn commit(
    slot: &mut Encounter,
    mut draft: Encounter,
    mark: u64,
    now: DateTime<Utc>,
) -> Vec<NarrationEvent> {
    draft.version = slot.version + 1;
    draft.updated_at = now;
    let fresh = draft.events().since(mark);
    *slot = draft;
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{FixedRoller, InitiativeEntry};
    use crate::db::test_utils::{encounter_rows, stored_version, test_pool};
    use crate::encounter::{EventKind, NewCombatant};
    use chrono::Duration;

    fn scripted(face: u32) -> RollerFactory {
        Arc::new(move || Box::new(FixedRoller::new([face])) as Box<dyn Roller + Send>)
    }

    async fn with_fighters(registry: &EncounterRegistry, id: &str, names: &[&str]) {
        let now = Utc::now();
        registry.create(Some(id), id, now).await.unwrap();
        for (i, name) in names.iter().enumerate() {
            let new = NewCombatant::new(*name, 10, 12).with_initiative(20 - i as i32);
            registry
                .mutate(id, None, now, move |enc, roller| {
                    enc.add_combatant(new, roller, now)
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = EncounterRegistry::default();
        let now = Utc::now();
        let created = registry.create(Some("Ambush"), "Ambush", now).await.unwrap();
        assert_eq!(created.id, "ambush");
        assert_eq!(created.version, 0);

        assert!(matches!(
            registry.create(Some("ambush"), "again", now).await,
            Err(EngineError::EncounterExists(_))
        ));
        assert!(matches!(
            registry.create(Some("x"), "bad", now).await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            registry.get("missing").await,
            Err(EngineError::EncounterNotFound(_))
        ));

        let generated = registry.create(None, "", now).await.unwrap();
        assert!(generated.id.starts_with("enc-"));
        assert_eq!(registry.len(), 2);
        let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids[0], "ambush");
    }

    #[tokio::test]
    async fn test_version_conflict() {
        let registry = EncounterRegistry::default().with_roller(scripted(10));
        with_fighters(&registry, "duel", &["a", "b"]).await;
        let version = registry.get("duel").await.unwrap().version;
        assert_eq!(version, 2);

        let now = Utc::now();
        let (_, v) = registry
            .mutate("duel", Some(2), now, |enc, roller| {
                enc.start_combat(roller, now).map(|_| ())
            })
            .await
            .unwrap();
        assert_eq!(v, 3);

        let stale = registry
            .mutate("duel", Some(2), now, |enc, _| enc.advance_turn(now))
            .await;
        assert!(matches!(
            stale,
            Err(EngineError::VersionConflict {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_state_untouched() {
        let registry = EncounterRegistry::default().with_roller(scripted(10));
        with_fighters(&registry, "brawl", &["a"]).await;
        let before = registry.get("brawl").await.unwrap();

        let now = Utc::now();
        let result = registry
            .mutate("brawl", None, now, |enc, roller| {
                // First change succeeds, second fails
                enc.add_combatant(NewCombatant::new("c", 5, 10), roller, now)?;
                enc.advance_turn(now)
            })
            .await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert_eq!(registry.get("brawl").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_advances_do_not_double_apply() {
        let registry = Arc::new(EncounterRegistry::default().with_roller(scripted(10)));
        with_fighters(&registry, "melee", &["a", "b", "c"]).await;
        let now = Utc::now();
        let (_, version) = registry
            .mutate("melee", None, now, |enc, roller| {
                enc.start_combat(roller, now).map(|_| ())
            })
            .await
            .unwrap();

        // Everyone races with the same expected version; exactly one wins
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .mutate("melee", Some(version), now, |enc, _| enc.advance_turn(now))
                    .await
            }));
        }
        let mut wins = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) => assert!(matches!(e, EngineError::VersionConflict { .. })),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.get("melee").await.unwrap().combat().current_turn(), 1);

        // Without a version every advance applies exactly once
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .mutate("melee", None, now, |enc, _| enc.advance_turn(now))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let melee = registry.get("melee").await.unwrap();
        assert_eq!(melee.combat().current_turn(), 0);
        assert_eq!(melee.combat().round(), 4);
        assert_eq!(melee.version, version + 9);
    }

    #[tokio::test]
    async fn test_sweep_skips_and_publishes() {
        let registry = EncounterRegistry::default().with_roller(scripted(10));
        with_fighters(&registry, "siege", &["slow", "fast"]).await;
        let start = Utc::now();
        registry
            .mutate("siege", None, start, |enc, roller| {
                enc.start_combat(roller, start).map(|_| ())
            })
            .await
            .unwrap();

        let mut rx = registry.subscribe();
        let thresholds = EscalationThresholds::default();
        let later = start + Duration::hours(5);
        assert_eq!(registry.sweep(later, &thresholds).await, 1);
        assert_eq!(registry.sweep(later, &thresholds).await, 0);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.encounter, "siege");
        assert_eq!(event.event.kind, EventKind::AutoSkip);

        let siege = registry.get("siege").await.unwrap();
        assert_eq!(siege.combat().current(), Some(2));
        assert!(siege.combat().was_auto_skipped(1));
    }

    #[tokio::test]
    async fn test_snapshots_survive_reload() {
        let pool = test_pool().await;
        let registry = EncounterRegistry::new(Some(pool.clone()), 16).with_roller(scripted(10));
        with_fighters(&registry, "keep", &["guard", "thief"]).await;
        let now = Utc::now();
        registry
            .mutate("keep", None, now, |enc, roller| {
                enc.start_combat(roller, now).map(|_| ())
            })
            .await
            .unwrap();
        assert_eq!(stored_version(&pool, "keep").await, Some(3));

        let reloaded = EncounterRegistry::new(Some(pool.clone()), 16);
        assert_eq!(reloaded.load_from_db().await.unwrap(), 1);
        let keep = reloaded.get("keep").await.unwrap();
        assert_eq!(keep, registry.get("keep").await.unwrap());
        assert!(keep.combat().is_active());

        registry.delete("keep").await.unwrap();
        assert_eq!(encounter_rows(&pool).await, 0);
        assert!(matches!(
            registry.mutate("keep", None, now, |_, _| Ok(())).await,
            Err(EngineError::EncounterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_is_skipped() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO encounters (id, version, state, created_at, updated_at)
             VALUES ('broken', 1, 'not json', 'x', 'x')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let registry = EncounterRegistry::new(Some(pool), DEFAULT_EVENT_CAPACITY);
        assert_eq!(registry.load_from_db().await.unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_turn_order_round_trips_through_json() {
        let now = Utc::now();
        let mut encounter = Encounter::new("json-check", "", now).unwrap();
        let mut dice = FixedRoller::new([10]);
        encounter
            .add_combatant(NewCombatant::new("a", 5, 10), &mut dice, now)
            .unwrap();
        encounter.start_combat(&mut dice, now).unwrap();
        let json = serde_json::to_string(&encounter).unwrap();
        let back: Encounter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, encounter);
        assert_eq!(
            back.combat().order(),
            &[InitiativeEntry::new(1, 10, 0)][..]
        );
    }
}
