//! Encounter API endpoints
//!
//! Every mutating route accepts `?expected_version=N` and answers with the
//! committed version alongside its result:
//! - 412 when `expected_version` no longer matches
//! - 409 when the combat state forbids the operation
//! - 400 for malformed input

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::combat::{Combatant, CombatantId, Condition, ConditionKind, Roller};
use crate::encounter::{
    AttackRequest, CheckRequest, ContestRequest, Encounter, NewCombatant, SaveRequest,
};
use crate::error::EngineResult;
use crate::ids::validate_id;

/// Create encounter routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/encounters", get(list_encounters).post(create_encounter))
        .route(
            "/encounters/{id}",
            get(get_encounter).delete(delete_encounter),
        )
        .route("/encounters/{id}/events", get(list_events))
        .route("/encounters/{id}/combatants", post(add_combatant))
        .route("/encounters/{id}/combatants/{cid}", delete(remove_combatant))
        .route("/encounters/{id}/combatants/{cid}/conditions", post(add_condition))
        .route(
            "/encounters/{id}/combatants/{cid}/conditions/{tag}",
            delete(remove_condition),
        )
        .route("/encounters/{id}/combatants/{cid}/damage", post(apply_damage))
        .route("/encounters/{id}/combatants/{cid}/heal", post(heal))
        .route(
            "/encounters/{id}/combatants/{cid}/concentration",
            post(start_concentration).delete(end_concentration),
        )
        .route("/encounters/{id}/combat/start", post(start_combat))
        .route("/encounters/{id}/combat/advance", post(advance_turn))
        .route("/encounters/{id}/combat/end", post(end_combat))
        .route("/encounters/{id}/attack", post(attack))
        .route("/encounters/{id}/check", post(check))
        .route("/encounters/{id}/save", post(saving_throw))
        .route("/encounters/{id}/contest", post(contest))
        .route("/encounters/{id}/participants", post(add_participant))
        .route("/encounters/{id}/participants/{pid}/act", post(participant_act))
}

/// Optimistic concurrency guard for mutating routes
#[derive(Debug, Default, Deserialize)]
struct VersionQuery {
    expected_version: Option<u64>,
}

/// A committed change
#[derive(Debug, Serialize)]
struct Committed<T> {
    version: u64,
    result: T,
}

/// Commit `apply` against encounter `id` and wrap its result
async fn commit<T, F>(
    state: &AppState,
    id: &str,
    query: VersionQuery,
    apply: F,
) -> Result<Json<Committed<T>>, ApiError>
where
    F: FnOnce(&mut Encounter, &mut dyn Roller, DateTime<Utc>) -> EngineResult<T> + Send,
    T: Send,
{
    let id = validate_id(id)?;
    let now = Utc::now();
    let (result, version) = state
        .registry
        .mutate(&id, query.expected_version, now, |encounter, roller| {
            apply(encounter, roller, now)
        })
        .await?;
    Ok(Json(Committed { version, result }))
}

#[derive(Debug, Deserialize)]
struct CreateEncounterRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
}

/// GET /encounters
async fn list_encounters(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

/// POST /encounters
async fn create_encounter(
    State(state): State<AppState>,
    Json(req): Json<CreateEncounterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let encounter = state
        .registry
        .create(req.id.as_deref(), &req.name, now)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(encounter.view(now, &state.thresholds)),
    ))
}

/// GET /encounters/{id}
async fn get_encounter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let encounter = state.registry.get(&validate_id(&id)?).await?;
    Ok(Json(encounter.view(Utc::now(), &state.thresholds)))
}

/// DELETE /encounters/{id}
async fn delete_encounter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&validate_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    since: u64,
}

/// GET /encounters/{id}/events?since=N
async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let encounter = state.registry.get(&validate_id(&id)?).await?;
    Ok(Json(encounter.events().since(query.since)))
}

/// POST /encounters/{id}/combatants
async fn add_combatant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(new): Json<NewCombatant>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = commit(&state, &id, query, |enc, roller, now| {
        enc.add_combatant(new, roller, now)
    })
    .await?;
    Ok((StatusCode::CREATED, committed))
}

/// DELETE /encounters/{id}/combatants/{cid}
async fn remove_combatant(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, CombatantId)>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Committed<Combatant>>, ApiError> {
    commit(&state, &id, query, |enc, _, now| enc.remove_combatant(cid, now)).await
}

#[derive(Debug, Deserialize)]
struct ConditionRequest {
    /// Tag form, e.g. `"prone"` or `"exhaustion:2"`
    condition: String,
}

#[derive(Debug, Serialize)]
struct ConditionChange {
    changed: bool,
    conditions: Vec<String>,
}

fn condition_change(enc: &Encounter, cid: CombatantId, changed: bool) -> EngineResult<ConditionChange> {
    let conditions: Vec<String> = enc.combatant(cid)?.conditions.clone().into();
    Ok(ConditionChange {
        changed,
        conditions,
    })
}

/// POST /encounters/{id}/combatants/{cid}/conditions
async fn add_condition(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, CombatantId)>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<ConditionRequest>,
) -> Result<Json<Committed<ConditionChange>>, ApiError> {
    let condition: Condition = req.condition.parse()?;
    commit(&state, &id, query, |enc, _, now| {
        let added = enc.add_condition(cid, condition, now)?;
        condition_change(enc, cid, added)
    })
    .await
}

/// DELETE /encounters/{id}/combatants/{cid}/conditions/{tag}
async fn remove_condition(
    State(state): State<AppState>,
    Path((id, cid, tag)): Path<(String, CombatantId, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Committed<ConditionChange>>, ApiError> {
    let kind: ConditionKind = tag.parse()?;
    commit(&state, &id, query, |enc, _, now| {
        let removed = enc.remove_condition(cid, kind, now)?;
        condition_change(enc, cid, removed)
    })
    .await
}

#[derive(Debug, Deserialize)]
struct AmountRequest {
    amount: i32,
}

/// POST /encounters/{id}/combatants/{cid}/damage
async fn apply_damage(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, CombatantId)>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<AmountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, roller, now| {
        enc.apply_damage(cid, req.amount, roller, now)
    })
    .await
}

#[derive(Debug, Serialize)]
struct HealReport {
    healed: i32,
    hp: i32,
}

/// POST /encounters/{id}/combatants/{cid}/heal
async fn heal(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, CombatantId)>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<AmountRequest>,
) -> Result<Json<Committed<HealReport>>, ApiError> {
    commit(&state, &id, query, |enc, _, now| {
        let healed = enc.heal(cid, req.amount, now)?;
        let hp = enc.combatant(cid)?.hp;
        Ok(HealReport { healed, hp })
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ConcentrationRequest {
    effect: String,
}

#[derive(Debug, Serialize)]
struct ConcentrationChange {
    /// Effect that was held before this call, if any
    ended: Option<String>,
}

/// POST /encounters/{id}/combatants/{cid}/concentration
async fn start_concentration(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, CombatantId)>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<ConcentrationRequest>,
) -> Result<Json<Committed<ConcentrationChange>>, ApiError> {
    commit(&state, &id, query, |enc, _, now| {
        let ended = enc.start_concentration(cid, &req.effect, now)?;
        Ok(ConcentrationChange { ended })
    })
    .await
}

/// DELETE /encounters/{id}/combatants/{cid}/concentration
async fn end_concentration(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, CombatantId)>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<Committed<ConcentrationChange>>, ApiError> {
    commit(&state, &id, query, |enc, _, now| {
        let ended = enc.end_concentration(cid, now)?;
        Ok(ConcentrationChange { ended })
    })
    .await
}

/// POST /encounters/{id}/combat/start
async fn start_combat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, roller, now| {
        enc.start_combat(roller, now)?;
        Ok(enc.combat_view())
    })
    .await
}

/// POST /encounters/{id}/combat/advance
async fn advance_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, _, now| enc.advance_turn(now)).await
}

/// POST /encounters/{id}/combat/end
async fn end_combat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, _, now| {
        enc.end_combat(now)?;
        Ok(enc.combat_view())
    })
    .await
}

/// POST /encounters/{id}/attack
async fn attack(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<AttackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, roller, now| {
        enc.attack(&req, roller, now)
    })
    .await
}

/// POST /encounters/{id}/check
async fn check(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<CheckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, roller, now| {
        enc.check(&req, roller, now)
    })
    .await
}

/// POST /encounters/{id}/save
async fn saving_throw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<SaveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, roller, now| {
        enc.saving_throw(&req, roller, now)
    })
    .await
}

/// POST /encounters/{id}/contest
async fn contest(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<ContestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    commit(&state, &id, query, |enc, roller, now| {
        enc.contest(&req, roller, now)
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ParticipantRequest {
    id: String,
    name: String,
    #[serde(default)]
    combatant_id: Option<CombatantId>,
}

/// POST /encounters/{id}/participants
async fn add_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<ParticipantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let committed = commit(&state, &id, query, |enc, _, now| {
        enc.add_participant(&req.id, &req.name, req.combatant_id, now)
    })
    .await?;
    Ok((StatusCode::CREATED, committed))
}

/// POST /encounters/{id}/participants/{pid}/act
async fn participant_act(
    State(state): State<AppState>,
    Path((id, pid)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pid = validate_id(&pid)?;
    commit(&state, &id, query, |enc, roller, now| {
        enc.participant_act(&pid, roller, now)
    })
    .await
}
