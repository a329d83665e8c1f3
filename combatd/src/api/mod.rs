//! HTTP API module - REST endpoints over the combat engine

mod encounters;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::combat::{roll_with_advantage, AdvantageMode, DiceRoll, RollResult, SecureRoller};
use crate::db::Database;
use crate::encounter::EncounterRegistry;
use crate::error::{EngineError, ErrorKind};
use crate::escalation::EscalationThresholds;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub registry: Arc<EncounterRegistry>,
    pub thresholds: EscalationThresholds,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<EncounterRegistry>,
        thresholds: EscalationThresholds,
    ) -> Self {
        Self {
            db,
            registry,
            thresholds,
        }
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
        .route("/roll", post(roll))
        .merge(encounters::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

/// Engine error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(EngineError);

impl<E: Into<EngineError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
            ErrorKind::InvalidState => (StatusCode::CONFLICT, "invalid_state"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::Conflict => (StatusCode::PRECONDITION_FAILED, "version_conflict"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: kind.to_string(),
            }),
        )
            .into_response()
    }
}

/// Root endpoint
async fn root() -> impl IntoResponse {
    Json(RootResponse {
        name: "combatd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "ok",
                encounters: state.registry.len(),
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database: "error",
                encounters: state.registry.len(),
            }),
        ),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    encounters: usize,
}

/// Stateless roll request, e.g. `{"expression": "1d20+5", "mode": "advantage"}`
#[derive(Debug, Deserialize)]
struct RollRequest {
    expression: String,
    #[serde(default)]
    mode: AdvantageMode,
}

/// POST /roll
async fn roll(Json(request): Json<RollRequest>) -> Result<Json<RollResult>, ApiError> {
    let dice: DiceRoll = request.expression.parse()?;
    let mut roller = SecureRoller::new();
    let result = match request.mode {
        AdvantageMode::Normal => dice.roll(&mut roller),
        mode if dice.count == 1 => roll_with_advantage(&mut roller, dice.sides, dice.modifier, mode)?,
        mode => {
            return Err(EngineError::Validation(format!(
                "{} applies to a single die, not {}",
                mode, dice
            ))
            .into())
        }
    };
    Ok(Json(result))
}
