//! Worker control-plane routes
//!
//! Every worker serves these under its /w{n} prefix. The master (and, for
//! private lobbies, clients routed by game id) calls them over plain HTTP.

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::game::server::GameError;
use crate::game::{ClientId, GameConfig, GameId};
use crate::http::middleware::require_admin;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::GameInfo;

/// Build one worker's router; the caller nests it under /w{n}.
pub fn build_worker_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.client_origin);

    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/api/env", get(env_handler))
        .route("/api/create_game/:game_id", post(create_game_handler))
        .route("/api/start_game/:game_id", post(start_game_handler))
        .route("/api/game/:game_id", get(game_info_handler))
        .route("/ws", get(ws_handler));

    let admin_routes = Router::new()
        .route(
            "/api/kick_player/:game_id/:client_id",
            post(kick_player_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn build_cors(client_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    if client_origin.trim() == "*" {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        let origins: Vec<header::HeaderValue> = client_origin
            .split(',')
            .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

// ============================================================================
// Health and environment
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    worker_id: usize,
    active_games: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let active_games = state.manager.list_games().await.len();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        worker_id: state.worker_id,
        active_games,
    })
}

#[derive(Serialize)]
struct EnvResponse {
    game_env: String,
}

async fn env_handler(State(state): State<AppState>) -> Json<EnvResponse> {
    Json(EnvResponse {
        game_env: state.config.game_env.clone(),
    })
}

// ============================================================================
// Game lifecycle endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameRequest {
    #[serde(default)]
    game_config: Option<GameConfig>,
}

async fn create_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
    body: Option<Json<CreateGameRequest>>,
) -> Result<Json<GameInfo>, AppError> {
    let config = body
        .and_then(|Json(req)| req.game_config)
        .unwrap_or_default();
    let info = state
        .manager
        .create_game(GameId::new(game_id), config)
        .await?;
    Ok(Json(info))
}

async fn start_game_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.manager.start_game(GameId::new(game_id)).await?;
    Ok(StatusCode::OK)
}

async fn game_info_handler(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<Json<GameInfo>, AppError> {
    match state.manager.game_info(GameId::new(game_id)).await {
        Some(info) => Ok(Json(info)),
        None => Err(AppError::from(GameError::NotFound)),
    }
}

#[derive(Serialize)]
struct KickResponse {
    kicked: bool,
}

async fn kick_player_handler(
    State(state): State<AppState>,
    Path((game_id, client_id)): Path<(String, String)>,
) -> Result<Json<KickResponse>, AppError> {
    let kicked = state
        .manager
        .kick(GameId::new(game_id), ClientId::new(client_id))
        .await;
    if !kicked {
        return Err(AppError::from(GameError::NotFound));
    }
    Ok(Json(KickResponse { kicked }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GameError> for AppError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::NotFound => AppError::NotFound(err.to_string()),
            GameError::AlreadyExists => AppError::Conflict(err.to_string()),
            GameError::Full | GameError::InProgress | GameError::Finished => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
