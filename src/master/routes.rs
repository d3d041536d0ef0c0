//! Master control-plane routes

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use super::lobbies::LobbyScheduler;
use super::supervisor::WorkerSupervisor;
use crate::config::Config;
use crate::http::middleware::{check_admin, AuthError};
use crate::util::hash::worker_index;
use crate::util::time::uptime_secs;
use crate::ws::protocol::GameInfo;

#[derive(Clone)]
pub struct MasterState {
    pub config: Arc<Config>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub scheduler: Arc<LobbyScheduler>,
    pub http: reqwest::Client,
}

pub fn build_master_router(state: MasterState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/api/env", get(env_handler))
        .route("/api/public_lobbies", get(public_lobbies_handler));

    let admin_routes = Router::new()
        .route("/api/worker/ready/:worker_id", post(worker_ready_handler))
        .route(
            "/api/kick_player/:game_id/:client_id",
            post(kick_forward_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_admin(
    State(state): State<MasterState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    check_admin(request.headers(), &state.config.admin_token)?;
    Ok(next.run(request).await)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    workers_expected: usize,
    workers_ready: usize,
}

async fn health_handler(State(state): State<MasterState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        workers_expected: state.supervisor.expected_workers(),
        workers_ready: state.supervisor.ready_count(),
    })
}

#[derive(Serialize)]
struct EnvResponse {
    game_env: String,
}

async fn env_handler(State(state): State<MasterState>) -> Json<EnvResponse> {
    Json(EnvResponse {
        game_env: state.config.game_env.clone(),
    })
}

#[derive(Serialize)]
struct LobbiesResponse {
    lobbies: Vec<GameInfo>,
}

async fn public_lobbies_handler(State(state): State<MasterState>) -> Json<LobbiesResponse> {
    Json(LobbiesResponse {
        lobbies: state.scheduler.cached_lobbies(),
    })
}

async fn worker_ready_handler(
    State(state): State<MasterState>,
    Path(worker_id): Path<usize>,
) -> StatusCode {
    if state.supervisor.mark_ready(worker_id) {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Kicks are forwarded to the worker owning the game; the master holds no
/// game state of its own.
async fn kick_forward_handler(
    State(state): State<MasterState>,
    Path((game_id, client_id)): Path<(String, String)>,
) -> Response {
    let worker = worker_index(&game_id, state.config.num_workers);
    let url = format!(
        "{}/api/kick_player/{}/{}",
        state.config.worker_url(worker),
        game_id,
        client_id
    );
    let result = state
        .http
        .post(&url)
        .header(
            crate::http::middleware::ADMIN_TOKEN_HEADER,
            state.config.admin_token.clone(),
        )
        .send()
        .await;

    match result {
        Ok(resp) => {
            let status =
                StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let body = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                warn!(game_id = %game_id, client_id = %client_id, %status, "kick forward rejected by worker");
            }
            (status, body).into_response()
        }
        Err(e) => {
            error!(game_id = %game_id, client_id = %client_id, error = %e, "kick forward failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}
