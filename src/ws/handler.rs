//! WebSocket session handling
//!
//! One session = one ClientId. The socket authenticates with a token whose
//! persistent id survives reconnects; the first join message binds the
//! session to a game on this worker. From there the session is a thin pipe:
//! client messages become intents/heartbeats, and the game's broadcasts
//! stream back out.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::server::ClientConn;
use crate::game::{ClientId, GameId, Intent};
use crate::http::middleware::verify_token;
use crate::util::rate_limit::SocketRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Auth token carrying the persistent id
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify the token before upgrading
    match verify_token(&query.token, &state.config.token_secret) {
        Ok(persistent_id) => {
            debug!(worker_id = state.worker_id, "WebSocket upgrade for verified client");
            ws.on_upgrade(move |socket| handle_socket(socket, persistent_id, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            Response::builder()
                .status(401)
                .body("Unauthorized".into())
                .unwrap()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, persistent_id: String, state: AppState) {
    let client_id = ClientId::new(Uuid::new_v4().to_string());
    info!(client_id = %client_id, "new WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMsg>();

    // Writer task: game broadcasts -> socket
    let writer_client_id = client_id.clone();
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(client_id = %writer_client_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = SocketRateLimiter::new();
    let mut joined_game: Option<GameId> = None;

    // Reader loop: socket -> game pool
    while let Some(result) = ws_stream.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "client initiated close");
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "binary message ignored");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        };

        if !rate_limiter.check_msg() {
            warn!(client_id = %client_id, "rate limited message");
            continue;
        }

        let client_msg = match serde_json::from_str::<ClientMsg>(&msg) {
            Ok(m) => m,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "failed to parse client message");
                continue;
            }
        };

        match client_msg {
            ClientMsg::Join { game_id, username } => {
                if joined_game.is_some() {
                    let _ = tx.send(ServerMsg::Error {
                        code: "already_joined".to_string(),
                        message: "connection is already bound to a game".to_string(),
                    });
                    continue;
                }
                let conn = ClientConn {
                    client_id: client_id.clone(),
                    persistent_id: persistent_id.clone(),
                    username: sanitize_username(&username),
                    tx: tx.clone(),
                };
                match state.manager.join(game_id.clone(), conn).await {
                    Ok(()) => {
                        joined_game = Some(game_id);
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, game_id = %game_id, error = %e, "join rejected");
                        let _ = tx.send(ServerMsg::Error {
                            code: "join_failed".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            ClientMsg::Intent { intent } => match &joined_game {
                Some(game_id) => {
                    state.manager.intent(
                        game_id.clone(),
                        Intent {
                            client_id: client_id.clone(),
                            body: intent,
                        },
                    );
                }
                None => {
                    debug!(client_id = %client_id, "intent before join dropped");
                }
            },
            ClientMsg::Heartbeat => {
                if let Some(game_id) = &joined_game {
                    state.manager.heartbeat(game_id.clone(), client_id.clone());
                }
            }
            ClientMsg::Ping { t } => {
                let _ = tx.send(ServerMsg::Pong { t });
            }
        }
    }

    // Cleanup on disconnect; the liveness sweep handles aliveness.
    if let Some(game_id) = joined_game {
        state.manager.leave(game_id, client_id.clone());
    }
    writer_handle.abort();

    info!(client_id = %client_id, "WebSocket connection closed");
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

fn sanitize_username(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "Anonymous".to_string();
    }
    trimmed.chars().take(24).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_trimmed_and_capped() {
        assert_eq!(sanitize_username("  alice  "), "alice");
        assert_eq!(sanitize_username(""), "Anonymous");
        assert_eq!(sanitize_username("   "), "Anonymous");
        assert_eq!(sanitize_username(&"x".repeat(100)).len(), 24);
    }
}
