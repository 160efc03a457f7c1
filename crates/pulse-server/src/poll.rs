//! Long-poll fallback for clients that cannot hold a WebSocket open. Same
//! logical schema: batched `ClientMessage`s in, queued `ServerMessage`s
//! out, the session token carried in the body instead of a frame.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use pulse_core::{ClientMessage, ServerMessage};

use crate::handlers;
use crate::server::{verify_credential, AppState};

#[derive(Debug, Deserialize)]
pub struct PollRequest {
    pub session_token: Option<String>,
    pub credential: Option<String>,
    #[serde(default)]
    pub messages: Vec<ClientMessage>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub session_token: String,
    pub frames: Vec<ServerMessage>,
}

/// One poll round-trip: find or create the session, apply the batched
/// client messages, drain whatever accumulated. Every poll counts as a
/// heartbeat, so a polling client stays alive exactly as long as it keeps
/// polling.
pub async fn poll_handler(
    State(state): State<AppState>,
    Json(request): Json<PollRequest>,
) -> Response {
    let hub = &state.hub;

    let session = match request
        .session_token
        .as_deref()
        .and_then(|token| hub.registry().find_by_token(token))
    {
        Some(session) => {
            session.reattach(hub.now_ms());
            session
        }
        None => {
            let Some(identity) =
                verify_credential(&state.admin_credential, request.credential.as_deref())
            else {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({"error": "invalid_credential"})),
                )
                    .into_response();
            };
            match hub.register_session(identity) {
                Ok(session) => session,
                Err(err) => {
                    return (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(serde_json::json!({"error": err.kind()})),
                    )
                        .into_response();
                }
            }
        }
    };

    for message in request.messages {
        handlers::dispatch(hub, &state.gateway, &session, message);
    }

    let frames = session.queue.drain();
    Json(PollResponse {
        session_token: session.resume_token.clone(),
        frames,
    })
    .into_response()
}
