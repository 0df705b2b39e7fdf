//! HTTP API for room state and moderation.
//!
//! This is the operator-facing surface; real-time traffic (join,
//! events, votes, reactions) flows through the transport layer holding
//! `RoomHandle`s directly. Endpoints:
//!
//! - `GET  /status` - coordinator status
//! - `GET  /rooms/:room_id` - durable-state snapshot
//! - `GET  /rooms/:room_id/participants` - roster only
//! - `POST /rooms/:room_id/moderation/permission` - toggle publish
//! - `POST /rooms/:room_id/moderation/remove` - remove a participant
//! - `POST /rooms/:room_id/end` - end the room
//!
//! Errors map to JSON `{"error": ...}` with the status from
//! [`RoomError::status_code`]; internal detail never leaks to clients.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::actors::RoomRegistryHandle;
use crate::errors::RoomError;
use crate::events::{ParticipantInfo, RoomSnapshot};

/// Shared state for API handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub registry: RoomRegistryHandle,
    pub coordinator_id: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.client_message() }));
        (status, body).into_response()
    }
}

/// Build the API router.
pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(coordinator_status))
        .route("/rooms/:room_id", get(room_snapshot))
        .route("/rooms/:room_id/participants", get(room_participants))
        .route(
            "/rooms/:room_id/moderation/permission",
            post(set_publish_permission),
        )
        .route("/rooms/:room_id/moderation/remove", post(remove_participant))
        .route("/rooms/:room_id/end", post(end_room))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CoordinatorStatus {
    coordinator_id: String,
    room_count: usize,
    session_count: usize,
    accepting_new: bool,
}

async fn coordinator_status(
    State(state): State<ApiState>,
) -> Result<Json<CoordinatorStatus>, RoomError> {
    let status = state.registry.status().await?;
    Ok(Json(CoordinatorStatus {
        coordinator_id: state.coordinator_id,
        room_count: status.room_count,
        session_count: status.session_count,
        accepting_new: status.accepting_new,
    }))
}

async fn room_snapshot(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, RoomError> {
    let room = state.registry.get(&room_id).await?;
    Ok(Json(room.snapshot().await?))
}

async fn room_participants(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<ParticipantInfo>>, RoomError> {
    let room = state.registry.get(&room_id).await?;
    Ok(Json(room.snapshot().await?.participants))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionRequest {
    requester: String,
    target: String,
    can_publish: bool,
}

async fn set_publish_permission(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<PermissionRequest>,
) -> Result<StatusCode, RoomError> {
    let room = state.registry.get(&room_id).await?;
    room.set_publish_permission(body.requester, body.target, body.can_publish)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveRequest {
    requester: String,
    target: String,
}

async fn remove_participant(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<RemoveRequest>,
) -> Result<StatusCode, RoomError> {
    let room = state.registry.get(&room_id).await?;
    room.remove_participant(body.requester, body.target).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndRequest {
    requester: String,
}

async fn end_room(
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<EndRequest>,
) -> Result<StatusCode, RoomError> {
    let room = state.registry.get(&room_id).await?;
    room.end_room(body.requester).await?;
    Ok(StatusCode::NO_CONTENT)
}
