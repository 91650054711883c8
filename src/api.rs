//! HTTP API served by `rsvp-notify serve`.

use crate::core::{Channel, DeliveryRecord, NotificationSettings};
use crate::notification::{Announcement, AnnouncementSender, BulkSummary, Dispatcher, ReminderSender};
use crate::roster::{Roster, RosterStore};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Shared state for all handlers.
pub struct ApiState {
    pub rosters: RosterStore,
    pub dispatcher: Dispatcher,
    pub reminders: ReminderSender,
    pub announcements: AnnouncementSender,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unknown wedding '{0}'")]
    UnknownWedding(String),

    #[error("unknown guest '{0}'")]
    UnknownGuest(String),

    #[error("guest '{0}' has no usable channel")]
    NoChannel(String),

    #[error("{0}")]
    Invalid(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::UnknownWedding(_) | ApiError::UnknownGuest(_) | ApiError::NoChannel(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InviteRequest {
    #[serde(default)]
    pub guest_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub guest_id: String,
    pub channel: Channel,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/weddings/{id}/guests/{guest_id}/channel",
            get(resolve_channel),
        )
        .route("/api/weddings/{id}/invitations", post(send_invitations))
        .route("/api/weddings/{id}/reminders", post(send_reminders))
        .route("/api/weddings/{id}/announcements", post(send_announcement))
        .route("/api/weddings/{id}/deliveries", get(list_deliveries))
        .route("/api/weddings/{id}/settings", put(update_settings))
        .with_state(state)
}

fn roster(state: &ApiState, wedding_id: &str) -> Result<Arc<Roster>, ApiError> {
    state
        .rosters
        .get(wedding_id)
        .ok_or_else(|| ApiError::UnknownWedding(wedding_id.to_string()))
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rsvp-notify",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn resolve_channel(
    State(state): State<Arc<ApiState>>,
    Path((id, guest_id)): Path<(String, String)>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let roster = roster(&state, &id)?;
    let guest = roster
        .guest(&guest_id)
        .ok_or_else(|| ApiError::UnknownGuest(guest_id.clone()))?;
    let channel = state
        .dispatcher
        .resolve_channel(&roster.wedding, guest)
        .ok_or_else(|| ApiError::NoChannel(guest_id.clone()))?;
    Ok(Json(ChannelResponse { guest_id, channel }))
}

async fn send_invitations(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    request: Option<Json<InviteRequest>>,
) -> Result<Json<BulkSummary>, ApiError> {
    let roster = roster(&state, &id)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let summary = state
        .dispatcher
        .send_invitations(&roster, request.guest_ids.as_deref())
        .await;
    Ok(Json(summary))
}

async fn send_reminders(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<BulkSummary>, ApiError> {
    let roster = roster(&state, &id)?;
    Ok(Json(state.reminders.send_reminders(&roster).await))
}

async fn send_announcement(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(announcement): Json<Announcement>,
) -> Result<Json<BulkSummary>, ApiError> {
    let roster = roster(&state, &id)?;
    if announcement.subject.trim().is_empty() || announcement.body.trim().is_empty() {
        return Err(ApiError::Invalid(
            "announcement subject and body must not be empty".into(),
        ));
    }
    Ok(Json(state.announcements.send(&roster, &announcement).await))
}

async fn list_deliveries(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DeliveryRecord>>, ApiError> {
    roster(&state, &id)?;
    Ok(Json(state.dispatcher.delivery_log().records_for(&id).await))
}

async fn update_settings(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(settings): Json<NotificationSettings>,
) -> Result<StatusCode, ApiError> {
    if settings.enabled_channels.is_empty() {
        return Err(ApiError::Invalid("at least one channel must be enabled".into()));
    }
    if !state.rosters.update_settings(&id, settings) {
        return Err(ApiError::UnknownWedding(id));
    }
    info!(wedding_id = %id, "Notification settings updated");
    Ok(StatusCode::NO_CONTENT)
}

/// Serves the API until a shutdown signal is received.
pub struct ApiServer {
    listener: TcpListener,
    state: Arc<ApiState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    pub fn new(listener: TcpListener, state: Arc<ApiState>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            listener,
            state,
            shutdown_rx,
        }
    }

    pub fn run(self) -> impl Future<Output = ()> {
        let app = router(self.state);
        let mut shutdown_rx = self.shutdown_rx;
        let listener = self.listener;
        async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                error!("API server error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check().await.0;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "rsvp-notify");
    }

    #[test]
    fn test_error_status_codes() {
        let unknown = ApiError::UnknownWedding("w9".into()).into_response();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        let invalid = ApiError::Invalid("bad".into()).into_response();
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
