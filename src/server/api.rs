//! HTTP handlers for the control surface

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::ami::{AmiError, ChannelSummary, ConnectionState};
use super::campaign::CampaignError;
use super::db::RepositoryError;
use super::AppState;
use crate::models::{AmdResultRequest, CallResultRequest, DialerStatus, TrunkHealth};

/// Error body returned by every failing handler
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<CampaignError> for ApiError {
    fn from(e: CampaignError) -> Self {
        let status = match &e {
            CampaignError::CampaignNotFound(_)
            | CampaignError::ContactNotFound(_)
            | CampaignError::Repository(RepositoryError::NotFound { .. }) => StatusCode::NOT_FOUND,
            CampaignError::AlreadyRunning(_)
            | CampaignError::InvalidState(_)
            | CampaignError::NoContacts(_)
            | CampaignError::TrunkUnavailable(_) => StatusCode::CONFLICT,
            CampaignError::ControlPlaneUnavailable | CampaignError::ControlPlane(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CampaignError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Campaign request failed: {}", e);
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<AmiError> for ApiError {
    fn from(e: AmiError) -> Self {
        tracing::warn!("Control-plane request failed: {}", e);
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: e.to_string(),
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct ControlPlaneStatus {
    state: ConnectionState,
    connected: bool,
    #[serde(rename = "reconnectAttempts")]
    reconnect_attempts: u32,
    #[serde(rename = "mediaSessions")]
    media_sessions: usize,
}

pub async fn control_plane_status(State(state): State<Arc<AppState>>) -> Json<ControlPlaneStatus> {
    Json(ControlPlaneStatus {
        state: state.ami.state(),
        connected: state.ami.is_connected(),
        reconnect_attempts: state.ami.reconnect_attempts(),
        media_sessions: state.sessions.len().await,
    })
}

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ChannelSummary>>, ApiError> {
    if !state.ami.is_connected() {
        return Err(AmiError::NotConnected.into());
    }
    Ok(Json(state.ami.channels().await))
}

pub async fn trunk_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<TrunkHealth>, ApiError> {
    Ok(Json(state.ami.trunk_health(&name).await?))
}

pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DialerStatus>, ApiError> {
    state.engine.start(id).await?;
    Ok(Json(state.engine.campaign_status(id).await?))
}

pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DialerStatus>, ApiError> {
    state.engine.pause(id).await?;
    Ok(Json(state.engine.campaign_status(id).await?))
}

pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DialerStatus>, ApiError> {
    state.engine.stop(id).await?;
    Ok(Json(state.engine.campaign_status(id).await?))
}

pub async fn campaign_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<DialerStatus>, ApiError> {
    Ok(Json(state.engine.campaign_status(id).await?))
}

pub async fn report_call_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CallResultRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .handle_call_result(req.contact_id, req.status, req.call_log_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn report_amd_result(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AmdResultRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .handle_amd_result(req.contact_id, req.verdict, req.call_log_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
