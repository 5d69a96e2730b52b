//! Server-side code for the PBX bridge
//!
//! This module contains all backend functionality:
//! - Control-plane client for the switch (manager interface)
//! - AudioSocket media server and per-call sessions
//! - Voice activity and barge-in detection
//! - Campaign dialer
//! - Persistence (PostgreSQL via sqlx, or in memory)
//! - HTTP control surface
#![allow(dead_code)]

pub mod ami;
pub mod api;
pub mod audiosocket;
pub mod campaign;
pub mod config;
pub mod db;
pub mod voice;


use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ami::AmiClient;
use audiosocket::{MediaSession, MediaSocketServer, SessionRegistry};
use campaign::{CampaignEngine, ControlPlane};
use config::AppConfig;
use db::{MemoryStore, PgRepository, Repositories};
use voice::{CallAudioEvent, MonitorConfig};

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub engine: CampaignEngine,
    pub ami: AmiClient,
    pub repos: Repositories,
    pub sessions: SessionRegistry,
}

/// Create the Axum router with all API routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api::health_check))

        // Control plane
        .route("/api/control-plane/status", get(api::control_plane_status))
        .route("/api/channels", get(api::list_channels))
        .route("/api/trunks/{name}/status", get(api::trunk_status))

        // Campaign dialer
        .route("/api/campaigns/{id}/start", post(api::start_campaign))
        .route("/api/campaigns/{id}/pause", post(api::pause_campaign))
        .route("/api/campaigns/{id}/stop", post(api::stop_campaign))
        .route("/api/campaigns/{id}/status", get(api::campaign_status))

        // Call outcomes reported by the dialplan and the AI layer
        .route("/api/calls/result", post(api::report_call_result))
        .route("/api/calls/amd", post(api::report_amd_result))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Initialize and start the server
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let repos = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url).await?;

            // Run migrations (non-fatal if already applied)
            if let Err(e) = db::run_migrations(&pool).await {
                tracing::warn!("Migration warning (may be already applied): {}", e);
            }
            Repositories::from_store(Arc::new(PgRepository::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, campaign data is kept in memory only");
            Repositories::from_store(Arc::new(MemoryStore::new()))
        }
    };

    // Control plane. Subscribe first so the engine sees the connect notice.
    let ami = AmiClient::new(config.ami.clone());
    let control_events = ami.subscribe();
    if ami.connect().await.is_err() {
        tracing::warn!("Starting without a control-plane connection; retrying in the background");
        ami.connect_in_background();
    }

    let control: Arc<dyn ControlPlane> = Arc::new(ami.clone());
    let engine = CampaignEngine::new(repos.clone(), control, config.dialer.clone());
    // Campaigns stored as running resume on the first Connected notice
    engine.attach_control_events(control_events);

    // Media
    let sessions = SessionRegistry::new();
    let media = MediaSocketServer::bind(&config.media, sessions.clone()).await?;
    let media_shutdown = media.shutdown_token();
    let (session_tx, session_rx) = mpsc::channel(64);
    tokio::spawn(media.serve(session_tx));
    tokio::spawn(monitor_sessions(session_rx, MonitorConfig::default()));

    let state = AppState {
        engine: engine.clone(),
        ami: ami.clone(),
        repos,
        sessions,
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{}", config.http_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    media_shutdown.cancel();
    engine.shutdown().await;
    ami.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Attach voice analysis to every new media session and log what it finds.
async fn monitor_sessions(mut sessions: mpsc::Receiver<Arc<MediaSession>>, config: MonitorConfig) {
    while let Some(session) = sessions.recv().await {
        let call_id = session.call_id().to_string();
        tracing::info!("Media session {} started", call_id);

        // Playback is driven by the AI layer; nothing speaks from this process
        let (_, ai_speaking) = watch::channel(false);
        let mut events = match voice::spawn_monitor(session, config.clone(), ai_speaking).await {
            Ok((events, _)) => events,
            Err(e) => {
                tracing::warn!("Could not monitor media session {}: {}", call_id, e);
                continue;
            }
        };

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    CallAudioEvent::Audio(_) => {}
                    CallAudioEvent::SpeechStart { at_ms } => {
                        tracing::debug!("Call {}: speech started at {}ms", call_id, at_ms);
                    }
                    CallAudioEvent::SpeechEnd { start_ms, end_ms, duration_ms } => {
                        tracing::debug!(
                            "Call {}: speech {}ms..{}ms ({}ms)",
                            call_id,
                            start_ms,
                            end_ms,
                            duration_ms
                        );
                    }
                    CallAudioEvent::BargeIn { at_ms, energy } => {
                        tracing::info!("Call {}: barge-in at {}ms (energy {:.3})", call_id, at_ms, energy);
                    }
                    CallAudioEvent::Hangup => tracing::info!("Call {}: caller hung up", call_id),
                    CallAudioEvent::Error(message) => {
                        tracing::warn!("Call {}: switch reported error: {}", call_id, message);
                    }
                    CallAudioEvent::Closed => {
                        tracing::info!("Media session {} closed", call_id);
                        break;
                    }
                }
            }
        });
    }
}
