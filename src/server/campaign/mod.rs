//! Outbound campaign dialing
//!
//! This module handles automated dialing for campaigns, including:
//! - One cancellable pacing task per running campaign
//! - Concurrency limits and oldest-first contact selection
//! - Retries gated by attempt budget and cool-off window
//! - Trunk checks before every dial
//! - Call results, answering-machine verdicts and the do-not-call ledger

mod engine;

#[cfg(test)]
mod tests;

pub use engine::CampaignEngine;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::{ContactStatus, TrunkHealth};
use crate::server::ami::{AmiError, OriginateRequest};
use crate::server::db::RepositoryError;

/// What the engine needs from the switch.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queue an outbound call. Events about it carry `request.action_id`,
    /// and may arrive before this returns.
    async fn originate(&self, request: OriginateRequest) -> Result<(), AmiError>;

    async fn trunk_health(&self, trunk: &str) -> Result<TrunkHealth, AmiError>;
}

/// Campaign engine notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignEvent {
    Started {
        campaign_id: i64,
    },
    Paused {
        campaign_id: i64,
        reason: Option<String>,
    },
    Stopped {
        campaign_id: i64,
    },
    Completed {
        campaign_id: i64,
    },
    TrunkError {
        campaign_id: i64,
        message: String,
    },
    ContactDialed {
        campaign_id: i64,
        contact_id: i64,
        phone: String,
        action_id: String,
    },
    OriginationFailed {
        campaign_id: i64,
        contact_id: i64,
        message: String,
    },
    CallResult {
        campaign_id: Option<i64>,
        contact_id: i64,
        status: ContactStatus,
    },
    /// A callee pressed 1 or was connected; an operator should follow up.
    OperatorAlert {
        campaign_id: Option<i64>,
        contact_id: i64,
        phone: String,
        name: Option<String>,
        status: ContactStatus,
    },
}

/// Campaign engine errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign {0} not found")]
    CampaignNotFound(i64),

    #[error("Contact {0} not found")]
    ContactNotFound(i64),

    #[error("Campaign {0} is already running")]
    AlreadyRunning(i64),

    #[error("Invalid campaign state: {0}")]
    InvalidState(String),

    #[error("Control plane is not connected")]
    ControlPlaneUnavailable,

    #[error("Trunk unavailable: {0}")]
    TrunkUnavailable(String),

    #[error("Campaign {0} has no contacts to dial")]
    NoContacts(i64),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Control plane error: {0}")]
    ControlPlane(#[from] AmiError),
}
