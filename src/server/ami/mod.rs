//! Control-plane client for the switch's manager interface
//!
//! Features:
//! - Block codec for the `Key: Value` line protocol
//! - Request/response correlation by ActionID
//! - Typed event stream with connection lifecycle notices
//! - Automatic, bounded reconnection
//! - Command helpers and CLI listing parsers

mod client;
mod commands;
mod event;
mod parsers;
mod protocol;


pub use client::{AmiClient, ConnectionState};
pub use commands::OriginateRequest;
pub use event::{ControlEvent, ControlPlaneEvent, EventKind};
pub use parsers::{
    parse_concise_channels, parse_endpoints, parse_registrations, resolve_trunk_health,
    ChannelSummary, EndpointSummary, RegistrationSummary, ScrapeError,
};
pub use protocol::{AmiAction, AmiCodec, AmiMessage, Inbound};

use thiserror::Error;

/// Control-plane errors
#[derive(Error, Debug)]
pub enum AmiError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not connected to the manager interface")]
    NotConnected,

    #[error("Action {action} timed out after {timeout_ms}ms")]
    ActionTimeout { action: String, timeout_ms: u64 },

    #[error("Action {action} failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
