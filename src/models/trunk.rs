use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Outbound calling path configured on the switch. Only the enabled flag is
/// owned here; registration state is always queried live.
#[derive(sqlx::FromRow)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trunk {
    pub id: i64,
    /// Endpoint name on the switch, used in the dial string.
    pub name: String,
    pub enabled: bool,
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Live health of a trunk as reported by the switch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrunkHealth {
    pub name: String,
    /// Raw status string, e.g. `Registered`, `Rejected`, `Unavailable`.
    pub status: String,
    pub reachable: bool,
}
