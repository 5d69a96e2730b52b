use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::CampaignCounter;

#[derive(sqlx::FromRow)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contact {
    pub id: i64,
    /// `None` while the contact sits in the general pool.
    #[serde(rename = "campaignId")]
    pub campaign_id: Option<i64>,
    #[serde(rename = "groupId")]
    pub group_id: Option<i64>,
    pub phone: String,
    pub name: Option<String>,
    pub status: ContactStatus,
    pub attempts: i32,
    #[serde(rename = "lastAttemptAt")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(rename = "callLogId")]
    pub call_log_id: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.phone)
    }
}

#[derive(sqlx::Type)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "contact_status", rename_all = "snake_case")]
pub enum ContactStatus {
    Pending,
    Dialing,
    Answered,
    #[serde(rename = "press1")]
    #[sqlx(rename = "press1")]
    Press1,
    Connected,
    NoAnswer,
    Busy,
    Failed,
    AnsweringMachine,
}

impl ContactStatus {
    /// Outcomes that may be dialed again once the cool-off window passes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContactStatus::NoAnswer | ContactStatus::Busy | ContactStatus::Failed)
    }

    /// A call result, as opposed to `pending`/`dialing`.
    pub fn is_result(&self) -> bool {
        !matches!(self, ContactStatus::Pending | ContactStatus::Dialing)
    }

    /// Outcomes an operator wants to hear about right away.
    pub fn is_operator_alert(&self) -> bool {
        matches!(self, ContactStatus::Press1 | ContactStatus::Connected)
    }

    /// Campaign statistics column bumped when a call ends with this status.
    pub fn counter(&self) -> Option<CampaignCounter> {
        match self {
            ContactStatus::Pending | ContactStatus::Dialing => None,
            ContactStatus::Answered => Some(CampaignCounter::Answered),
            ContactStatus::Press1 => Some(CampaignCounter::Press1),
            ContactStatus::Connected => Some(CampaignCounter::Connected),
            ContactStatus::NoAnswer => Some(CampaignCounter::NoAnswer),
            ContactStatus::Busy => Some(CampaignCounter::Busy),
            ContactStatus::Failed => Some(CampaignCounter::Failed),
            ContactStatus::AnsweringMachine => Some(CampaignCounter::AnsweringMachine),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Dialing => "dialing",
            ContactStatus::Answered => "answered",
            ContactStatus::Press1 => "press1",
            ContactStatus::Connected => "connected",
            ContactStatus::NoAnswer => "no_answer",
            ContactStatus::Busy => "busy",
            ContactStatus::Failed => "failed",
            ContactStatus::AnsweringMachine => "answering_machine",
        }
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
