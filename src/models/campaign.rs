use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(sqlx::FromRow)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(rename = "callsPerMinute")]
    pub calls_per_minute: i32,
    #[serde(rename = "maxConcurrent")]
    pub max_concurrent: i32,
    #[serde(rename = "retryAttempts")]
    pub retry_attempts: i32,
    #[serde(rename = "retryDelayMinutes")]
    pub retry_delay_minutes: i32,
    #[serde(rename = "amdEnabled")]
    pub amd_enabled: bool,
    #[serde(rename = "handlerType")]
    pub handler_type: HandlerType,
    #[serde(rename = "handlerId")]
    pub handler_id: Option<i64>,
    #[serde(rename = "callerId")]
    pub caller_id: Option<String>,
    /// Pinned trunk; `None` means the first enabled trunk is used.
    #[serde(rename = "trunkId")]
    pub trunk_id: Option<i64>,
    pub dialed: i32,
    pub answered: i32,
    pub press1: i32,
    pub connected: i32,
    #[serde(rename = "noAnswer")]
    pub no_answer: i32,
    pub busy: i32,
    pub failed: i32,
    #[serde(rename = "answeringMachine")]
    pub answering_machine: i32,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Time between two origination attempts.
    pub fn pacing_interval(&self) -> Duration {
        let cpm = self.calls_per_minute.max(1) as u64;
        Duration::from_millis(60_000 / cpm)
    }

    /// Total attempts a contact may receive, the first call included.
    pub fn max_attempts(&self) -> i32 {
        self.retry_attempts.max(0) + 1
    }

    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retry_delay_minutes.max(0) as i64)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.max(1) as usize
    }

    pub fn counter(&self, counter: CampaignCounter) -> i32 {
        match counter {
            CampaignCounter::Dialed => self.dialed,
            CampaignCounter::Answered => self.answered,
            CampaignCounter::Press1 => self.press1,
            CampaignCounter::Connected => self.connected,
            CampaignCounter::NoAnswer => self.no_answer,
            CampaignCounter::Busy => self.busy,
            CampaignCounter::Failed => self.failed,
            CampaignCounter::AnsweringMachine => self.answering_machine,
        }
    }

    pub(crate) fn counter_mut(&mut self, counter: CampaignCounter) -> &mut i32 {
        match counter {
            CampaignCounter::Dialed => &mut self.dialed,
            CampaignCounter::Answered => &mut self.answered,
            CampaignCounter::Press1 => &mut self.press1,
            CampaignCounter::Connected => &mut self.connected,
            CampaignCounter::NoAnswer => &mut self.no_answer,
            CampaignCounter::Busy => &mut self.busy,
            CampaignCounter::Failed => &mut self.failed,
            CampaignCounter::AnsweringMachine => &mut self.answering_machine,
        }
    }
}

#[derive(sqlx::Type)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "campaign_status", rename_all = "snake_case")]
pub enum CampaignStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn display_name(&self) -> &str {
        match self {
            CampaignStatus::Idle => "Idle",
            CampaignStatus::Running => "Running",
            CampaignStatus::Paused => "Paused",
            CampaignStatus::Completed => "Completed",
        }
    }
}

/// Who takes over the call once the callee answers.
#[derive(sqlx::Type)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "handler_type", rename_all = "snake_case")]
pub enum HandlerType {
    AiAgent,
    CallFlow,
    Ivr,
}

impl HandlerType {
    /// Value passed to the dialplan as a channel variable.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerType::AiAgent => "ai_agent",
            HandlerType::CallFlow => "call_flow",
            HandlerType::Ivr => "ivr",
        }
    }
}

/// Per-campaign statistics column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignCounter {
    Dialed,
    Answered,
    #[serde(rename = "press1")]
    Press1,
    Connected,
    NoAnswer,
    Busy,
    Failed,
    AnsweringMachine,
}

impl CampaignCounter {
    pub fn column(&self) -> &'static str {
        match self {
            CampaignCounter::Dialed => "dialed",
            CampaignCounter::Answered => "answered",
            CampaignCounter::Press1 => "press1",
            CampaignCounter::Connected => "connected",
            CampaignCounter::NoAnswer => "no_answer",
            CampaignCounter::Busy => "busy",
            CampaignCounter::Failed => "failed",
            CampaignCounter::AnsweringMachine => "answering_machine",
        }
    }
}

/// Runtime view of a campaign's dialer, independent of the stored status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialerStatus {
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    pub status: CampaignStatus,
    pub running: bool,
    #[serde(rename = "activeCalls")]
    pub active_calls: usize,
    #[serde(rename = "lastDialAt")]
    pub last_dial_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}
