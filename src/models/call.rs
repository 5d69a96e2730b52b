use serde::{Deserialize, Serialize};

use super::ContactStatus;

/// Outcome reported by the call handler once a campaign call ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResultRequest {
    #[serde(rename = "contactId")]
    pub contact_id: i64,
    pub status: ContactStatus,
    #[serde(rename = "callLogId")]
    pub call_log_id: Option<i64>,
}

/// Answering-machine detection verdict, as set by the dialplan `AMD()` app.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmdVerdict {
    Human,
    Machine,
    #[serde(rename = "NOTSURE")]
    NotSure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmdResultRequest {
    #[serde(rename = "contactId")]
    pub contact_id: i64,
    pub verdict: AmdVerdict,
    #[serde(rename = "callLogId")]
    pub call_log_id: Option<i64>,
}
