//! Typed control-plane events
//!
//! Raw manager events are key/value blocks. The handful the rest of the
//! system reacts to are classified into [`EventKind`] variants; everything
//! else is passed through as [`EventKind::Other`].

use super::protocol::AmiMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ChannelCreated {
        channel: String,
        unique_id: String,
    },
    StateChanged {
        channel: String,
        unique_id: String,
        state: String,
    },
    Hangup {
        channel: String,
        unique_id: String,
        cause: i32,
        cause_text: String,
    },
    Dtmf {
        channel: String,
        unique_id: String,
        digit: char,
    },
    Bridge {
        bridge_id: String,
        channel: String,
        entered: bool,
    },
    DialCompleted {
        channel: String,
        dest_channel: Option<String>,
        dial_status: String,
    },
    /// Final answer to an asynchronous `Originate`
    OriginateResponse {
        action_id: String,
        success: bool,
        reason: i32,
        unique_id: Option<String>,
    },
    FullyBooted,
    Other,
}

/// One event block received from the switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub name: String,
    pub kind: EventKind,
    message: AmiMessage,
}

impl ControlEvent {
    pub fn from_message(message: AmiMessage) -> Self {
        let name = message.event_name().unwrap_or_default().to_string();
        let kind = classify(&name, &message);
        Self { name, kind, message }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.message.get(key)
    }

    pub fn fields(&self) -> &[(String, String)] {
        self.message.headers()
    }
}

/// Everything a control-plane subscriber sees, in the order it happened.
#[derive(Debug, Clone)]
pub enum ControlPlaneEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    /// Reconnect budget exhausted; no further attempts are made.
    Fatal { attempts: u32, message: String },
    Event(ControlEvent),
}

fn classify(name: &str, msg: &AmiMessage) -> EventKind {
    let text = |key: &str| msg.get(key).unwrap_or_default().to_string();
    let number = |key: &str| msg.get(key).and_then(|v| v.trim().parse::<i32>().ok()).unwrap_or(0);

    match name.to_ascii_lowercase().as_str() {
        "newchannel" => EventKind::ChannelCreated {
            channel: text("Channel"),
            unique_id: text("Uniqueid"),
        },
        "newstate" => EventKind::StateChanged {
            channel: text("Channel"),
            unique_id: text("Uniqueid"),
            state: text("ChannelStateDesc"),
        },
        "hangup" => EventKind::Hangup {
            channel: text("Channel"),
            unique_id: text("Uniqueid"),
            cause: number("Cause"),
            cause_text: text("Cause-txt"),
        },
        "dtmfend" => match msg.get("Digit").and_then(|d| d.chars().next()) {
            Some(digit) => EventKind::Dtmf {
                channel: text("Channel"),
                unique_id: text("Uniqueid"),
                digit,
            },
            None => EventKind::Other,
        },
        // Pre-12 switches send a single DTMF event with Begin/End flags
        "dtmf" if msg.get("End").is_some_and(|v| v.eq_ignore_ascii_case("yes")) => {
            match msg.get("Digit").and_then(|d| d.chars().next()) {
                Some(digit) => EventKind::Dtmf {
                    channel: text("Channel"),
                    unique_id: text("Uniqueid"),
                    digit,
                },
                None => EventKind::Other,
            }
        }
        "bridgeenter" | "bridgeleave" => EventKind::Bridge {
            bridge_id: text("BridgeUniqueid"),
            channel: text("Channel"),
            entered: name.eq_ignore_ascii_case("bridgeenter"),
        },
        "dialend" => EventKind::DialCompleted {
            channel: text("Channel"),
            dest_channel: msg.get("DestChannel").map(str::to_string),
            dial_status: text("DialStatus"),
        },
        "originateresponse" => EventKind::OriginateResponse {
            action_id: text("ActionID"),
            success: msg
                .get("Response")
                .is_some_and(|r| r.eq_ignore_ascii_case("success")),
            reason: number("Reason"),
            unique_id: msg
                .get("Uniqueid")
                .filter(|u| !u.is_empty() && *u != "<null>")
                .map(str::to_string),
        },
        "fullybooted" => EventKind::FullyBooted,
        _ => EventKind::Other,
    }
}
