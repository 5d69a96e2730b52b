//! Parsers for switch CLI listings
//!
//! CLI output is meant for humans and shifts between switch versions, so
//! each parser is a pure function that either returns typed rows or a
//! [`ScrapeError`]. Callers decide how to degrade.

use serde::Serialize;
use thiserror::Error;

use crate::models::TrunkHealth;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("no recognizable {0} rows in CLI output")]
    Unrecognized(&'static str),
}

/// One row of `core show channels concise`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub channel: String,
    pub context: String,
    pub exten: String,
    pub priority: String,
    pub state: String,
    pub application: String,
    pub data: String,
    #[serde(rename = "callerId")]
    pub caller_id: String,
    #[serde(rename = "durationSecs")]
    pub duration_secs: Option<u64>,
    #[serde(rename = "bridgeId")]
    pub bridge_id: Option<String>,
    #[serde(rename = "uniqueId")]
    pub unique_id: Option<String>,
}

/// One `Endpoint:` row of `pjsip show endpoints`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub name: String,
    #[serde(rename = "callerId")]
    pub caller_id: Option<String>,
    /// `Not in use`, `In use`, `Busy`, `Unavailable`, ...
    pub state: String,
    #[serde(rename = "activeChannels")]
    pub active_channels: Option<u32>,
}

/// One row of `pjsip show registrations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationSummary {
    pub name: String,
    #[serde(rename = "serverUri")]
    pub server_uri: String,
    pub auth: Option<String>,
    pub status: String,
}

const REGISTRATION_STATES: &[&str] = &["Registered", "Unregistered", "Rejected", "Failed", "Stopped"];

fn is_empty_listing(output: &str) -> bool {
    let meaningful = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>();
    meaningful.is_empty()
        || meaningful
            .iter()
            .all(|l| l.starts_with("No objects found") || l.starts_with("Objects found: 0"))
}

pub fn parse_concise_channels(output: &str) -> Result<Vec<ChannelSummary>, ScrapeError> {
    if is_empty_listing(output) {
        return Ok(Vec::new());
    }

    let rows: Vec<ChannelSummary> = output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split('!').collect();
            if fields.len() < 8 {
                return None;
            }
            let optional = |idx: usize| {
                fields
                    .get(idx)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty() && *v != "(None)")
                    .map(str::to_string)
            };
            Some(ChannelSummary {
                channel: fields[0].to_string(),
                context: fields[1].to_string(),
                exten: fields[2].to_string(),
                priority: fields[3].to_string(),
                state: fields[4].to_string(),
                application: fields[5].to_string(),
                data: fields[6].to_string(),
                caller_id: fields[7].to_string(),
                duration_secs: fields.get(11).and_then(|d| d.trim().parse().ok()),
                bridge_id: optional(12),
                unique_id: optional(13),
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(ScrapeError::Unrecognized("channel"));
    }
    Ok(rows)
}

pub fn parse_endpoints(output: &str) -> Result<Vec<EndpointSummary>, ScrapeError> {
    if is_empty_listing(output) {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for line in output.lines() {
        let Some(rest) = line.trim_start().strip_prefix("Endpoint:") else {
            continue;
        };
        let rest = rest.trim();
        // Column legend: `<Endpoint/CID....>  <State.....>`
        if rest.is_empty() || rest.starts_with('<') {
            continue;
        }

        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let (name, caller_id) = match tokens[0].split_once('/') {
            Some((name, cid)) => (name.to_string(), Some(cid.to_string()).filter(|c| !c.is_empty())),
            None => (tokens[0].to_string(), None),
        };

        // Trailing `N of M` is the channel usage column
        let mut state_end = tokens.len();
        let mut active_channels = None;
        if tokens.len() >= 4 && tokens[tokens.len() - 2] == "of" {
            active_channels = tokens[tokens.len() - 3].parse().ok();
            if active_channels.is_some() {
                state_end = tokens.len() - 3;
            }
        }
        let state = if state_end > 1 {
            tokens[1..state_end].join(" ")
        } else {
            "Unknown".to_string()
        };

        rows.push(EndpointSummary {
            name,
            caller_id,
            state,
            active_channels,
        });
    }

    if rows.is_empty() {
        return Err(ScrapeError::Unrecognized("endpoint"));
    }
    Ok(rows)
}

pub fn parse_registrations(output: &str) -> Result<Vec<RegistrationSummary>, ScrapeError> {
    if is_empty_listing(output) {
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with('<')
            || line.starts_with('=')
            || line.starts_with("Objects found")
        {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((name, server_uri)) = tokens[0].split_once('/') else {
            continue;
        };
        if !server_uri.starts_with("sip") {
            continue;
        }

        let status = tokens[1..]
            .iter()
            .find(|t| REGISTRATION_STATES.iter().any(|s| s.eq_ignore_ascii_case(t)))
            .map(|s| s.to_string())
            .or_else(|| tokens.get(2).map(|s| s.to_string()))
            .unwrap_or_else(|| "Unknown".to_string());
        let auth = tokens
            .get(1)
            .filter(|t| !t.eq_ignore_ascii_case(&status) && !t.starts_with('('))
            .map(|t| t.to_string());

        rows.push(RegistrationSummary {
            name: name.to_string(),
            server_uri: server_uri.to_string(),
            auth,
            status,
        });
    }

    if rows.is_empty() {
        return Err(ScrapeError::Unrecognized("registration"));
    }
    Ok(rows)
}

/// Combines both listings into one verdict for a trunk. Trunks with an
/// outbound registration must be `Registered`; IP-authenticated trunks have
/// no registration and only need a reachable endpoint.
pub fn resolve_trunk_health(
    trunk: &str,
    registrations: &[RegistrationSummary],
    endpoints: &[EndpointSummary],
) -> TrunkHealth {
    if let Some(reg) = registrations.iter().find(|r| r.name == trunk) {
        return TrunkHealth {
            name: trunk.to_string(),
            status: reg.status.clone(),
            reachable: reg.status.eq_ignore_ascii_case("Registered"),
        };
    }

    if let Some(endpoint) = endpoints.iter().find(|e| e.name == trunk) {
        let unreachable = ["Unavailable", "Invalid", "Unknown"]
            .iter()
            .any(|s| endpoint.state.eq_ignore_ascii_case(s));
        return TrunkHealth {
            name: trunk.to_string(),
            status: endpoint.state.clone(),
            reachable: !unreachable,
        };
    }

    TrunkHealth {
        name: trunk.to_string(),
        status: "Not found".to_string(),
        reachable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNELS: &str = "\
PJSIP/trunk-00000012!campaign-outbound!s!3!Up!AudioSocket!9d2c...,127.0.0.1:9092!+15551230000!!!3!42!f1a2b3!1700000000.42
PJSIP/6001-00000013!from-internal!600!1!Ring!Dial!PJSIP/6002!6001!!!3!5!(None)!1700000000.43
";

    const ENDPOINTS: &str = "
 Endpoint:  <Endpoint/CID.....................................>  <State.....>  <Channels.>
    I/OAuth:  <AuthId/UserName...........................................................>
        Aor:  <Aor............................................>  <MaxContact>
==========================================================================================

 Endpoint:  6001                                                 Unavailable   0 of inf
     InAuth:  6001/6001
        Aor:  6001                                               1

 Endpoint:  mytrunk/+15551234567                                 Not in use    0 of inf
    OutAuth:  mytrunk-auth/acme

 Endpoint:  ipcarrier                                            In use        2 of inf

Objects found: 3
";

    const REGISTRATIONS: &str = "
 <Registration/ServerURI..............................>  <Auth..........>  <Status.......>
==========================================================================================

 mytrunk/sip:sip.provider.example:5060                   mytrunk-auth      Registered        (exp. 3565s)
 backup/sip:backup.provider.example                      backup-auth       Rejected

Objects found: 2
";

    #[test]
    fn test_parse_concise_channels() {
        let rows = parse_concise_channels(CHANNELS).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].channel, "PJSIP/trunk-00000012");
        assert_eq!(rows[0].application, "AudioSocket");
        assert_eq!(rows[0].duration_secs, Some(42));
        assert_eq!(rows[0].bridge_id.as_deref(), Some("f1a2b3"));
        assert_eq!(rows[1].state, "Ring");
        assert_eq!(rows[1].bridge_id, None);
        assert_eq!(rows[1].unique_id.as_deref(), Some("1700000000.43"));
    }

    #[test]
    fn test_parse_channels_empty_and_garbage() {
        assert_eq!(parse_concise_channels("").unwrap(), vec![]);
        assert_eq!(parse_concise_channels("\n  \n").unwrap(), vec![]);
        assert_eq!(
            parse_concise_channels("Channel              Location             State   Application(Data)\n0 active channels"),
            Err(ScrapeError::Unrecognized("channel"))
        );
    }

    #[test]
    fn test_parse_endpoints() {
        let rows = parse_endpoints(ENDPOINTS).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].name, "6001");
        assert_eq!(rows[0].state, "Unavailable");
        assert_eq!(rows[0].active_channels, Some(0));

        assert_eq!(rows[1].name, "mytrunk");
        assert_eq!(rows[1].caller_id.as_deref(), Some("+15551234567"));
        assert_eq!(rows[1].state, "Not in use");

        assert_eq!(rows[2].state, "In use");
        assert_eq!(rows[2].active_channels, Some(2));
    }

    #[test]
    fn test_parse_endpoints_without_usage_column() {
        // Some builds drop the channel usage column entirely
        let rows = parse_endpoints(" Endpoint:  carrier   Not in use\n").unwrap();
        assert_eq!(rows[0].state, "Not in use");
        assert_eq!(rows[0].active_channels, None);
    }

    #[test]
    fn test_parse_endpoints_no_objects() {
        assert!(parse_endpoints("No objects found.\n").unwrap().is_empty());
        assert!(parse_endpoints("Unable to find object foo.").is_err());
    }

    #[test]
    fn test_parse_registrations() {
        let rows = parse_registrations(REGISTRATIONS).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "mytrunk");
        assert_eq!(rows[0].server_uri, "sip:sip.provider.example:5060");
        assert_eq!(rows[0].auth.as_deref(), Some("mytrunk-auth"));
        assert_eq!(rows[0].status, "Registered");
        assert_eq!(rows[1].status, "Rejected");
    }

    #[test]
    fn test_parse_registrations_without_auth_column() {
        let rows = parse_registrations(" carrier/sip:carrier.example   Unregistered\n").unwrap();
        assert_eq!(rows[0].status, "Unregistered");
        assert_eq!(rows[0].auth, None);
    }

    #[test]
    fn test_trunk_health_prefers_registration() {
        let regs = parse_registrations(REGISTRATIONS).unwrap();
        let eps = parse_endpoints(ENDPOINTS).unwrap();

        let ok = resolve_trunk_health("mytrunk", &regs, &eps);
        assert!(ok.reachable);
        assert_eq!(ok.status, "Registered");

        let rejected = resolve_trunk_health("backup", &regs, &eps);
        assert!(!rejected.reachable);
        assert_eq!(rejected.status, "Rejected");

        let ip_auth = resolve_trunk_health("ipcarrier", &regs, &eps);
        assert!(ip_auth.reachable);
        assert_eq!(ip_auth.status, "In use");

        let offline = resolve_trunk_health("6001", &regs, &eps);
        assert!(!offline.reachable);

        let missing = resolve_trunk_health("nope", &regs, &eps);
        assert_eq!(missing.status, "Not found");
        assert!(!missing.reachable);
    }
}
