//! Higher-level operations built on `AmiClient::action`

use async_trait::async_trait;

use super::client::AmiClient;
use super::parsers::{
    parse_concise_channels, parse_endpoints, parse_registrations, resolve_trunk_health,
    ChannelSummary, EndpointSummary, RegistrationSummary, ScrapeError,
};
use super::protocol::{AmiAction, AmiMessage};
use super::AmiError;
use crate::models::TrunkHealth;
use crate::server::campaign::ControlPlane;

/// Asynchronous outbound call into a dialplan location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginateRequest {
    /// ActionID of the request; the later `OriginateResponse` event carries it
    pub action_id: String,
    /// Dial string, e.g. `PJSIP/+15551234567@mytrunk`
    pub channel: String,
    pub context: String,
    pub exten: String,
    pub priority: u32,
    pub caller_id: Option<String>,
    pub timeout_ms: u64,
    /// Channel variables set before the call enters the dialplan
    pub variables: Vec<(String, String)>,
}

impl OriginateRequest {
    pub fn into_action(self) -> AmiAction {
        let mut action = AmiAction::with_id("Originate", self.action_id)
            .header("Channel", self.channel)
            .header("Context", self.context)
            .header("Exten", self.exten)
            .header("Priority", self.priority.to_string())
            .header("Timeout", self.timeout_ms.to_string())
            .header("Async", "true")
            .header_opt("CallerID", self.caller_id);
        for (name, value) in self.variables {
            action = action.header("Variable", format!("{}={}", name, value));
        }
        action
    }
}

fn expect_success(action: &str, response: AmiMessage) -> Result<AmiMessage, AmiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(AmiError::ActionFailed {
            action: action.to_string(),
            message: response.message().unwrap_or("no message").to_string(),
        })
    }
}

impl AmiClient {
    /// Queue an outbound call. Returns the ActionID that the later
    /// `OriginateResponse` event will carry, which is `request.action_id`.
    pub async fn originate(&self, request: OriginateRequest) -> Result<String, AmiError> {
        let action = request.into_action();
        let action_id = action.id().to_string();
        let response = self.action(action).await?;
        expect_success("Originate", response)?;
        Ok(action_id)
    }

    /// Move a live channel to another dialplan location.
    pub async fn redirect(
        &self,
        channel: &str,
        context: &str,
        exten: &str,
        priority: u32,
    ) -> Result<(), AmiError> {
        let action = AmiAction::new("Redirect")
            .header("Channel", channel)
            .header("Context", context)
            .header("Exten", exten)
            .header("Priority", priority.to_string());
        expect_success("Redirect", self.action(action).await?)?;
        Ok(())
    }

    pub async fn hangup(&self, channel: &str, cause: Option<u32>) -> Result<(), AmiError> {
        let action = AmiAction::new("Hangup")
            .header("Channel", channel)
            .header_opt("Cause", cause.map(|c| c.to_string()));
        expect_success("Hangup", self.action(action).await?)?;
        Ok(())
    }

    /// Set a channel variable, or a global one when `channel` is `None`.
    pub async fn set_var(&self, channel: Option<&str>, variable: &str, value: &str) -> Result<(), AmiError> {
        let action = AmiAction::new("Setvar")
            .header_opt("Channel", channel)
            .header("Variable", variable)
            .header("Value", value);
        expect_success("Setvar", self.action(action).await?)?;
        Ok(())
    }

    pub async fn get_var(&self, channel: Option<&str>, variable: &str) -> Result<Option<String>, AmiError> {
        let action = AmiAction::new("Getvar")
            .header_opt("Channel", channel)
            .header("Variable", variable);
        let response = expect_success("Getvar", self.action(action).await?)?;
        Ok(response
            .get("Value")
            .filter(|v| !v.is_empty() && *v != "(null)")
            .map(str::to_string))
    }

    /// Run a CLI command and return its output text.
    pub async fn command(&self, command: &str) -> Result<String, AmiError> {
        let action = AmiAction::new("Command").header("Command", command);
        let response = expect_success("Command", self.action(action).await?)?;
        Ok(response.output())
    }

    pub async fn ping(&self) -> Result<(), AmiError> {
        expect_success("Ping", self.action(AmiAction::new("Ping")).await?)?;
        Ok(())
    }

    pub async fn channels(&self) -> Vec<ChannelSummary> {
        self.scrape("core show channels concise", parse_concise_channels).await
    }

    pub async fn endpoints(&self) -> Vec<EndpointSummary> {
        self.scrape("pjsip show endpoints", parse_endpoints).await
    }

    pub async fn registrations(&self) -> Vec<RegistrationSummary> {
        self.scrape("pjsip show registrations", parse_registrations).await
    }

    /// Live status of a trunk. Command failures are returned; unreadable
    /// listings degrade to "not found".
    pub async fn trunk_health(&self, trunk: &str) -> Result<TrunkHealth, AmiError> {
        let output = self.command("pjsip show registrations").await?;
        let registrations = parse_registrations(&output).unwrap_or_else(|e| {
            tracing::warn!("Registration listing not understood: {}", e);
            Vec::new()
        });

        let endpoints = if registrations.iter().any(|r| r.name == trunk) {
            Vec::new()
        } else {
            let output = self.command("pjsip show endpoints").await?;
            parse_endpoints(&output).unwrap_or_else(|e| {
                tracing::warn!("Endpoint listing not understood: {}", e);
                Vec::new()
            })
        };

        Ok(resolve_trunk_health(trunk, &registrations, &endpoints))
    }

    async fn scrape<T>(&self, command: &str, parse: fn(&str) -> Result<Vec<T>, ScrapeError>) -> Vec<T> {
        match self.command(command).await {
            Ok(output) => parse(&output).unwrap_or_else(|e| {
                tracing::warn!("Could not parse output of '{}': {}", command, e);
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("CLI command '{}' failed: {}", command, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ControlPlane for AmiClient {
    fn is_connected(&self) -> bool {
        AmiClient::is_connected(self)
    }

    async fn originate(&self, request: OriginateRequest) -> Result<(), AmiError> {
        AmiClient::originate(self, request).await.map(|_| ())
    }

    async fn trunk_health(&self, trunk: &str) -> Result<TrunkHealth, AmiError> {
        AmiClient::trunk_health(self, trunk).await
    }
}
