use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{CampaignError, CampaignEvent, ControlPlane};
use crate::models::{
    AmdVerdict, Campaign, CampaignCounter, CampaignStatus, Contact, ContactStatus, DialerStatus, Trunk,
};
use crate::server::ami::{ControlPlaneEvent, EventKind, OriginateRequest};
use crate::server::config::DialerConfig;
use crate::server::db::Repositories;

/// Runtime state of one campaign. The active set survives a pause and is
/// dropped on stop or completion.
#[derive(Debug, Default)]
struct CampaignState {
    /// Contacts with an attempt in flight
    active: HashSet<i64>,
    /// Present while a pacing task runs
    runner: Option<CancellationToken>,
    /// Latest pacing task; may still be finishing a tick after a pause
    task: Option<JoinHandle<()>>,
    last_dial_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Inner {
    repos: Repositories,
    control: Arc<dyn ControlPlane>,
    dialer: DialerConfig,
    campaigns: Mutex<HashMap<i64, CampaignState>>,
    /// Originate action id -> (campaign, contact)
    originations: Mutex<HashMap<String, (i64, i64)>>,
    /// Unique id of an answered channel -> (campaign, contact)
    channels: Mutex<HashMap<String, (i64, i64)>>,
    /// Held while a result is recorded so one call is never counted twice
    results: Mutex<()>,
    events: broadcast::Sender<CampaignEvent>,
    shutdown: CancellationToken,
}

enum Tick {
    Continue,
    Finished,
}

/// Campaign dialer. Clones share the same state.
#[derive(Clone)]
pub struct CampaignEngine {
    inner: Arc<Inner>,
}

impl CampaignEngine {
    pub fn new(repos: Repositories, control: Arc<dyn ControlPlane>, dialer: DialerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                repos,
                control,
                dialer,
                campaigns: Mutex::new(HashMap::new()),
                originations: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                results: Mutex::new(()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CampaignEvent> {
        self.inner.events.subscribe()
    }

    /// Start or resume dialing a campaign.
    pub async fn start(&self, campaign_id: i64) -> Result<(), CampaignError> {
        let campaign = self.load(campaign_id).await?;
        if campaign.status == CampaignStatus::Completed {
            return Err(CampaignError::InvalidState(format!(
                "campaign {} is already completed",
                campaign_id
            )));
        }
        if !self.inner.control.is_connected() {
            return Err(CampaignError::ControlPlaneUnavailable);
        }
        if self.inner.repos.trunks.first_enabled().await?.is_none() {
            return Err(CampaignError::TrunkUnavailable("no enabled trunk".to_string()));
        }

        let (token, previous) = self.reserve_runner(campaign_id).await?;
        if let Some(previous) = previous {
            // The last runner may still be inside a tick; never overlap two
            if let Err(e) = previous.await {
                tracing::warn!("Previous pacing task of campaign {} failed: {}", campaign_id, e);
            }
        }
        if token.is_cancelled() {
            return Err(CampaignError::InvalidState(format!(
                "campaign {} was paused while starting",
                campaign_id
            )));
        }
        if let Err(e) = self.prepare_start(campaign_id).await {
            self.release_runner(campaign_id, &token).await;
            return Err(e);
        }

        let engine = self.clone();
        let period = campaign.pacing_interval();
        let task = tokio::spawn(async move {
            engine.run_pacing(campaign_id, period, token).await;
        });
        if let Some(state) = self.inner.campaigns.lock().await.get_mut(&campaign_id) {
            state.task = Some(task);
        }

        tracing::info!(
            "Started campaign {} ({} calls/min, max {} concurrent)",
            campaign_id,
            campaign.calls_per_minute,
            campaign.max_concurrent()
        );
        self.emit(CampaignEvent::Started { campaign_id });
        Ok(())
    }

    async fn prepare_start(&self, campaign_id: i64) -> Result<(), CampaignError> {
        let contacts = &self.inner.repos.contacts;
        if contacts.count_for_campaign(campaign_id).await? == 0 {
            let imported = contacts.import_from_pool(campaign_id).await?;
            if imported == 0 {
                return Err(CampaignError::NoContacts(campaign_id));
            }
            tracing::info!("Imported {} contacts from the general pool into campaign {}", imported, campaign_id);
        }

        // Dialing contacts we are not tracking were orphaned by a restart
        let keep = self.active_contacts(campaign_id).await;
        let reset = contacts.reset_dialing(campaign_id, &keep).await?;
        if reset > 0 {
            tracing::info!("Reset {} stuck contacts of campaign {} to pending", reset, campaign_id);
        }

        self.inner
            .repos
            .campaigns
            .set_campaign_status(campaign_id, CampaignStatus::Running)
            .await?;
        Ok(())
    }

    /// Stop dialing but keep all state; `start` picks up where it left off.
    pub async fn pause(&self, campaign_id: i64) -> Result<(), CampaignError> {
        let campaign = self.load(campaign_id).await?;
        let running = self.is_running(campaign_id).await;
        if campaign.status != CampaignStatus::Running && !running {
            return Err(CampaignError::InvalidState(format!(
                "campaign {} is not running",
                campaign_id
            )));
        }

        self.halt(campaign_id).await;
        self.inner
            .repos
            .campaigns
            .set_campaign_status(campaign_id, CampaignStatus::Paused)
            .await?;
        tracing::info!("Paused campaign {}", campaign_id);
        self.emit(CampaignEvent::Paused { campaign_id, reason: None });
        Ok(())
    }

    /// End a campaign for good. Calls already in flight still report results.
    pub async fn stop(&self, campaign_id: i64) -> Result<(), CampaignError> {
        self.load(campaign_id).await?;
        self.finish(campaign_id).await?;
        tracing::info!("Stopped campaign {}", campaign_id);
        self.emit(CampaignEvent::Stopped { campaign_id });
        Ok(())
    }

    /// Cancel every pacing task without touching stored statuses, so that
    /// running campaigns are resumed on the next startup.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut stopped = 0;
        for state in self.inner.campaigns.lock().await.values_mut() {
            if let Some(token) = state.runner.take() {
                token.cancel();
                stopped += 1;
            }
        }
        tracing::info!("Campaign engine shut down ({} pacing tasks cancelled)", stopped);
    }

    /// Restart campaigns stored as running that have no pacing task here.
    /// Returns how many resumed.
    pub async fn resume_active(&self) -> Result<usize, CampaignError> {
        let running = self
            .inner
            .repos
            .campaigns
            .campaigns_with_status(CampaignStatus::Running)
            .await?;

        let mut resumed = 0;
        for campaign in running {
            if self.is_running(campaign.id).await {
                continue;
            }
            match self.start(campaign.id).await {
                Ok(()) => resumed += 1,
                Err(e) => tracing::warn!("Could not resume campaign {}: {}", campaign.id, e),
            }
        }
        Ok(resumed)
    }

    pub async fn campaign_status(&self, campaign_id: i64) -> Result<DialerStatus, CampaignError> {
        let campaign = self.load(campaign_id).await?;
        let states = self.inner.campaigns.lock().await;
        let state = states.get(&campaign_id);

        Ok(DialerStatus {
            campaign_id,
            status: campaign.status,
            running: state.is_some_and(|s| s.runner.is_some()),
            active_calls: state.map_or(0, |s| s.active.len()),
            last_dial_at: state.and_then(|s| s.last_dial_at),
            last_error: state.and_then(|s| s.last_error.clone()),
        })
    }

    /// Record the outcome of a campaign call.
    ///
    /// Only a contact with a call in flight takes a result. Later reports for
    /// the same call are ignored, except that an `answered` contact may still
    /// be upgraded to an operator-alert outcome.
    pub async fn handle_call_result(
        &self,
        contact_id: i64,
        status: ContactStatus,
        call_log_id: Option<i64>,
    ) -> Result<(), CampaignError> {
        if !status.is_result() {
            return Err(CampaignError::InvalidState(format!("{} is not a call result", status)));
        }

        let _serial = self.inner.results.lock().await;
        let repos = &self.inner.repos;
        let contact = repos
            .contacts
            .get_contact(contact_id)
            .await?
            .ok_or(CampaignError::ContactNotFound(contact_id))?;

        let in_flight = contact.status == ContactStatus::Dialing
            || match contact.campaign_id {
                Some(campaign_id) => self.is_active(campaign_id, contact_id).await,
                None => false,
            };
        if !in_flight {
            if contact.status == ContactStatus::Answered && status.is_operator_alert() {
                return self.upgrade_result(&contact, status, call_log_id).await;
            }
            tracing::debug!(
                "Ignoring {} for contact {}; already {}",
                status,
                contact_id,
                contact.status
            );
            return Ok(());
        }

        repos.contacts.set_result(contact_id, status, call_log_id).await?;

        if let Some(campaign_id) = contact.campaign_id {
            self.release_contact(campaign_id, contact_id).await;
            if let Some(counter) = status.counter() {
                repos.campaigns.increment_counter(campaign_id, counter).await?;
            }
        }

        if repos.contacts.is_dnc_exempt(&contact).await? {
            tracing::debug!("Contact {} is in a DNC-exempt group", contact_id);
        } else {
            repos.dnc.add_dnc(&contact.phone, contact.campaign_id).await?;
        }

        tracing::info!("Contact {} ({}) finished with {}", contact_id, contact.phone, status);
        self.announce_result(&contact, status);
        Ok(())
    }

    /// An answered call whose caller went on to press 1 or reach an agent.
    async fn upgrade_result(
        &self,
        contact: &Contact,
        status: ContactStatus,
        call_log_id: Option<i64>,
    ) -> Result<(), CampaignError> {
        let repos = &self.inner.repos;
        let call_log_id = call_log_id.or(contact.call_log_id);
        repos.contacts.set_result(contact.id, status, call_log_id).await?;
        if let (Some(campaign_id), Some(counter)) = (contact.campaign_id, status.counter()) {
            repos.campaigns.increment_counter(campaign_id, counter).await?;
        }
        tracing::info!("Contact {} ({}) upgraded from answered to {}", contact.id, contact.phone, status);
        self.announce_result(contact, status);
        Ok(())
    }

    fn announce_result(&self, contact: &Contact, status: ContactStatus) {
        self.emit(CampaignEvent::CallResult {
            campaign_id: contact.campaign_id,
            contact_id: contact.id,
            status,
        });

        if status.is_operator_alert() {
            tracing::info!(
                "Operator alert: {} ({}) {} in campaign {:?}",
                contact.display_name(),
                contact.phone,
                status,
                contact.campaign_id
            );
            self.emit(CampaignEvent::OperatorAlert {
                campaign_id: contact.campaign_id,
                contact_id: contact.id,
                phone: contact.phone.clone(),
                name: contact.name.clone(),
                status,
            });
        }
    }

    /// Machines count as `answering_machine`; humans and unsure verdicts
    /// count as `answered`.
    pub async fn handle_amd_result(
        &self,
        contact_id: i64,
        verdict: AmdVerdict,
        call_log_id: Option<i64>,
    ) -> Result<(), CampaignError> {
        let status = match verdict {
            AmdVerdict::Machine => ContactStatus::AnsweringMachine,
            AmdVerdict::Human | AmdVerdict::NotSure => ContactStatus::Answered,
        };
        self.handle_call_result(contact_id, status, call_log_id).await
    }

    /// Follow control-plane events: failed originations and hangups become
    /// call results, a fresh connection resumes campaigns that could not
    /// start, and losing the switch for good pauses every campaign.
    pub fn attach_control_events(&self, mut events: broadcast::Receiver<ControlPlaneEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = engine.inner.shutdown.cancelled() => break,
                    received = events.recv() => received,
                };

                match received {
                    Ok(ControlPlaneEvent::Event(event)) => match event.kind {
                        EventKind::OriginateResponse {
                            action_id,
                            success,
                            reason,
                            unique_id,
                        } => engine.on_originate_response(&action_id, success, reason, unique_id).await,
                        EventKind::Hangup { unique_id, cause, .. } => engine.on_hangup(&unique_id, cause).await,
                        _ => {}
                    },
                    Ok(ControlPlaneEvent::Connected) => match engine.resume_active().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("Resumed {} running campaigns after connecting", n),
                        Err(e) => tracing::error!("Could not load running campaigns: {}", e),
                    },
                    Ok(ControlPlaneEvent::Fatal { message, .. }) => engine.on_control_plane_lost(&message).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Campaign engine missed {} control-plane events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn on_originate_response(&self, action_id: &str, success: bool, reason: i32, unique_id: Option<String>) {
        let Some((campaign_id, contact_id)) = self.inner.originations.lock().await.remove(action_id) else {
            return;
        };
        if success {
            tracing::debug!("Contact {} of campaign {} answered the origination", contact_id, campaign_id);
            match unique_id {
                Some(unique_id) => {
                    self.inner
                        .channels
                        .lock()
                        .await
                        .insert(unique_id, (campaign_id, contact_id));
                }
                None => tracing::warn!("Answered origination for contact {} has no channel id", contact_id),
            }
            return;
        }

        let status = match reason {
            3 => ContactStatus::NoAnswer,
            5 => ContactStatus::Busy,
            _ => ContactStatus::Failed,
        };
        tracing::info!(
            "Origination for contact {} of campaign {} failed (reason {})",
            contact_id,
            campaign_id,
            reason
        );
        if let Err(e) = self.handle_call_result(contact_id, status, None).await {
            tracing::warn!("Could not record failed origination of contact {}: {}", contact_id, e);
        }
    }

    /// A tracked channel hung up. If nobody reported a result yet, the
    /// hangup cause decides it.
    async fn on_hangup(&self, unique_id: &str, cause: i32) {
        let Some((campaign_id, contact_id)) = self.inner.channels.lock().await.remove(unique_id) else {
            return;
        };
        let status = hangup_status(cause);
        tracing::debug!(
            "Channel {} of contact {} (campaign {}) hung up with cause {}",
            unique_id,
            contact_id,
            campaign_id,
            cause
        );
        if let Err(e) = self.handle_call_result(contact_id, status, None).await {
            tracing::warn!("Could not record hangup of contact {}: {}", contact_id, e);
        }
    }

    async fn on_control_plane_lost(&self, message: &str) {
        let running: Vec<i64> = {
            let states = self.inner.campaigns.lock().await;
            states
                .iter()
                .filter(|(_, s)| s.runner.is_some())
                .map(|(id, _)| *id)
                .collect()
        };
        for campaign_id in running {
            let reason = format!("control plane lost: {}", message);
            if let Err(e) = self.pause_with_reason(campaign_id, reason).await {
                tracing::error!("Could not pause campaign {}: {}", campaign_id, e);
            }
        }
    }

    async fn run_pacing(self, campaign_id: i64, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(campaign_id, &cancel).await {
                Ok(Tick::Continue) => {}
                Ok(Tick::Finished) => break,
                Err(e) => {
                    tracing::error!("Campaign {} tick failed: {}", campaign_id, e);
                    self.record_error(campaign_id, e.to_string()).await;
                }
            }
        }

        self.release_runner(campaign_id, &cancel).await;
        tracing::info!("Campaign {} pacing loop ended", campaign_id);
    }

    /// One origination attempt at most. Nothing changes once `cancel` fires.
    async fn tick(&self, campaign_id: i64, cancel: &CancellationToken) -> Result<Tick, CampaignError> {
        let repos = &self.inner.repos;
        let Some(campaign) = repos.campaigns.get_campaign(campaign_id).await? else {
            tracing::warn!("Campaign {} disappeared; stopping its pacing loop", campaign_id);
            return Ok(Tick::Finished);
        };
        if campaign.status != CampaignStatus::Running {
            tracing::debug!("Campaign {} is {:?}; stopping its pacing loop", campaign_id, campaign.status);
            return Ok(Tick::Finished);
        }
        if !self.inner.control.is_connected() {
            tracing::debug!("Control plane down; campaign {} waits", campaign_id);
            return Ok(Tick::Continue);
        }

        let active = self.active_contacts(campaign_id).await;
        if active.len() >= campaign.max_concurrent() {
            tracing::debug!("Campaign {} at concurrency limit ({})", campaign_id, active.len());
            return Ok(Tick::Continue);
        }

        let retry_before = Utc::now() - campaign.retry_delay();
        let Some(contact) = repos.contacts.next_eligible(&campaign, &active, retry_before).await? else {
            if cancel.is_cancelled() {
                return Ok(Tick::Finished);
            }
            if active.is_empty() && repos.contacts.count_remaining(&campaign).await? == 0 {
                self.complete(campaign_id).await?;
                return Ok(Tick::Finished);
            }
            tracing::debug!("Campaign {} has nothing to dial right now", campaign_id);
            return Ok(Tick::Continue);
        };

        let trunk = match self.resolve_trunk(&campaign).await? {
            Ok(trunk) => trunk,
            Err(_) if cancel.is_cancelled() => return Ok(Tick::Finished),
            Err(reason) => {
                self.pause_for_trunk(campaign_id, reason).await?;
                return Ok(Tick::Finished);
            }
        };

        let health = self.inner.control.trunk_health(&trunk.name).await;
        if cancel.is_cancelled() {
            return Ok(Tick::Finished);
        }
        match health {
            Ok(health) if health.reachable => {}
            Ok(health) => {
                let reason = format!("trunk {} is {}", trunk.name, health.status);
                self.pause_for_trunk(campaign_id, reason).await?;
                return Ok(Tick::Finished);
            }
            Err(e) => {
                let reason = format!("trunk {} status check failed: {}", trunk.name, e);
                self.pause_for_trunk(campaign_id, reason).await?;
                return Ok(Tick::Finished);
            }
        }

        self.dial(&campaign, &contact, &trunk, cancel).await?;
        Ok(Tick::Continue)
    }

    /// Pinned trunk if the campaign has one, else the first enabled trunk.
    /// The inner error is the reason to pause.
    async fn resolve_trunk(&self, campaign: &Campaign) -> Result<Result<Trunk, String>, CampaignError> {
        let trunks = &self.inner.repos.trunks;
        let resolved = match campaign.trunk_id {
            Some(id) => match trunks.get_trunk(id).await? {
                Some(trunk) if trunk.enabled => Ok(trunk),
                Some(trunk) => Err(format!("trunk {} is disabled", trunk.name)),
                None => Err(format!("trunk {} not found", id)),
            },
            None => trunks
                .first_enabled()
                .await?
                .ok_or_else(|| "no enabled trunk".to_string()),
        };
        Ok(resolved)
    }

    async fn dial(
        &self,
        campaign: &Campaign,
        contact: &Contact,
        trunk: &Trunk,
        cancel: &CancellationToken,
    ) -> Result<(), CampaignError> {
        let repos = &self.inner.repos;
        let now = Utc::now();

        {
            // `halt` cancels under this lock, so no dial starts after a pause returns
            let mut states = self.inner.campaigns.lock().await;
            if cancel.is_cancelled() {
                tracing::debug!("Campaign {} halted before dialing contact {}", campaign.id, contact.id);
                return Ok(());
            }
            let state = states.entry(campaign.id).or_default();
            state.active.insert(contact.id);
            state.last_dial_at = Some(now);
        }
        if let Err(e) = repos.contacts.mark_dialing(contact.id, now).await {
            self.release_contact(campaign.id, contact.id).await;
            return Err(e.into());
        }
        repos.campaigns.increment_counter(campaign.id, CampaignCounter::Dialed).await?;

        // Registered first: the switch may answer with an event before the action returns
        let request = self.originate_request(campaign, contact, trunk);
        let action_id = request.action_id.clone();
        self.inner
            .originations
            .lock()
            .await
            .insert(action_id.clone(), (campaign.id, contact.id));

        match self.inner.control.originate(request).await {
            Ok(()) => {
                tracing::info!(
                    "Campaign {} dialing contact {} ({}) via {}, attempt {}",
                    campaign.id,
                    contact.id,
                    contact.phone,
                    trunk.name,
                    contact.attempts + 1
                );
                self.emit(CampaignEvent::ContactDialed {
                    campaign_id: campaign.id,
                    contact_id: contact.id,
                    phone: contact.phone.clone(),
                    action_id,
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Origination for contact {} in campaign {} failed: {}",
                    contact.id,
                    campaign.id,
                    e
                );
                let pending = self.inner.originations.lock().await.remove(&action_id);
                if pending.is_some() {
                    self.fail_origination(campaign.id, contact.id, e.to_string()).await?;
                }
            }
        }
        Ok(())
    }

    /// The request never reached the network: no do-not-call entry.
    async fn fail_origination(&self, campaign_id: i64, contact_id: i64, message: String) -> Result<(), CampaignError> {
        let repos = &self.inner.repos;
        repos.contacts.set_result(contact_id, ContactStatus::Failed, None).await?;
        self.release_contact(campaign_id, contact_id).await;
        self.record_error(campaign_id, message.clone()).await;
        repos.campaigns.increment_counter(campaign_id, CampaignCounter::Failed).await?;
        self.emit(CampaignEvent::OriginationFailed {
            campaign_id,
            contact_id,
            message,
        });
        Ok(())
    }

    fn originate_request(&self, campaign: &Campaign, contact: &Contact, trunk: &Trunk) -> OriginateRequest {
        let dialer = &self.inner.dialer;

        let mut variables = vec![
            ("CAMPAIGN_ID".to_string(), campaign.id.to_string()),
            ("CONTACT_ID".to_string(), contact.id.to_string()),
            ("HANDLER_TYPE".to_string(), campaign.handler_type.as_str().to_string()),
        ];
        if let Some(handler_id) = campaign.handler_id {
            variables.push(("HANDLER_ID".to_string(), handler_id.to_string()));
        }
        variables.push(("AMD_ENABLED".to_string(), campaign.amd_enabled.to_string()));

        let caller_id = campaign
            .caller_id
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| dialer.default_caller_id.clone());

        OriginateRequest {
            action_id: Uuid::new_v4().to_string(),
            channel: format!("{}/{}@{}", dialer.channel_tech, contact.phone, trunk.name),
            context: dialer.context.clone(),
            exten: dialer.exten.clone(),
            priority: dialer.priority,
            caller_id,
            timeout_ms: dialer.originate_timeout_ms,
            variables,
        }
    }

    async fn pause_for_trunk(&self, campaign_id: i64, reason: String) -> Result<(), CampaignError> {
        tracing::warn!("Pausing campaign {}: {}", campaign_id, reason);
        self.emit(CampaignEvent::TrunkError {
            campaign_id,
            message: reason.clone(),
        });
        self.pause_with_reason(campaign_id, reason).await
    }

    async fn pause_with_reason(&self, campaign_id: i64, reason: String) -> Result<(), CampaignError> {
        self.halt(campaign_id).await;
        self.record_error(campaign_id, reason.clone()).await;
        self.inner
            .repos
            .campaigns
            .set_campaign_status(campaign_id, CampaignStatus::Paused)
            .await?;
        self.emit(CampaignEvent::Paused {
            campaign_id,
            reason: Some(reason),
        });
        Ok(())
    }

    async fn complete(&self, campaign_id: i64) -> Result<(), CampaignError> {
        self.finish(campaign_id).await?;
        tracing::info!("Campaign {} completed", campaign_id);
        self.emit(CampaignEvent::Completed { campaign_id });
        Ok(())
    }

    /// Cancel the runner, forget runtime state and mark the campaign completed.
    async fn finish(&self, campaign_id: i64) -> Result<(), CampaignError> {
        if let Some(state) = self.inner.campaigns.lock().await.remove(&campaign_id) {
            if let Some(token) = state.runner {
                token.cancel();
            }
        }
        self.inner
            .repos
            .campaigns
            .set_campaign_status(campaign_id, CampaignStatus::Completed)
            .await?;
        Ok(())
    }

    /// Cancel the pacing task, keeping the rest of the state.
    async fn halt(&self, campaign_id: i64) {
        let mut states = self.inner.campaigns.lock().await;
        if let Some(token) = states.get_mut(&campaign_id).and_then(|s| s.runner.take()) {
            token.cancel();
        }
    }

    /// Claim the runner slot. Also hands back the previous pacing task so
    /// the caller can wait for it to wind down.
    async fn reserve_runner(
        &self,
        campaign_id: i64,
    ) -> Result<(CancellationToken, Option<JoinHandle<()>>), CampaignError> {
        let mut states = self.inner.campaigns.lock().await;
        let state = states.entry(campaign_id).or_default();
        if state.runner.is_some() {
            return Err(CampaignError::AlreadyRunning(campaign_id));
        }
        let token = CancellationToken::new();
        state.runner = Some(token.clone());
        state.last_error = None;
        Ok((token, state.task.take()))
    }

    /// Clear the runner slot if it still belongs to `token`.
    async fn release_runner(&self, campaign_id: i64, token: &CancellationToken) {
        token.cancel();
        let mut states = self.inner.campaigns.lock().await;
        if let Some(state) = states.get_mut(&campaign_id) {
            // A newer runner's token is not cancelled
            if state.runner.as_ref().is_some_and(|t| t.is_cancelled()) {
                state.runner = None;
            }
        }
    }

    async fn is_running(&self, campaign_id: i64) -> bool {
        self.inner
            .campaigns
            .lock()
            .await
            .get(&campaign_id)
            .is_some_and(|s| s.runner.is_some())
    }

    async fn is_active(&self, campaign_id: i64, contact_id: i64) -> bool {
        self.inner
            .campaigns
            .lock()
            .await
            .get(&campaign_id)
            .is_some_and(|s| s.active.contains(&contact_id))
    }

    async fn active_contacts(&self, campaign_id: i64) -> Vec<i64> {
        self.inner
            .campaigns
            .lock()
            .await
            .get(&campaign_id)
            .map(|s| s.active.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn release_contact(&self, campaign_id: i64, contact_id: i64) {
        if let Some(state) = self.inner.campaigns.lock().await.get_mut(&campaign_id) {
            state.active.remove(&contact_id);
        }
    }

    async fn record_error(&self, campaign_id: i64, message: String) {
        if let Some(state) = self.inner.campaigns.lock().await.get_mut(&campaign_id) {
            state.last_error = Some(message);
        }
    }

    async fn load(&self, campaign_id: i64) -> Result<Campaign, CampaignError> {
        self.inner
            .repos
            .campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or(CampaignError::CampaignNotFound(campaign_id))
    }

    fn emit(&self, event: CampaignEvent) {
        let _ = self.inner.events.send(event);
    }
}

/// Result for a channel that answered and then hung up without a report.
/// Only clear failure causes override `answered`.
fn hangup_status(cause: i32) -> ContactStatus {
    match cause {
        17 => ContactStatus::Busy,
        18 | 19 => ContactStatus::NoAnswer,
        1 | 3 | 21 | 27 | 34 | 38 => ContactStatus::Failed,
        _ => ContactStatus::Answered,
    }
}
