use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::*;
use crate::models::{AmdVerdict, Campaign, CampaignStatus, ContactStatus, TrunkHealth};
use crate::server::ami::{AmiError, AmiMessage, ControlEvent, ControlPlaneEvent, OriginateRequest};
use crate::server::config::DialerConfig;
use crate::server::db::memory::fixtures::{campaign, contact, trunk};
use crate::server::db::{CampaignRepository, ContactRepository, MemoryStore, Repositories};

struct MockControl {
    connected: AtomicBool,
    fail_originate: AtomicBool,
    trunk_status: Mutex<String>,
    /// How long a trunk status query takes
    health_delay: Mutex<Duration>,
    /// Switch that reports a failed origination before acknowledging the action
    early_failure: Mutex<Option<(broadcast::Sender<ControlPlaneEvent>, i32)>>,
    requests: Mutex<Vec<OriginateRequest>>,
}

impl MockControl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            fail_originate: AtomicBool::new(false),
            trunk_status: Mutex::new("Registered".to_string()),
            health_delay: Mutex::new(Duration::ZERO),
            early_failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<OriginateRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn dialed_channels(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.channel).collect()
    }

    fn action_id(&self, n: usize) -> String {
        self.requests()[n].action_id.clone()
    }
}

#[async_trait]
impl ControlPlane for MockControl {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn originate(&self, request: OriginateRequest) -> Result<(), AmiError> {
        let action_id = request.action_id.clone();
        self.requests.lock().unwrap().push(request);
        if self.fail_originate.load(Ordering::SeqCst) {
            return Err(AmiError::ActionFailed {
                action: "Originate".to_string(),
                message: "Extension does not exist".to_string(),
            });
        }

        let early = self.early_failure.lock().unwrap().clone();
        if let Some((events, reason)) = early {
            let _ = events.send(originate_response(&action_id, "Failure", &reason.to_string(), None));
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    async fn trunk_health(&self, trunk: &str) -> Result<TrunkHealth, AmiError> {
        let delay = *self.health_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let status = self.trunk_status.lock().unwrap().clone();
        Ok(TrunkHealth {
            name: trunk.to_string(),
            reachable: status == "Registered",
            status,
        })
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    control: Arc<MockControl>,
    engine: CampaignEngine,
    events: broadcast::Receiver<CampaignEvent>,
}

impl Harness {
    async fn new(camp: Campaign, phones: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert_trunk(trunk(1, "main", true)).await;
        for (i, phone) in phones.iter().enumerate() {
            store.insert_contact(contact(i as i64 + 1, Some(camp.id), phone)).await;
        }
        store.insert_campaign(camp).await;

        let control = MockControl::new();
        let engine = engine_for(&store, &control);
        let events = engine.subscribe();
        Self {
            store,
            control,
            engine,
            events,
        }
    }

    async fn campaign(&self, id: i64) -> Campaign {
        self.store.get_campaign(id).await.unwrap().unwrap()
    }

    async fn contact_status(&self, id: i64) -> ContactStatus {
        self.store.get_contact(id).await.unwrap().unwrap().status
    }

    fn drain(&mut self) -> Vec<CampaignEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn engine_for(store: &Arc<MemoryStore>, control: &Arc<MockControl>) -> CampaignEngine {
    let control: Arc<dyn ControlPlane> = control.clone();
    CampaignEngine::new(Repositories::from_store(store.clone()), control, DialerConfig::default())
}

async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_holds() {
    let mut camp = campaign(1);
    camp.max_concurrent = 2;
    let h = Harness::new(camp, &["+1001", "+1002", "+1003", "+1004", "+1005"]).await;

    h.engine.start(1).await.unwrap();
    // Fifteen pacing ticks, no call ever finishes
    wait(30_000).await;

    let dialing = h
        .store
        .contacts_in(1)
        .await
        .iter()
        .filter(|c| c.status == ContactStatus::Dialing)
        .count();
    assert_eq!(dialing, 2);
    assert_eq!(h.control.requests().len(), 2);
    assert_eq!(h.campaign(1).await.dialed, 2);

    let status = h.engine.campaign_status(1).await.unwrap();
    assert!(status.running);
    assert_eq!(status.active_calls, 2);
    assert!(status.last_dial_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_originations_exhaust_attempts_then_complete() {
    let mut camp = campaign(1);
    camp.retry_attempts = 1;
    let mut h = Harness::new(camp, &["+1001"]).await;
    h.control.fail_originate.store(true, Ordering::SeqCst);

    h.engine.start(1).await.unwrap();
    wait(10_000).await;

    assert_eq!(h.control.requests().len(), 2);
    let contact = h.store.get_contact(1).await.unwrap().unwrap();
    assert_eq!(contact.status, ContactStatus::Failed);
    assert_eq!(contact.attempts, 2);

    let camp = h.campaign(1).await;
    assert_eq!(camp.status, CampaignStatus::Completed);
    assert_eq!(camp.dialed, 2);
    assert_eq!(camp.failed, 2);

    // Origination errors never reach the do-not-call ledger
    assert!(h.store.dnc_entries().await.is_empty());

    let events = h.drain();
    let failures = events
        .iter()
        .filter(|e| matches!(e, CampaignEvent::OriginationFailed { .. }))
        .count();
    assert_eq!(failures, 2);
    assert_eq!(events.last(), Some(&CampaignEvent::Completed { campaign_id: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_cool_off() {
    let mut camp = campaign(1);
    camp.retry_attempts = 1;
    camp.retry_delay_minutes = 5;
    let h = Harness::new(camp, &["+1001", "+1002"]).await;

    h.engine.start(1).await.unwrap();
    wait(1_000).await;
    h.engine.handle_call_result(1, ContactStatus::NoAnswer, None).await.unwrap();

    wait(2_000).await;
    h.engine.handle_call_result(2, ContactStatus::Answered, Some(77)).await.unwrap();

    // First contact is still cooling off; nothing to dial but not done either
    wait(2_000).await;
    assert_eq!(h.control.requests().len(), 2);
    assert_eq!(h.campaign(1).await.status, CampaignStatus::Running);

    h.store.backdate_attempt(1, chrono::Duration::minutes(10)).await;
    wait(2_000).await;

    assert_eq!(
        h.control.dialed_channels(),
        vec![
            "PJSIP/+1001@main".to_string(),
            "PJSIP/+1002@main".to_string(),
            "PJSIP/+1001@main".to_string(),
        ]
    );
    assert_eq!(h.store.get_contact(2).await.unwrap().unwrap().call_log_id, Some(77));

    // Attempt budget spent; the next tick completes the campaign
    h.engine.handle_call_result(1, ContactStatus::Busy, None).await.unwrap();
    wait(2_000).await;
    let camp = h.campaign(1).await;
    assert_eq!(camp.status, CampaignStatus::Completed);
    assert_eq!(camp.no_answer, 1);
    assert_eq!(camp.busy, 1);
    assert_eq!(camp.answered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_originate_request_carries_campaign_variables() {
    let mut camp = campaign(1);
    camp.caller_id = Some("+18005550000".to_string());
    camp.amd_enabled = true;
    let h = Harness::new(camp, &["+1001"]).await;

    h.engine.start(1).await.unwrap();
    wait(100).await;

    let request = h.control.requests().remove(0);
    assert_eq!(request.channel, "PJSIP/+1001@main");
    assert_eq!(request.context, "campaign-outbound");
    assert_eq!(request.caller_id.as_deref(), Some("+18005550000"));
    let names: Vec<&str> = request.variables.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        names,
        vec!["CAMPAIGN_ID", "CONTACT_ID", "HANDLER_TYPE", "HANDLER_ID", "AMD_ENABLED"]
    );
    assert!(request
        .variables
        .contains(&("HANDLER_TYPE".to_string(), "ai_agent".to_string())));
    assert!(request
        .variables
        .contains(&("AMD_ENABLED".to_string(), "true".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_start_preconditions() {
    let h = Harness::new(campaign(1), &["+1001"]).await;

    assert!(matches!(
        h.engine.start(9).await,
        Err(CampaignError::CampaignNotFound(9))
    ));

    h.control.connected.store(false, Ordering::SeqCst);
    assert!(matches!(
        h.engine.start(1).await,
        Err(CampaignError::ControlPlaneUnavailable)
    ));
    h.control.connected.store(true, Ordering::SeqCst);

    h.engine.start(1).await.unwrap();
    assert!(matches!(
        h.engine.start(1).await,
        Err(CampaignError::AlreadyRunning(1))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_start_without_enabled_trunk_fails() {
    let store = Arc::new(MemoryStore::new());
    store.insert_campaign(campaign(1)).await;
    store.insert_contact(contact(1, Some(1), "+1001")).await;
    store.insert_trunk(trunk(1, "main", false)).await;
    let control = MockControl::new();
    let engine = engine_for(&store, &control);

    let err = engine.start(1).await.unwrap_err();
    assert!(matches!(err, CampaignError::TrunkUnavailable(_)));
    assert_eq!(
        store.get_campaign(1).await.unwrap().unwrap().status,
        CampaignStatus::Idle
    );
    assert!(!engine.campaign_status(1).await.unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn test_start_imports_general_pool() {
    let store = Arc::new(MemoryStore::new());
    store.insert_campaign(campaign(1)).await;
    store.insert_trunk(trunk(1, "main", true)).await;
    let control = MockControl::new();
    let engine = engine_for(&store, &control);

    assert!(matches!(engine.start(1).await, Err(CampaignError::NoContacts(1))));
    // A failed start leaves no runner behind
    assert!(!engine.campaign_status(1).await.unwrap().running);

    store.insert_contact(contact(1, None, "+1001")).await;
    engine.start(1).await.unwrap();
    wait(100).await;
    assert_eq!(store.contacts_in(1).await.len(), 1);
    assert_eq!(control.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_trunk_pauses_campaign() {
    let mut h = Harness::new(campaign(1), &["+1001"]).await;
    *h.control.trunk_status.lock().unwrap() = "Rejected".to_string();

    h.engine.start(1).await.unwrap();
    wait(5_000).await;

    assert!(h.control.requests().is_empty());
    assert_eq!(h.campaign(1).await.status, CampaignStatus::Paused);
    assert_eq!(h.contact_status(1).await, ContactStatus::Pending);

    let status = h.engine.campaign_status(1).await.unwrap();
    assert!(!status.running);
    assert!(status.last_error.unwrap().contains("Rejected"));

    let events = h.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, CampaignEvent::TrunkError { message, .. } if message.contains("Rejected"))));
    assert!(events
        .iter()
        .any(|e| matches!(e, CampaignEvent::Paused { reason: Some(_), .. })));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_pinned_trunk_pauses_campaign() {
    let mut camp = campaign(1);
    camp.trunk_id = Some(2);
    let mut h = Harness::new(camp, &["+1001"]).await;
    h.store.insert_trunk(trunk(2, "backup", false)).await;

    h.engine.start(1).await.unwrap();
    wait(100).await;

    assert!(h.control.requests().is_empty());
    assert_eq!(h.campaign(1).await.status, CampaignStatus::Paused);
    assert!(h.drain().iter().any(
        |e| matches!(e, CampaignEvent::TrunkError { message, .. } if message.contains("backup is disabled"))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_results_feed_dnc_ledger() {
    let mut h = Harness::new(campaign(1), &["+1001", "+1003"]).await;
    h.store.insert_campaign(campaign(2)).await;
    h.store.insert_contact(contact(10, Some(2), "+1001")).await;
    h.store.insert_group(9, true).await;
    let mut exempt = h.store.get_contact(2).await.unwrap().unwrap();
    exempt.group_id = Some(9);
    h.store.insert_contact(exempt).await;
    h.store.mark_dialing(1, chrono::Utc::now()).await.unwrap();
    h.store.mark_dialing(2, chrono::Utc::now()).await.unwrap();

    h.engine.handle_call_result(1, ContactStatus::Answered, None).await.unwrap();
    h.engine.handle_call_result(2, ContactStatus::Busy, None).await.unwrap();

    assert_eq!(h.store.dnc_entries().await, vec![("+1001".to_string(), Some(1))]);

    // The other campaign may not call the same number
    h.engine.start(2).await.unwrap();
    wait(100).await;
    assert!(h.control.requests().is_empty());
    assert_eq!(h.campaign(2).await.status, CampaignStatus::Completed);
    assert!(h.drain().contains(&CampaignEvent::Completed { campaign_id: 2 }));
}

#[tokio::test]
async fn test_amd_verdicts_map_to_counters() {
    let h = Harness::new(campaign(1), &["+1001", "+1002", "+1003"]).await;
    for id in 1..=3 {
        h.store.mark_dialing(id, chrono::Utc::now()).await.unwrap();
    }

    h.engine.handle_amd_result(1, AmdVerdict::Machine, None).await.unwrap();
    h.engine.handle_amd_result(2, AmdVerdict::Human, None).await.unwrap();
    h.engine.handle_amd_result(3, AmdVerdict::NotSure, None).await.unwrap();

    assert_eq!(h.contact_status(1).await, ContactStatus::AnsweringMachine);
    assert_eq!(h.contact_status(3).await, ContactStatus::Answered);
    let camp = h.campaign(1).await;
    assert_eq!(camp.answering_machine, 1);
    assert_eq!(camp.answered, 2);
}

#[tokio::test]
async fn test_press1_raises_operator_alert() {
    let mut h = Harness::new(campaign(1), &["+1001"]).await;
    h.store.mark_dialing(1, chrono::Utc::now()).await.unwrap();

    h.engine.handle_call_result(1, ContactStatus::Press1, Some(5)).await.unwrap();

    let events = h.drain();
    assert_eq!(
        events,
        vec![
            CampaignEvent::CallResult {
                campaign_id: Some(1),
                contact_id: 1,
                status: ContactStatus::Press1,
            },
            CampaignEvent::OperatorAlert {
                campaign_id: Some(1),
                contact_id: 1,
                phone: "+1001".to_string(),
                name: None,
                status: ContactStatus::Press1,
            },
        ]
    );
    assert_eq!(h.campaign(1).await.press1, 1);
}

#[tokio::test]
async fn test_call_result_rejects_bad_input() {
    let h = Harness::new(campaign(1), &["+1001"]).await;

    assert!(matches!(
        h.engine.handle_call_result(1, ContactStatus::Dialing, None).await,
        Err(CampaignError::InvalidState(_))
    ));
    assert!(matches!(
        h.engine.handle_call_result(42, ContactStatus::Busy, None).await,
        Err(CampaignError::ContactNotFound(42))
    ));
    assert_eq!(h.contact_status(1).await, ContactStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_pause_keeps_active_calls() {
    let mut h = Harness::new(campaign(1), &["+1001", "+1002"]).await;

    h.engine.start(1).await.unwrap();
    wait(100).await;
    h.engine.pause(1).await.unwrap();

    let status = h.engine.campaign_status(1).await.unwrap();
    assert_eq!(status.status, CampaignStatus::Paused);
    assert!(!status.running);
    assert_eq!(status.active_calls, 1);
    assert!(matches!(h.engine.pause(1).await, Err(CampaignError::InvalidState(_))));

    // Nothing is dialed while paused
    wait(10_000).await;
    assert_eq!(h.control.requests().len(), 1);

    // Resuming keeps the in-flight contact as dialing
    h.engine.start(1).await.unwrap();
    wait(100).await;
    assert_eq!(h.contact_status(1).await, ContactStatus::Dialing);
    assert!(h.engine.campaign_status(1).await.unwrap().running);
    assert!(h
        .drain()
        .contains(&CampaignEvent::Paused { campaign_id: 1, reason: None }));
}

#[tokio::test(start_paused = true)]
async fn test_stop_completes_campaign() {
    let mut h = Harness::new(campaign(1), &["+1001", "+1002"]).await;

    h.engine.start(1).await.unwrap();
    wait(100).await;
    h.engine.stop(1).await.unwrap();

    let status = h.engine.campaign_status(1).await.unwrap();
    assert_eq!(status.status, CampaignStatus::Completed);
    assert!(!status.running);
    assert_eq!(status.active_calls, 0);
    assert!(h.drain().contains(&CampaignEvent::Stopped { campaign_id: 1 }));

    assert!(matches!(h.engine.start(1).await, Err(CampaignError::InvalidState(_))));

    // The in-flight call still reports its result
    h.engine.handle_call_result(1, ContactStatus::Answered, None).await.unwrap();
    assert_eq!(h.contact_status(1).await, ContactStatus::Answered);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_then_resume() {
    let h = Harness::new(campaign(1), &["+1001", "+1002", "+1003"]).await;

    h.engine.start(1).await.unwrap();
    wait(100).await;
    h.engine.shutdown().await;

    // Stored status untouched so the next process picks it up
    assert_eq!(h.campaign(1).await.status, CampaignStatus::Running);
    assert!(!h.engine.campaign_status(1).await.unwrap().running);
    wait(10_000).await;
    assert_eq!(h.control.requests().len(), 1);

    let restarted = engine_for(&h.store, &h.control);
    h.control.connected.store(false, Ordering::SeqCst);
    assert_eq!(restarted.resume_active().await.unwrap(), 0);
    assert_eq!(h.campaign(1).await.status, CampaignStatus::Running);

    h.control.connected.store(true, Ordering::SeqCst);
    assert_eq!(restarted.resume_active().await.unwrap(), 1);
    wait(100).await;

    // The orphaned dialing contact went back to pending
    assert_eq!(h.contact_status(1).await, ContactStatus::Pending);
    assert_eq!(h.contact_status(2).await, ContactStatus::Dialing);
    assert!(restarted.campaign_status(1).await.unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_control_plane_skips_ticks() {
    let h = Harness::new(campaign(1), &["+1001"]).await;

    h.engine.start(1).await.unwrap();
    h.control.connected.store(false, Ordering::SeqCst);
    wait(10_000).await;

    assert!(h.control.requests().len() <= 1);
    let before = h.control.requests().len();
    assert!(h.engine.campaign_status(1).await.unwrap().running);

    h.control.connected.store(true, Ordering::SeqCst);
    wait(3_000).await;
    assert_eq!(h.control.requests().len(), before.max(1));
}

fn originate_response(action_id: &str, response: &str, reason: &str, unique_id: Option<&str>) -> ControlPlaneEvent {
    ControlPlaneEvent::Event(ControlEvent::from_message(AmiMessage::from_headers(vec![
        ("Event".to_string(), "OriginateResponse".to_string()),
        ("ActionID".to_string(), action_id.to_string()),
        ("Response".to_string(), response.to_string()),
        ("Reason".to_string(), reason.to_string()),
        ("Uniqueid".to_string(), unique_id.unwrap_or("<null>").to_string()),
    ])))
}

fn hangup(unique_id: &str, cause: &str) -> ControlPlaneEvent {
    ControlPlaneEvent::Event(ControlEvent::from_message(AmiMessage::from_headers(vec![
        ("Event".to_string(), "Hangup".to_string()),
        ("Channel".to_string(), "PJSIP/main-00000001".to_string()),
        ("Uniqueid".to_string(), unique_id.to_string()),
        ("Cause".to_string(), cause.to_string()),
    ])))
}

#[tokio::test(start_paused = true)]
async fn test_failed_originate_response_records_busy() {
    let h = Harness::new(campaign(1), &["+1001", "+1002"]).await;
    let (tx, rx) = broadcast::channel(16);
    let listener = h.engine.attach_control_events(rx);

    h.engine.start(1).await.unwrap();
    wait(100).await;

    // Unknown ids are ignored
    tx.send(originate_response("other", "Failure", "5", None)).unwrap();
    tx.send(originate_response(&h.control.action_id(0), "Failure", "5", None)).unwrap();
    wait(10).await;

    assert_eq!(h.contact_status(1).await, ContactStatus::Busy);
    let camp = h.campaign(1).await;
    assert_eq!(camp.busy, 1);
    assert_eq!(h.engine.campaign_status(1).await.unwrap().active_calls, 0);

    // The slot is free again for the next contact
    wait(2_000).await;
    assert_eq!(h.contact_status(2).await, ContactStatus::Dialing);

    h.engine.shutdown().await;
    listener.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_control_plane_fatal_pauses_running_campaigns() {
    let mut h = Harness::new(campaign(1), &["+1001"]).await;
    let (tx, rx) = broadcast::channel(16);
    h.engine.attach_control_events(rx);

    h.engine.start(1).await.unwrap();
    wait(100).await;
    tx.send(ControlPlaneEvent::Fatal {
        attempts: 10,
        message: "connection refused".to_string(),
    })
    .unwrap();
    wait(10).await;

    assert_eq!(h.campaign(1).await.status, CampaignStatus::Paused);
    assert!(h.drain().iter().any(|e| matches!(
        e,
        CampaignEvent::Paused { reason: Some(reason), .. } if reason.contains("control plane lost")
    )));
}


#[tokio::test(start_paused = true)]
async fn test_restart_after_pause_waits_for_the_last_tick() {
    let mut h = Harness::new(campaign(1), &["+1001", "+1002"]).await;
    *h.control.health_delay.lock().unwrap() = Duration::from_secs(1);

    h.engine.start(1).await.unwrap();
    // The first tick is now waiting on the trunk check
    wait(100).await;
    h.engine.pause(1).await.unwrap();
    h.engine.start(1).await.unwrap();
    wait(10_000).await;

    // One runner at a time: the contact is dialed once and the limit holds
    assert_eq!(h.control.dialed_channels(), vec!["PJSIP/+1001@main".to_string()]);
    assert_eq!(h.campaign(1).await.dialed, 1);
    assert_eq!(h.engine.campaign_status(1).await.unwrap().active_calls, 1);
    let started = h
        .drain()
        .iter()
        .filter(|e| matches!(e, CampaignEvent::Started { .. }))
        .count();
    assert_eq!(started, 2);
}

#[tokio::test(start_paused = true)]
async fn test_tick_in_progress_does_not_dial_after_pause() {
    let h = Harness::new(campaign(1), &["+1001"]).await;
    *h.control.health_delay.lock().unwrap() = Duration::from_secs(1);

    h.engine.start(1).await.unwrap();
    wait(100).await;
    h.engine.pause(1).await.unwrap();
    wait(5_000).await;

    assert!(h.control.requests().is_empty());
    assert_eq!(h.contact_status(1).await, ContactStatus::Pending);
    let camp = h.campaign(1).await;
    assert_eq!(camp.status, CampaignStatus::Paused);
    assert_eq!(camp.dialed, 0);
    assert_eq!(h.engine.campaign_status(1).await.unwrap().active_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_originate_response_before_action_reply_is_matched() {
    let h = Harness::new(campaign(1), &["+1001", "+1002"]).await;
    let (tx, rx) = broadcast::channel(16);
    let listener = h.engine.attach_control_events(rx);
    *h.control.early_failure.lock().unwrap() = Some((tx.clone(), 5));

    h.engine.start(1).await.unwrap();
    wait(100).await;

    assert_eq!(h.contact_status(1).await, ContactStatus::Busy);
    assert_eq!(h.campaign(1).await.busy, 1);
    assert_eq!(h.engine.campaign_status(1).await.unwrap().active_calls, 0);

    // The slot was released, so the next contact goes out on the next tick
    *h.control.early_failure.lock().unwrap() = None;
    wait(2_000).await;
    assert_eq!(h.contact_status(2).await, ContactStatus::Dialing);

    h.engine.shutdown().await;
    listener.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hangup_of_answered_call_records_result() {
    let h = Harness::new(campaign(1), &["+1001", "+1002"]).await;
    let (tx, rx) = broadcast::channel(16);
    h.engine.attach_control_events(rx);

    h.engine.start(1).await.unwrap();
    wait(100).await;
    tx.send(originate_response(&h.control.action_id(0), "Success", "4", Some("1700000000.1")))
        .unwrap();
    wait(10).await;
    assert_eq!(h.contact_status(1).await, ContactStatus::Dialing);

    // Hangups of channels the engine did not originate are ignored
    tx.send(hangup("1700000000.99", "16")).unwrap();
    tx.send(hangup("1700000000.1", "17")).unwrap();
    wait(10).await;
    assert_eq!(h.contact_status(1).await, ContactStatus::Busy);
    assert_eq!(h.campaign(1).await.busy, 1);
    assert_eq!(h.engine.campaign_status(1).await.unwrap().active_calls, 0);

    // A result reported before the hangup wins
    wait(2_000).await;
    tx.send(originate_response(&h.control.action_id(1), "Success", "4", Some("1700000000.2")))
        .unwrap();
    wait(10).await;
    h.engine.handle_call_result(2, ContactStatus::Press1, Some(3)).await.unwrap();
    tx.send(hangup("1700000000.2", "16")).unwrap();
    wait(10).await;

    assert_eq!(h.contact_status(2).await, ContactStatus::Press1);
    let camp = h.campaign(1).await;
    assert_eq!(camp.press1, 1);
    assert_eq!(camp.answered, 0);
}

#[tokio::test]
async fn test_repeated_result_is_counted_once() {
    let mut h = Harness::new(campaign(1), &["+1001", "+1002"]).await;
    h.store.mark_dialing(1, chrono::Utc::now()).await.unwrap();
    h.store.mark_dialing(2, chrono::Utc::now()).await.unwrap();

    h.engine.handle_call_result(1, ContactStatus::Busy, None).await.unwrap();
    h.engine.handle_call_result(1, ContactStatus::Busy, None).await.unwrap();
    h.engine.handle_call_result(1, ContactStatus::NoAnswer, None).await.unwrap();

    assert_eq!(h.contact_status(1).await, ContactStatus::Busy);
    let camp = h.campaign(1).await;
    assert_eq!(camp.busy, 1);
    assert_eq!(camp.no_answer, 0);
    let results = h
        .drain()
        .iter()
        .filter(|e| matches!(e, CampaignEvent::CallResult { .. }))
        .count();
    assert_eq!(results, 1);

    // An answered call can still turn into a press-1, once
    h.engine.handle_amd_result(2, AmdVerdict::Human, Some(8)).await.unwrap();
    h.engine.handle_call_result(2, ContactStatus::Press1, None).await.unwrap();
    h.engine.handle_call_result(2, ContactStatus::Press1, None).await.unwrap();
    h.engine.handle_call_result(2, ContactStatus::Answered, None).await.unwrap();

    let contact = h.store.get_contact(2).await.unwrap().unwrap();
    assert_eq!(contact.status, ContactStatus::Press1);
    assert_eq!(contact.call_log_id, Some(8));
    let camp = h.campaign(1).await;
    assert_eq!(camp.answered, 1);
    assert_eq!(camp.press1, 1);
    let alerts = h
        .drain()
        .iter()
        .filter(|e| matches!(e, CampaignEvent::OperatorAlert { .. }))
        .count();
    assert_eq!(alerts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connected_notice_resumes_running_campaigns() {
    let mut h = Harness::new(campaign(1), &["+1001"]).await;
    h.store.set_campaign_status(1, CampaignStatus::Running).await.unwrap();
    h.control.connected.store(false, Ordering::SeqCst);
    assert_eq!(h.engine.resume_active().await.unwrap(), 0);

    let (tx, rx) = broadcast::channel(16);
    h.engine.attach_control_events(rx);
    h.control.connected.store(true, Ordering::SeqCst);
    tx.send(ControlPlaneEvent::Connected).unwrap();
    wait(100).await;

    assert!(h.engine.campaign_status(1).await.unwrap().running);
    assert_eq!(h.control.requests().len(), 1);

    // A later reconnect leaves the live runner alone
    tx.send(ControlPlaneEvent::Connected).unwrap();
    wait(100).await;
    let started = h
        .drain()
        .iter()
        .filter(|e| matches!(e, CampaignEvent::Started { .. }))
        .count();
    assert_eq!(started, 1);
}
