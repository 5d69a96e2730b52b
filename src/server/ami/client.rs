//! Manager-interface client
//!
//! Keeps one authenticated session to the switch, matches responses to the
//! actions that caused them, fans events out to subscribers and reconnects
//! on its own when the transport drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::event::{ControlEvent, ControlPlaneEvent};
use super::protocol::{AmiAction, AmiCodec, AmiMessage, Inbound};
use super::AmiError;
use crate::server::config::AmiConfig;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

type AmiWriter = FramedWrite<OwnedWriteHalf, AmiCodec>;
type AmiReader = FramedRead<OwnedReadHalf, AmiCodec>;

struct Inner {
    config: AmiConfig,
    state: watch::Sender<ConnectionState>,
    /// Actions waiting for their response, keyed by ActionID
    pending: Mutex<HashMap<String, oneshot::Sender<AmiMessage>>>,
    writer: Mutex<Option<AmiWriter>>,
    events: broadcast::Sender<ControlPlaneEvent>,
    /// Consecutive failed reconnects; reset on success
    attempts: AtomicU32,
    /// Bumped for every transport so a stale reader cannot tear down a newer one
    generation: AtomicU64,
    reader_token: std::sync::Mutex<CancellationToken>,
    /// Set by `disconnect`; suppresses reconnects
    closing: AtomicBool,
}

/// Shared handle; clones talk to the same session.
#[derive(Clone)]
pub struct AmiClient {
    inner: Arc<Inner>,
}

impl AmiClient {
    pub fn new(config: AmiConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(1024);

        Self {
            inner: Arc::new(Inner {
                config,
                state,
                pending: Mutex::new(HashMap::new()),
                writer: Mutex::new(None),
                events,
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                reader_token: std::sync::Mutex::new(CancellationToken::new()),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &AmiConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Events and connection notices, in the order they happened
    pub fn subscribe(&self) -> broadcast::Receiver<ControlPlaneEvent> {
        self.inner.events.subscribe()
    }

    /// Consecutive failed reconnect attempts so far
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Open the transport, log in and subscribe to events.
    pub async fn connect(&self) -> Result<(), AmiError> {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return match self.state() {
                ConnectionState::Connected => Ok(()),
                other => Err(AmiError::Connection(format!(
                    "connection attempt already in progress ({:?})",
                    other
                ))),
            };
        }

        self.inner.closing.store(false, Ordering::SeqCst);
        match self.establish().await {
            Ok(()) => {
                tracing::info!("Manager interface connected to {}", self.inner.config.address());
                Ok(())
            }
            Err(e) => {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                tracing::error!("Manager interface connection failed: {}", e);
                Err(e)
            }
        }
    }

    /// Close the session for good; no reconnect follows.
    pub async fn disconnect(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);

        if self.is_connected() {
            let logoff = AmiAction::new("Logoff");
            if let Err(e) = self.send(logoff).await {
                tracing::debug!("Logoff before disconnect failed: {}", e);
            }
        }

        self.cancel_reader();
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        self.inner.pending.lock().await.clear();

        let previous = self.inner.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            let _ = self.inner.events.send(ControlPlaneEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
        tracing::info!("Manager interface disconnected");
    }

    /// Send an action and wait for the response carrying its ActionID.
    pub async fn action(&self, action: AmiAction) -> Result<AmiMessage, AmiError> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }
        self.send(action).await
    }

    async fn send(&self, action: AmiAction) -> Result<AmiMessage, AmiError> {
        let id = action.id().to_string();
        let name = action.name().to_string();
        let (tx, rx) = oneshot::channel();

        self.inner.pending.lock().await.insert(id.clone(), tx);

        let limit = self.inner.config.action_timeout;
        let exchange = async {
            {
                let mut writer = self.inner.writer.lock().await;
                let sink = writer.as_mut().ok_or(AmiError::NotConnected)?;
                sink.send(action).await?;
            }
            // Sender dropped means the transport went away underneath us
            rx.await.map_err(|_| AmiError::NotConnected)
        };

        match timeout(limit, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                self.inner.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                tracing::warn!("Action {} ({}) timed out", name, id);
                Err(AmiError::ActionTimeout {
                    action: name,
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    async fn establish(&self) -> Result<(), AmiError> {
        let config = &self.inner.config;
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| AmiError::Connection(format!("timed out connecting to {}", address)))?
            .map_err(|e| AmiError::Connection(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, AmiCodec::new());

        let banner = match timeout(config.action_timeout, reader.next()).await {
            Ok(Some(Ok(Inbound::Banner(banner)))) => banner,
            Ok(Some(Ok(Inbound::Message(_)))) => {
                return Err(AmiError::Connection("expected greeting, got a message".to_string()))
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Err(AmiError::Connection("closed before greeting".to_string())),
            Err(_) => return Err(AmiError::Connection("timed out waiting for greeting".to_string())),
        };
        tracing::debug!("Manager greeting: {}", banner);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        {
            let mut current = self
                .inner
                .reader_token
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            current.cancel();
            *current = token.clone();
        }
        *self.inner.writer.lock().await = Some(FramedWrite::new(write_half, AmiCodec::new()));

        let client = self.clone();
        tokio::spawn(async move {
            client.read_loop(reader, generation, token).await;
        });

        let login = AmiAction::new("Login")
            .header("Username", config.username.clone())
            .header("Secret", config.secret.clone())
            .header("Events", "on");

        let result = match self.send(login).await {
            Ok(response) if response.is_success() => self.mark_connected().await,
            Ok(response) => Err(AmiError::AuthFailed(
                response.message().unwrap_or("login rejected").to_string(),
            )),
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.cancel_reader();
            self.inner.writer.lock().await.take();
        }
        result
    }

    /// Flip to `Connected` unless the transport already died during login.
    async fn mark_connected(&self) -> Result<(), AmiError> {
        let writer = self.inner.writer.lock().await;
        if writer.is_none() {
            return Err(AmiError::Connection("connection dropped during login".to_string()));
        }
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.state.send_replace(ConnectionState::Connected);
        drop(writer);

        let _ = self.inner.events.send(ControlPlaneEvent::Connected);
        Ok(())
    }

    fn cancel_reader(&self) {
        self.inner
            .reader_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }

    async fn read_loop(self, mut reader: AmiReader, generation: u64, token: CancellationToken) {
        let reason = loop {
            tokio::select! {
                _ = token.cancelled() => return,
                frame = reader.next() => match frame {
                    Some(Ok(Inbound::Message(message))) => self.dispatch(message).await,
                    Some(Ok(Inbound::Banner(_))) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection closed by peer".to_string(),
                },
            }
        };

        self.on_transport_closed(generation, reason).await;
    }

    async fn dispatch(&self, message: AmiMessage) {
        // Some events echo an ActionID; they are still events
        if message.event_name().is_some() {
            let event = ControlEvent::from_message(message);
            tracing::trace!("Event {}", event.name);
            let _ = self.inner.events.send(ControlPlaneEvent::Event(event));
            return;
        }

        let Some(id) = message.action_id() else {
            tracing::debug!("Ignoring manager message without ActionID");
            return;
        };
        let waiter = self.inner.pending.lock().await.remove(id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => tracing::debug!("Response for unknown or expired action {}", id),
        }
    }

    pub(super) fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Every close signal of a transport lands here; only the first one for
    /// the current transport starts a reconnect.
    pub(super) async fn on_transport_closed(&self, generation: u64, reason: String) {
        if generation != self.inner.generation.load(Ordering::SeqCst) {
            return;
        }

        let started_reconnect = {
            let mut writer = self.inner.writer.lock().await;
            writer.take();
            if self.inner.closing.load(Ordering::SeqCst) {
                false
            } else {
                // Several close signals for one transport collapse here
                self.inner.state.send_if_modified(|state| {
                    if *state == ConnectionState::Connected {
                        *state = ConnectionState::Reconnecting;
                        true
                    } else {
                        false
                    }
                })
            }
        };

        // Dropping the senders fails every waiter with NotConnected
        self.inner.pending.lock().await.clear();

        if started_reconnect {
            tracing::warn!("Manager interface connection lost: {}", reason);
            let _ = self.inner.events.send(ControlPlaneEvent::Disconnected { reason });
            tokio::spawn(reconnect_boxed(self.clone()));
        }
    }

    /// Keep retrying in the background after a failed first `connect`.
    ///
    /// Uses the same bounded fixed-delay loop as a dropped session, so a switch
    /// that comes up after the bridge is picked up without a restart. Returns
    /// false when the client is not idle.
    pub fn connect_in_background(&self) -> bool {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if started {
            self.inner.closing.store(false, Ordering::SeqCst);
            tokio::spawn(reconnect_boxed(self.clone()));
        }
        started
    }

    async fn reconnect_loop(self) {
        let max = self.inner.config.max_reconnect_attempts;

        loop {
            if self.inner.closing.load(Ordering::SeqCst) {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return;
            }

            if self.inner.attempts.load(Ordering::SeqCst) >= max {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                let message = format!("gave up reconnecting to {} after {} attempts", self.inner.config.address(), max);
                tracing::error!("Manager interface {}", message);
                let _ = self.inner.events.send(ControlPlaneEvent::Fatal { attempts: max, message });
                return;
            }

            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.inner.events.send(ControlPlaneEvent::Reconnecting { attempt });
            tracing::info!(
                "Reconnecting to manager interface in {:?} (attempt {}/{})",
                self.inner.config.reconnect_delay,
                attempt,
                max
            );
            tokio::time::sleep(self.inner.config.reconnect_delay).await;

            if self.inner.closing.load(Ordering::SeqCst) {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return;
            }

            match self.establish().await {
                Ok(()) => {
                    tracing::info!("Manager interface reconnected after {} attempt(s)", attempt);
                    return;
                }
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
    }
}

// establish -> read_loop -> on_transport_closed -> reconnect_loop is a cycle;
// boxing one link gives the spawned future a nameable Send type.
fn reconnect_boxed(client: AmiClient) -> BoxFuture<'static, ()> {
    Box::pin(client.reconnect_loop())
}
