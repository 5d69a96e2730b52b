use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::frame::{parse_call_id, FrameCodec, FrameType};
use super::session::{FrameReader, FrameWriter, MediaSession};
use super::MediaError;
use crate::server::config::MediaConfig;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Live sessions keyed by call id
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<MediaSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when a session for the same call is already live.
    pub async fn insert(&self, session: Arc<MediaSession>) -> Result<(), MediaError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session.call_id()) {
            return Err(MediaError::DuplicateSession(session.call_id().to_string()));
        }
        sessions.insert(session.call_id().to_string(), session);
        Ok(())
    }

    pub async fn get(&self, call_id: &str) -> Option<Arc<MediaSession>> {
        self.sessions.read().await.get(call_id).cloned()
    }

    pub async fn remove(&self, call_id: &str) -> Option<Arc<MediaSession>> {
        self.sessions.write().await.remove(call_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn call_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

/// TCP listener that turns each handshaken connection into a [`MediaSession`].
pub struct MediaSocketServer {
    listener: TcpListener,
    registry: SessionRegistry,
    shutdown: CancellationToken,
}

impl MediaSocketServer {
    pub async fn bind(config: &MediaConfig, registry: SessionRegistry) -> Result<Self, MediaError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        tracing::info!("Media socket listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            registry,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MediaError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Cancelling this token stops the accept loop and closes every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shut down. New sessions are handed to
    /// `sessions` once their handshake arrives.
    pub async fn serve(self, sessions: mpsc::Sender<Arc<MediaSession>>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("Media connection from {}", peer);
                        let registry = self.registry.clone();
                        let sessions = sessions.clone();
                        let cancel = self.shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, registry, sessions, cancel).await {
                                tracing::warn!("Media connection from {} dropped: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Media socket accept failed: {}", e),
                },
            }
        }
        tracing::info!("Media socket stopped");
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: SessionRegistry,
    sessions: mpsc::Sender<Arc<MediaSession>>,
    cancel: CancellationToken,
) -> Result<(), MediaError> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader: FrameReader =
        FramedRead::new(Box::new(read_half) as Box<dyn AsyncRead + Send + Unpin>, FrameCodec);
    let writer: FrameWriter =
        FramedWrite::new(Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>, FrameCodec);

    let call_id = timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut reader))
        .await
        .map_err(|_| MediaError::Handshake("no handshake within 10s".to_string()))??;

    let session = MediaSession::new(call_id, writer, registry.clone(), cancel);
    if let Err(e) = registry.insert(session.clone()).await {
        session.reject(&e.to_string()).await;
        return Err(e);
    }
    tracing::info!("Media session {} started", session.call_id());

    if sessions.send(session.clone()).await.is_err() {
        tracing::warn!("No consumer for media sessions; hanging up {}", session.call_id());
        session.hangup().await;
        return Ok(());
    }

    session.run(reader).await;
    Ok(())
}

/// Frames before the handshake carry no call to attach to and are dropped.
async fn read_handshake(reader: &mut FrameReader) -> Result<String, MediaError> {
    while let Some(frame) = reader.next().await {
        let frame = frame?;
        match frame.frame_type() {
            Some(FrameType::Handshake) => return parse_call_id(&frame.payload),
            Some(FrameType::Hangup) => {
                return Err(MediaError::Handshake("hangup before handshake".to_string()))
            }
            other => tracing::debug!("Dropping {:?} frame received before handshake", other),
        }
    }
    Err(MediaError::Handshake("connection closed before handshake".to_string()))
}
