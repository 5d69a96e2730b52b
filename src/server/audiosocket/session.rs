use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::frame::{Frame, FrameCodec, FrameType};
use super::server::SessionRegistry;
use super::MediaError;

/// 20 ms of 16 kHz 16-bit mono audio
pub const AUDIO_CHUNK_BYTES: usize = 640;

/// How long teardown waits to flush and shut the write half
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) type FrameReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, FrameCodec>;
pub(crate) type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

/// Lifecycle and audio events of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Caller audio, raw PCM
    Audio(Bytes),
    /// The switch hung up the call
    Hangup,
    /// The switch reported an error on this call
    Error(String),
    /// Emitted exactly once, after which nothing else is delivered
    Closed,
}

/// One bridged call
pub struct MediaSession {
    call_id: String,
    started_at: Instant,
    writer: Mutex<Option<FrameWriter>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: RwLock<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    closed: AtomicBool,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    registry: SessionRegistry,
    cancel: CancellationToken,
}

impl MediaSession {
    pub(crate) fn new(
        call_id: String,
        writer: FrameWriter,
        registry: SessionRegistry,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            call_id,
            started_at: Instant::now(),
            writer: Mutex::new(Some(writer)),
            events_tx,
            events_rx: RwLock::new(Some(events_rx)),
            closed: AtomicBool::new(false),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            registry,
            cancel,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Take the event receiver. Only one consumer can own it.
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.write().await.take()
    }

    /// Send PCM to the caller in frames of at most [`AUDIO_CHUNK_BYTES`].
    /// Does nothing once the session is closed; a write still blocked on the
    /// peer when the session closes is abandoned.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<(), MediaError> {
        if pcm.is_empty() || self.is_closed() {
            return Ok(());
        }

        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Ok(());
            };
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                result = write_chunks(writer, pcm) => result,
            }
        };

        match result {
            Ok(()) => {
                self.bytes_out.fetch_add(pcm.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Audio write to call {} failed: {}", self.call_id, e);
                self.close().await;
                Err(e)
            }
        }
    }

    /// Ask the switch to hang up, then close the session.
    pub async fn hangup(&self) {
        if self.is_closed() {
            return;
        }
        if let Some(writer) = self.writer.lock().await.as_mut() {
            if let Err(e) = writer.send(Frame::hangup()).await {
                tracing::debug!("Hangup frame for call {} not delivered: {}", self.call_id, e);
            }
        }
        self.close().await;
    }

    /// Tear the session down. Safe to call any number of times; only the
    /// first call has an effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Also aborts a write stuck on a peer that stopped reading
        self.cancel.cancel();
        self.registry.remove(&self.call_id).await;

        tracing::info!(
            "Media session {} closed ({} bytes in, {} bytes out, {:?})",
            self.call_id,
            self.bytes_received(),
            self.bytes_sent(),
            self.uptime()
        );
        let _ = self.events_tx.send(SessionEvent::Closed);

        let shut = tokio::time::timeout(WRITER_CLOSE_TIMEOUT, async {
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.close().await;
            }
        });
        if shut.await.is_err() {
            tracing::debug!("Write half of call {} dropped without a clean shutdown", self.call_id);
        }
    }

    /// Refuse a connection that never became a live session.
    pub(crate) async fn reject(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Frame::error(reason)).await;
            let _ = writer.close().await;
        }
    }

    /// Consume inbound frames until hangup, transport close or cancellation.
    pub(crate) async fn run(self: Arc<Self>, mut reader: FrameReader) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = reader.next() => match frame {
                    Some(Ok(frame)) => {
                        if !self.handle_frame(frame) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Media session {} read error: {}", self.call_id, e);
                        break;
                    }
                    None => {
                        tracing::debug!("Media session {} transport closed", self.call_id);
                        break;
                    }
                },
            }
        }

        self.close().await;
    }

    /// Returns false when the session should end.
    fn handle_frame(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }

        match frame.frame_type() {
            Some(FrameType::InboundAudio) => {
                self.bytes_in.fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
                let _ = self.events_tx.send(SessionEvent::Audio(frame.payload));
                true
            }
            Some(FrameType::Hangup) => {
                tracing::info!("Switch hung up call {}", self.call_id);
                let _ = self.events_tx.send(SessionEvent::Hangup);
                false
            }
            Some(FrameType::Error) => {
                let message = describe_error(&frame.payload);
                tracing::warn!("Switch reported error on call {}: {}", self.call_id, message);
                let _ = self.events_tx.send(SessionEvent::Error(message));
                true
            }
            Some(FrameType::Handshake) | Some(FrameType::OutboundAudio) => {
                tracing::debug!("Ignoring unexpected {:?} frame on call {}", frame.frame_type(), self.call_id);
                true
            }
            None => {
                tracing::warn!(
                    "Dropping frame of unknown type 0x{:02x} ({} bytes) on call {}",
                    frame.kind,
                    frame.payload.len(),
                    self.call_id
                );
                true
            }
        }
    }
}

async fn write_chunks(writer: &mut FrameWriter, pcm: &[u8]) -> Result<(), MediaError> {
    for chunk in pcm.chunks(AUDIO_CHUNK_BYTES) {
        writer.feed(Frame::audio(Bytes::copy_from_slice(chunk))).await?;
    }
    writer.flush().await
}

/// Error payloads are usually a single code byte; some switches send text.
fn describe_error(payload: &[u8]) -> String {
    match payload {
        [] => "unspecified error".to_string(),
        [code] => format!("error code 0x{:02x}", code),
        text => String::from_utf8_lossy(text).trim().to_string(),
    }
}
