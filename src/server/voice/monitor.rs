//! Voice analysis attached to a live media session

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::barge_in::{BargeInConfig, BargeInDetector};
use super::vad::{VadConfig, VadEvent, VoiceActivityDetector};
use crate::server::audiosocket::{MediaError, MediaSession, SessionEvent};

#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub vad: VadConfig,
    pub barge_in: BargeInConfig,
}

/// Everything the AI layer needs from one call, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum CallAudioEvent {
    Audio(Bytes),
    SpeechStart { at_ms: u64 },
    SpeechEnd { start_ms: u64, end_ms: u64, duration_ms: u64 },
    BargeIn { at_ms: u64, energy: f32 },
    Hangup,
    Error(String),
    Closed,
}

/// Take over the session's event stream and republish it with voice
/// activity and barge-in detections merged in. `ai_speaking` tells the
/// barge-in detector when synthesized audio is playing.
pub async fn spawn_monitor(
    session: Arc<MediaSession>,
    config: MonitorConfig,
    ai_speaking: watch::Receiver<bool>,
) -> Result<(mpsc::UnboundedReceiver<CallAudioEvent>, JoinHandle<()>), MediaError> {
    if session.is_closed() {
        return Err(MediaError::Closed(session.call_id().to_string()));
    }
    let events = session
        .take_events()
        .await
        .ok_or_else(|| MediaError::EventsTaken(session.call_id().to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let call_id = session.call_id().to_string();
    let handle = tokio::spawn(async move {
        run(call_id, config, events, ai_speaking, tx).await;
    });
    Ok((rx, handle))
}

async fn run(
    call_id: String,
    config: MonitorConfig,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut ai_speaking: watch::Receiver<bool>,
    tx: mpsc::UnboundedSender<CallAudioEvent>,
) {
    let mut vad = VoiceActivityDetector::new(config.vad);
    let mut barge_in = BargeInDetector::new(config.barge_in);
    barge_in.set_ai_speaking(*ai_speaking.borrow());
    let mut watching = true;

    loop {
        tokio::select! {
            changed = ai_speaking.changed(), if watching => match changed {
                Ok(()) => barge_in.set_ai_speaking(*ai_speaking.borrow_and_update()),
                Err(_) => {
                    // Flag owner went away; treat the AI as silent from now on
                    watching = false;
                    barge_in.set_ai_speaking(false);
                }
            },
            event = events.recv() => {
                let Some(event) = event else { break };
                let closed = event == SessionEvent::Closed;
                if !forward(&tx, event, &mut vad, &mut barge_in) || closed {
                    break;
                }
            }
        }
    }

    tracing::debug!("Voice monitor for call {} finished", call_id);
}

/// Returns false once nobody is listening.
fn forward(
    tx: &mpsc::UnboundedSender<CallAudioEvent>,
    event: SessionEvent,
    vad: &mut VoiceActivityDetector,
    barge_in: &mut BargeInDetector,
) -> bool {
    let mut out = Vec::with_capacity(3);
    match event {
        SessionEvent::Audio(pcm) => {
            let speech = vad.process(&pcm);
            let interrupt = barge_in.process(&pcm);
            out.push(CallAudioEvent::Audio(pcm));
            match speech {
                Some(VadEvent::SpeechStart { at_ms }) => out.push(CallAudioEvent::SpeechStart { at_ms }),
                Some(VadEvent::SpeechEnd { start_ms, end_ms, duration_ms }) => {
                    out.push(CallAudioEvent::SpeechEnd { start_ms, end_ms, duration_ms })
                }
                None => {}
            }
            if let Some(hit) = interrupt {
                out.push(CallAudioEvent::BargeIn { at_ms: hit.at_ms, energy: hit.energy });
            }
        }
        SessionEvent::Hangup => out.push(CallAudioEvent::Hangup),
        SessionEvent::Error(message) => out.push(CallAudioEvent::Error(message)),
        SessionEvent::Closed => out.push(CallAudioEvent::Closed),
    }

    out.into_iter().all(|event| tx.send(event).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::audiosocket::{Frame, FrameCodec, FrameType, MediaSocketServer, SessionRegistry};
    use crate::server::config::MediaConfig;
    use crate::server::voice::energy::fixtures::tone;
    use futures::SinkExt;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    async fn connected_session() -> (Framed<TcpStream, FrameCodec>, Arc<MediaSession>) {
        let config = MediaConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let server = MediaSocketServer::bind(&config, SessionRegistry::new()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, mut sessions) = mpsc::channel(1);
        tokio::spawn(server.serve(tx));

        let mut peer = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec);
        peer.send(Frame::new(FrameType::Handshake, b"monitor-test".to_vec()))
            .await
            .unwrap();
        let session = sessions.recv().await.unwrap();
        (peer, session)
    }

    async fn collect_until_closed(rx: &mut mpsc::UnboundedReceiver<CallAudioEvent>) -> Vec<CallAudioEvent> {
        let mut out = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let done = event == CallAudioEvent::Closed;
            out.push(event);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn test_merges_speech_and_lifecycle() {
        let (mut peer, session) = connected_session().await;
        let (_flag_tx, flag_rx) = watch::channel(false);
        let (mut rx, _handle) = spawn_monitor(session.clone(), MonitorConfig::default(), flag_rx)
            .await
            .unwrap();

        for _ in 0..25 {
            peer.send(Frame::new(FrameType::InboundAudio, tone(8000, 20))).await.unwrap();
        }
        for _ in 0..40 {
            peer.send(Frame::new(FrameType::InboundAudio, tone(0, 20))).await.unwrap();
        }
        peer.send(Frame::hangup()).await.unwrap();

        let events = collect_until_closed(&mut rx).await;
        let derived: Vec<_> = events
            .iter()
            .filter(|e| !matches!(e, CallAudioEvent::Audio(_)))
            .cloned()
            .collect();
        assert_eq!(
            derived,
            vec![
                CallAudioEvent::SpeechStart { at_ms: 0 },
                CallAudioEvent::SpeechEnd { start_ms: 0, end_ms: 500, duration_ms: 500 },
                CallAudioEvent::Hangup,
                CallAudioEvent::Closed,
            ]
        );
        assert_eq!(events.iter().filter(|e| matches!(e, CallAudioEvent::Audio(_))).count(), 65);
    }

    #[tokio::test]
    async fn test_barge_in_follows_flag() {
        let (mut peer, session) = connected_session().await;
        let (flag_tx, flag_rx) = watch::channel(false);
        let (mut rx, _handle) = spawn_monitor(session.clone(), MonitorConfig::default(), flag_rx)
            .await
            .unwrap();

        // Loud while the AI is silent: speech, but no barge-in
        for _ in 0..20 {
            peer.send(Frame::new(FrameType::InboundAudio, tone(20000, 20))).await.unwrap();
        }
        let mut seen = 0;
        while seen < 20 {
            if let Some(CallAudioEvent::Audio(_)) = rx.recv().await {
                seen += 1;
            }
        }

        flag_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..20 {
            peer.send(Frame::new(FrameType::InboundAudio, tone(20000, 20))).await.unwrap();
        }
        peer.send(Frame::hangup()).await.unwrap();

        let events = collect_until_closed(&mut rx).await;
        let barge_ins = events
            .iter()
            .filter(|e| matches!(e, CallAudioEvent::BargeIn { .. }))
            .count();
        assert_eq!(barge_ins, 1);
    }

    #[tokio::test]
    async fn test_second_monitor_rejected() {
        let (_peer, session) = connected_session().await;
        let (_tx, flag) = watch::channel(false);
        let _first = spawn_monitor(session.clone(), MonitorConfig::default(), flag.clone())
            .await
            .unwrap();
        let second = spawn_monitor(session, MonitorConfig::default(), flag).await;
        assert!(matches!(second, Err(MediaError::EventsTaken(_))));
    }
}
