//! Energy-threshold voice activity detection

use super::energy::{rms_energy, sample_count, samples_to_ms, SAMPLE_RATE};

/// Configuration for voice activity detection
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Normalized RMS above which a frame counts as speech
    pub threshold: f32,
    /// Continuous quiet needed to end an utterance (ms)
    pub max_silence_ms: u64,
    /// Shortest utterance that may end (ms)
    pub min_speech_ms: u64,
    pub sample_rate: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            max_silence_ms: 700,
            min_speech_ms: 200,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speaking,
}

/// Positions are milliseconds of audio since the detector started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart { at_ms: u64 },
    SpeechEnd { start_ms: u64, end_ms: u64, duration_ms: u64 },
}

/// Per-session detector; never share one between calls.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    samples: u64,
    speech_start_ms: u64,
    /// Start of the current quiet stretch while speaking
    quiet_since_ms: Option<u64>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Silence,
            samples: 0,
            speech_start_ms: 0,
            quiet_since_ms: None,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Feed one frame of PCM. Returns a transition if one happened.
    pub fn process(&mut self, pcm: &[u8]) -> Option<VadEvent> {
        let start_ms = samples_to_ms(self.samples, self.config.sample_rate);
        self.samples += sample_count(pcm);
        let end_ms = samples_to_ms(self.samples, self.config.sample_rate);
        let loud = rms_energy(pcm) > self.config.threshold;

        match self.state {
            VadState::Silence => {
                if !loud {
                    return None;
                }
                self.state = VadState::Speaking;
                self.speech_start_ms = start_ms;
                self.quiet_since_ms = None;
                tracing::trace!("Speech started at {}ms", start_ms);
                Some(VadEvent::SpeechStart { at_ms: start_ms })
            }
            VadState::Speaking => {
                if loud {
                    self.quiet_since_ms = None;
                    return None;
                }

                let quiet_since = *self.quiet_since_ms.get_or_insert(start_ms);
                let quiet_for = end_ms - quiet_since;
                let utterance = end_ms - self.speech_start_ms;
                if quiet_for < self.config.max_silence_ms || utterance < self.config.min_speech_ms {
                    return None;
                }

                self.state = VadState::Silence;
                self.quiet_since_ms = None;
                let event = VadEvent::SpeechEnd {
                    start_ms: self.speech_start_ms,
                    end_ms: quiet_since,
                    duration_ms: quiet_since - self.speech_start_ms,
                };
                tracing::trace!("Speech ended: {:?}", event);
                Some(event)
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.samples = 0;
        self.speech_start_ms = 0;
        self.quiet_since_ms = None;
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}
