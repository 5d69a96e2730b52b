//! Caller-interrupts-AI detection

use super::energy::{rms_energy, sample_count, samples_to_ms, SAMPLE_RATE};

#[derive(Debug, Clone)]
pub struct BargeInConfig {
    /// Normalized RMS the caller must exceed
    pub threshold: f32,
    /// How long the caller must stay above the threshold (ms)
    pub min_duration_ms: u64,
    /// Quiet period after a detection (ms)
    pub cooldown_ms: u64,
    pub sample_rate: u32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            min_duration_ms: 250,
            cooldown_ms: 1000,
            sample_rate: SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BargeIn {
    /// Audio position at which the threshold was crossed for long enough
    pub at_ms: u64,
    pub energy: f32,
}

/// Only listens while the AI is talking.
#[derive(Debug)]
pub struct BargeInDetector {
    config: BargeInConfig,
    ai_speaking: bool,
    samples: u64,
    loud_since_ms: Option<u64>,
    cooldown_until_ms: u64,
}

impl BargeInDetector {
    pub fn new(config: BargeInConfig) -> Self {
        Self {
            config,
            ai_speaking: false,
            samples: 0,
            loud_since_ms: None,
            cooldown_until_ms: 0,
        }
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking
    }

    pub fn set_ai_speaking(&mut self, speaking: bool) {
        if !speaking {
            self.loud_since_ms = None;
        }
        self.ai_speaking = speaking;
    }

    pub fn process(&mut self, pcm: &[u8]) -> Option<BargeIn> {
        let start_ms = samples_to_ms(self.samples, self.config.sample_rate);
        self.samples += sample_count(pcm);
        let end_ms = samples_to_ms(self.samples, self.config.sample_rate);

        if !self.ai_speaking || start_ms < self.cooldown_until_ms {
            self.loud_since_ms = None;
            return None;
        }

        let energy = rms_energy(pcm);
        if energy <= self.config.threshold {
            self.loud_since_ms = None;
            return None;
        }

        let since = *self.loud_since_ms.get_or_insert(start_ms);
        if end_ms - since < self.config.min_duration_ms {
            return None;
        }

        self.loud_since_ms = None;
        self.cooldown_until_ms = end_ms + self.config.cooldown_ms;
        tracing::debug!("Barge-in at {}ms (energy {:.3})", end_ms, energy);
        Some(BargeIn { at_ms: end_ms, energy })
    }

    pub fn reset(&mut self) {
        self.samples = 0;
        self.loud_since_ms = None;
        self.cooldown_until_ms = 0;
    }
}

impl Default for BargeInDetector {
    fn default() -> Self {
        Self::new(BargeInConfig::default())
    }
}
