//! Per-call voice analysis
//!
//! Energy-based detectors driven by the inbound audio of a media session.
//! Time is measured in audio samples, not wall clock, so results do not
//! depend on how fast frames arrive.

mod barge_in;
mod energy;
mod monitor;
mod vad;

pub use barge_in::{BargeIn, BargeInConfig, BargeInDetector};
pub use energy::{frame_duration_ms, rms_energy, SAMPLE_RATE};
pub use monitor::{spawn_monitor, CallAudioEvent, MonitorConfig};
pub use vad::{VadConfig, VadEvent, VadState, VoiceActivityDetector};
