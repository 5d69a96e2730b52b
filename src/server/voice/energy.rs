/// Media sample rate (Hz)
pub const SAMPLE_RATE: u32 = 16_000;

/// Normalized RMS of 16-bit little-endian PCM, in `[0, 1]`.
/// A trailing odd byte is ignored.
pub fn rms_energy(pcm: &[u8]) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for pair in pcm.chunks_exact(2) {
        let v = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
        sum += v * v;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64).sqrt() as f32).min(1.0)
}

/// Samples contained in a PCM buffer
pub(crate) fn sample_count(pcm: &[u8]) -> u64 {
    (pcm.len() / 2) as u64
}

pub(crate) fn samples_to_ms(samples: u64, sample_rate: u32) -> u64 {
    samples * 1000 / sample_rate.max(1) as u64
}

/// Playback length of a PCM buffer at `sample_rate`
pub fn frame_duration_ms(pcm: &[u8], sample_rate: u32) -> u64 {
    samples_to_ms(sample_count(pcm), sample_rate)
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// `ms` of constant-amplitude PCM at 16 kHz
    pub fn tone(amplitude: i16, ms: u64) -> Vec<u8> {
        let samples = (ms * 16) as usize;
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let s = if i % 2 == 0 { amplitude } else { amplitude.saturating_neg() };
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }
}
