//! Generated media used by the end-to-end tests.

use super::constants::SAMPLE_RATE;

/// 16-bit mono PCM WAV with a sine tone of `frequency` Hz.
pub fn sine_wav(frequency: f64, duration_secs: u32) -> Vec<u8> {
    let samples = SAMPLE_RATE * duration_secs;
    let data_len = samples * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..samples {
        let t = i as f64 / SAMPLE_RATE as f64;
        let sample = (t * frequency * std::f64::consts::TAU).sin() * 0.5 * i16::MAX as f64;
        wav.extend_from_slice(&(sample as i16).to_le_bytes());
    }
    wav
}

/// Something that is clearly not audio: a PNG signature followed by junk.
pub fn not_audio() -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0u8; 64]);
    bytes
}
