//! Audio Codec (C1): μ-law ↔ PCM16, 24 kHz → 8 kHz resampling, and the JSON
//! framing used for carrier media messages. Pure functions, no state.

use std::path::Path;

use base64::Engine;
use serde::Deserialize;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// Decode a single mu-law byte to a 16-bit PCM sample.
pub fn mulaw_to_pcm(mulaw: u8) -> i16 {
    let mulaw = !mulaw;

    let sign = (mulaw & 0x80) as i16;
    let exponent = ((mulaw >> 4) & 0x07) as i16;
    let mantissa = (mulaw & 0x0F) as i16;

    let mut sample = ((mantissa << 3) + MULAW_BIAS as i16) << exponent;
    sample -= MULAW_BIAS as i16;

    if sign != 0 {
        -sample
    } else {
        sample
    }
}

/// Encode a 16-bit PCM sample to a mu-law byte. Standard ITU-T G.711 with
/// `BIAS=0x84`, clip at `32635`. Magnitude arithmetic is done in `i32` so
/// `i16::MIN` does not overflow on negation.
pub fn pcm_to_mulaw(sample: i16) -> u8 {
    let sign: i32 = if sample < 0 { 0x80 } else { 0 };
    let mut magnitude = (sample as i32).unsigned_abs() as i32;

    if magnitude > MULAW_CLIP {
        magnitude = MULAW_CLIP;
    }
    magnitude += MULAW_BIAS;

    let exponent = segment(magnitude);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Segment (exponent) lookup for the compressed magnitude, per the
/// standard table: segment boundaries double starting at 0xFF.
fn segment(magnitude: i32) -> i32 {
    match magnitude >> 7 {
        0..=1 => 0,
        2..=3 => 1,
        4..=7 => 2,
        8..=15 => 3,
        16..=31 => 4,
        32..=63 => 5,
        64..=127 => 6,
        _ => 7,
    }
}

/// `pcm16_to_mulaw(pcm) -> mulaw`: little-endian PCM16 bytes in, mu-law
/// bytes out. Output length is input length / 2.
pub fn pcm16_to_mulaw(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|b| pcm_to_mulaw(i16::from_le_bytes([b[0], b[1]])))
        .collect()
}

/// `mulaw_to_pcm16(mulaw) -> pcm`: mu-law bytes in, little-endian PCM16
/// bytes out. Inverse shape of `pcm16_to_mulaw`.
pub fn mulaw_to_pcm16(mulaw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(mulaw.len() * 2);
    for &b in mulaw {
        out.extend_from_slice(&mulaw_to_pcm(b).to_le_bytes());
    }
    out
}

/// Load a WAV file as mu-law audio scaled by `volume`, for hold music.
/// Downmixes multi-channel input by averaging, and decimates any sample
/// rate above 8 kHz to 8 kHz by the same pick-every-Nth rule as
/// `resample_24k_to_8k`.
pub fn load_wav_as_mulaw(path: &Path, volume: f32) -> Result<Vec<u8>, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader.samples::<i16>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()?,
    };

    let mono: Vec<i16> = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect()
    } else {
        samples
    };

    let decimation = (spec.sample_rate / 8000).max(1) as usize;
    let pcm: Vec<u8> = mono
        .iter()
        .step_by(decimation)
        .flat_map(|&s| {
            let scaled = (s as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            scaled.to_le_bytes()
        })
        .collect();

    Ok(pcm16_to_mulaw(&pcm))
}

/// 3:1 decimation resample, 24 kHz → 8 kHz: keep sample index `3·i`, drop
/// the rest. No anti-alias filter — this matches reference behavior and
/// is a known, accepted quality trade-off, not a bug.
pub fn resample_24k_to_8k(pcm: &[u8]) -> Vec<u8> {
    let samples = pcm.len() / 2;
    let mut out = Vec::with_capacity((samples / 3 + 1) * 2);
    let mut i = 0;
    while i < samples {
        let offset = i * 2;
        out.extend_from_slice(&pcm[offset..offset + 2]);
        i += 3;
    }
    out
}

#[derive(Deserialize)]
struct InboundFrame {
    media: Option<InboundMedia>,
}

#[derive(Deserialize)]
struct InboundMedia {
    track: Option<String>,
    payload: Option<String>,
}

/// Parse a carrier media-WS text frame; if it carries inbound audio
/// (`media.track == "inbound"`), return the decoded mu-law bytes.
/// Non-JSON input, or anything else, yields `None` without error.
pub fn extract_inbound_audio(msg: &[u8]) -> Option<Vec<u8>> {
    let frame: InboundFrame = serde_json::from_slice(msg).ok()?;
    let media = frame.media?;
    if media.track.as_deref() != Some("inbound") {
        return None;
    }
    let payload = media.payload?;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .ok()
}

/// Build an outbound media message: `{"event":"media","media":{"payload":…}[,"streamSid":…]}`.
pub fn make_media_message(audio: &[u8], stream_sid: Option<&str>) -> Vec<u8> {
    let payload = base64::engine::general_purpose::STANDARD.encode(audio);
    let mut value = serde_json::json!({
        "event": "media",
        "media": { "payload": payload }
    });
    if let Some(sid) = stream_sid {
        value["streamSid"] = serde_json::Value::String(sid.to_string());
    }
    serde_json::to_vec(&value).expect("media message serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-verified against the standard ITU-T G.711 reference algorithm
    /// (BIAS=0x84, CLIP=32635, no prescale). Decoding these back through
    /// `mulaw_to_pcm` stays within the codec's lossy tolerance of the
    /// original sample.
    const VECTORS: [(i16, u8); 8] = [
        (0, 0xFF),
        (4096, 0xAF),
        (-4096, 0x2F),
        (32767, 0x80),
        (-32768, 0x00),
        (100, 0xF2),
        (-100, 0x72),
        (1000, 0xCE),
    ];

    #[test]
    fn pcm_to_mulaw_matches_reference_table() {
        for (pcm, expected) in VECTORS {
            assert_eq!(
                pcm_to_mulaw(pcm),
                expected,
                "pcm={pcm} expected=0x{expected:02X}"
            );
        }
    }

    #[test]
    fn mulaw_roundtrip_stays_within_lossy_tolerance() {
        for (pcm, _) in VECTORS {
            let encoded = pcm_to_mulaw(pcm);
            let decoded = mulaw_to_pcm(encoded);
            let diff = (pcm as f64 - decoded as f64).abs();
            assert!(
                diff < (pcm.unsigned_abs() as f64 * 0.05 + 100.0),
                "pcm={pcm} decoded={decoded} diff={diff}"
            );
        }
    }

    #[test]
    fn pcm16_to_mulaw_halves_length() {
        let pcm = vec![0u8; 48_000 * 2];
        assert_eq!(pcm16_to_mulaw(&pcm).len(), 48_000);
    }

    #[test]
    fn resample_divides_length_by_three() {
        let pcm = vec![0u8; 24_000 * 2];
        let resampled = resample_24k_to_8k(&pcm);
        assert_eq!(resampled.len(), 8_000 * 2);
    }

    #[test]
    fn resample_then_mulaw_is_one_sixth() {
        let pcm = vec![0u8; 24_000 * 2];
        let out = pcm16_to_mulaw(&resample_24k_to_8k(&pcm));
        assert_eq!(out.len(), pcm.len() / 6);
    }

    #[test]
    fn extract_inbound_audio_reads_inbound_track() {
        let audio = vec![0xFFu8, 0x80, 0x00, 0x2F];
        let inbound = serde_json::json!({
            "event": "media",
            "media": { "track": "inbound", "payload": base64::engine::general_purpose::STANDARD.encode(&audio) }
        });
        let bytes = serde_json::to_vec(&inbound).unwrap();
        assert_eq!(extract_inbound_audio(&bytes), Some(audio));
    }

    #[test]
    fn extract_inbound_audio_ignores_outbound_frame_with_no_track() {
        let msg = make_media_message(&[1, 2, 3], Some("MZ123"));
        assert_eq!(extract_inbound_audio(&msg), None);
    }

    #[test]
    fn extract_inbound_audio_rejects_outbound_track() {
        let outbound = serde_json::json!({
            "event": "media",
            "media": { "track": "outbound", "payload": "AAAA" }
        });
        let bytes = serde_json::to_vec(&outbound).unwrap();
        assert_eq!(extract_inbound_audio(&bytes), None);
    }

    #[test]
    fn extract_inbound_audio_on_non_json_is_none_not_error() {
        assert_eq!(extract_inbound_audio(b"not json at all"), None);
    }

    #[test]
    fn make_media_message_omits_stream_sid_when_absent() {
        let msg = make_media_message(&[1, 2, 3], None);
        let value: serde_json::Value = serde_json::from_slice(&msg).unwrap();
        assert_eq!(value["event"], "media");
        assert!(value.get("streamSid").is_none());
    }

    #[test]
    fn make_media_message_includes_stream_sid_when_present() {
        let msg = make_media_message(&[1, 2, 3], Some("MZ123"));
        let value: serde_json::Value = serde_json::from_slice(&msg).unwrap();
        assert_eq!(value["streamSid"], "MZ123");
    }

    fn write_fixture_wav(path: &std::path::Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn load_wav_as_mulaw_decimates_and_scales_volume() {
        let path = std::env::temp_dir().join("call_orchestrator_test_hold_music_mono.wav");
        write_fixture_wav(&path, 8000, 1, &[1000, -1000, 2000, -2000, 3000, -3000]);
        let full_volume = load_wav_as_mulaw(&path, 1.0).unwrap();
        let half_volume = load_wav_as_mulaw(&path, 0.5).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(full_volume.len(), 6);
        assert_ne!(full_volume, half_volume);
    }

    #[test]
    fn load_wav_as_mulaw_downmixes_stereo() {
        let path = std::env::temp_dir().join("call_orchestrator_test_hold_music_stereo.wav");
        // Interleaved L/R frames; downmix should average each pair.
        write_fixture_wav(&path, 8000, 2, &[1000, 3000, -1000, -3000]);
        let mulaw = load_wav_as_mulaw(&path, 1.0).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(mulaw.len(), 2);
        assert_eq!(mulaw[0], pcm_to_mulaw(2000));
        assert_eq!(mulaw[1], pcm_to_mulaw(-2000));
    }
}
