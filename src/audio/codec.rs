//! Wire encodings for captured chunks and decoding of inbound payloads.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoiceError};
use crate::kernel::time::duration_of;

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// Raw little-endian signed 16-bit PCM.
    Pcm16,
    /// RIFF/WAVE container around 16-bit PCM.
    Wav,
    /// G.711 µ-law, one byte per sample.
    MuLaw,
}

impl AudioEncoding {
    pub const ALL: [AudioEncoding; 3] = [AudioEncoding::Pcm16, AudioEncoding::Wav, AudioEncoding::MuLaw];

    pub fn is_lossless(self) -> bool {
        !matches!(self, AudioEncoding::MuLaw)
    }

    pub fn mime_type(self, sample_rate: u32) -> String {
        match self {
            AudioEncoding::Pcm16 => format!("audio/pcm;rate={sample_rate}"),
            AudioEncoding::Wav => "audio/wav".to_string(),
            AudioEncoding::MuLaw => format!("audio/basic;rate={sample_rate}"),
        }
    }
}

/// Pick the first preference the remote side accepts.
pub fn select_encoding(preferences: &[AudioEncoding], supported: &[AudioEncoding]) -> Option<AudioEncoding> {
    preferences.iter().copied().find(|encoding| supported.contains(encoding))
}

/// One fixed-duration slice of captured audio, already wire-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub sequence: u64,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub frames: usize,
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn mime_type(&self) -> String {
        self.encoding.mime_type(self.sample_rate)
    }

    pub fn duration(&self) -> Duration {
        duration_of(self.frames as u64, self.sample_rate)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Mono samples in `[-1.0, 1.0]` at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn duration(&self) -> Duration {
        duration_of(self.frames(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An audio payload as it arrives from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineAudio {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineAudio {
    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| VoiceError::decode(format!("invalid base64 audio: {e}")))?;
        Ok(Self { mime_type: mime_type.into(), data })
    }
}

/// Decode an inbound payload, taking the rate from its MIME type when present.
pub fn decode_payload(payload: &InlineAudio, default_rate: u32) -> Result<DecodedAudio> {
    let (encoding, rate) = parse_mime(&payload.mime_type)?;
    let rate = rate.unwrap_or(default_rate);
    match encoding {
        AudioEncoding::Wav => decode_wav(&payload.data),
        AudioEncoding::Pcm16 => decode_audio(&payload.data, rate, 1),
        AudioEncoding::MuLaw => Ok(DecodedAudio {
            samples: payload.data.iter().map(|&b| mulaw_decode(b)).collect(),
            sample_rate: rate,
        }),
    }
}

/// Decode primitive: interleaved little-endian PCM16, downmixed to mono.
pub fn decode_audio(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    if channels == 0 {
        return Err(VoiceError::decode("channel count must be positive"));
    }
    if sample_rate == 0 {
        return Err(VoiceError::decode("sample rate must be positive"));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(VoiceError::decode(format!(
            "{} bytes is not a whole number of {}-channel PCM16 frames",
            bytes.len(),
            channels
        )));
    }
    let samples = bytes
        .chunks_exact(frame_bytes)
        .map(|frame| {
            let sum: f32 = frame
                .chunks_exact(2)
                .map(|s| i16::from_le_bytes([s[0], s[1]]) as f32 / i16::MAX as f32)
                .sum();
            sum / channels as f32
        })
        .collect();
    Ok(DecodedAudio { samples, sample_rate })
}

/// Decode any of the supported encodings.
pub fn decode_encoded(encoding: AudioEncoding, bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio> {
    decode_payload(
        &InlineAudio { mime_type: encoding.mime_type(sample_rate), data: bytes.to_vec() },
        sample_rate,
    )
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::decode(format!("invalid wav: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VoiceError::decode(format!("invalid wav samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VoiceError::decode(format!("invalid wav samples: {e}")))?
        }
    };
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok(DecodedAudio { samples, sample_rate: spec.sample_rate })
}

pub fn encode(encoding: AudioEncoding, samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    match encoding {
        AudioEncoding::Pcm16 => Ok(samples.iter().flat_map(|&s| to_i16(s).to_le_bytes()).collect()),
        AudioEncoding::MuLaw => Ok(samples.iter().map(|&s| mulaw_encode(to_i16(s))).collect()),
        AudioEncoding::Wav => {
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec)
                    .map_err(|e| VoiceError::Encode(e.to_string()))?;
                for &sample in samples {
                    writer
                        .write_sample(to_i16(sample))
                        .map_err(|e| VoiceError::Encode(e.to_string()))?;
                }
                writer.finalize().map_err(|e| VoiceError::Encode(e.to_string()))?;
            }
            Ok(cursor.into_inner())
        }
    }
}

/// Parse `audio/pcm;rate=24000`, `audio/wav`, `audio/basic`, `audio/l16` and friends.
pub fn parse_mime(mime: &str) -> Result<(AudioEncoding, Option<u32>)> {
    let mut parts = mime.split(';').map(str::trim);
    let base = parts.next().unwrap_or_default().to_ascii_lowercase();
    let encoding = match base.as_str() {
        "audio/pcm" | "audio/l16" | "audio/raw" => AudioEncoding::Pcm16,
        "audio/wav" | "audio/wave" | "audio/x-wav" => AudioEncoding::Wav,
        "audio/basic" | "audio/pcmu" | "audio/x-mulaw" => AudioEncoding::MuLaw,
        other => return Err(VoiceError::decode(format!("unsupported audio mime type: {other}"))),
    };
    let mut rate = None;
    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().eq_ignore_ascii_case("rate") {
                let parsed = value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| VoiceError::decode(format!("invalid rate in mime type: {mime}")))?;
                rate = Some(parsed);
            }
        }
    }
    Ok((encoding, rate))
}

/// Offline resample of a whole mono buffer.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = StreamResampler::new(from, to)?;
    let expected = (samples.len() as u64 * to as u64 / from as u64) as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);
    let mut pos = 0;
    while out.len() < expected + delay {
        let need = resampler.input_frames_next();
        let mut block = vec![0.0f32; need];
        if pos < samples.len() {
            let end = (pos + need).min(samples.len());
            block[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += need;
        let produced = resampler.process(&block)?;
        if produced.is_empty() {
            break;
        }
        out.extend_from_slice(&produced);
    }
    Ok(out.into_iter().skip(delay).take(expected).collect())
}

/// Stateful mono resampler fed in blocks of `input_frames_next()`.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
}

impl StreamResampler {
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| VoiceError::Configuration(format!("resampler {from}->{to}: {e}")))?;
        Ok(Self { inner })
    }

    pub fn input_frames_next(&self) -> usize {
        self.inner.input_frames_next()
    }

    pub fn output_delay(&self) -> usize {
        self.inner.output_delay()
    }

    pub fn process(&mut self, block: &[f32]) -> Result<Vec<f32>> {
        let mut out = self
            .inner
            .process(&[block], None)
            .map_err(|e| VoiceError::decode(format!("resample failed: {e}")))?;
        Ok(out.pop().unwrap_or_default())
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

fn mulaw_encode(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0
    };
    value = value.min(MULAW_CLIP) + MULAW_BIAS;
    let exponent = (7 - (value.leading_zeros() as i32 - 17)).clamp(0, 7);
    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

fn mulaw_decode(byte: u8) -> f32 {
    let byte = !byte as i32;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    let value = if sign != 0 { -magnitude } else { magnitude };
    value as f32 / i16::MAX as f32
}
