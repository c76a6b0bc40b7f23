//! Session configuration, loadable from TOML.
//!
//! Every section is `#[serde(default)]`, so a config file only needs to name
//! the values it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::codec::AudioEncoding;
use crate::error::{Result, VoiceError};

/// Rates supported by the capture pump's voice activity detector.
pub const VAD_RATES: [u32; 4] = [8000, 16000, 32000, 48000];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub validation: ValidationConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.0-flash-live-001".to_string(),
            voice: None,
            system_instruction: None,
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: SessionConfig =
            toml::from_str(raw).map_err(|e| VoiceError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the capture and playback paths cannot honour.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if !(10..=250).contains(&capture.chunk_ms) {
            return Err(VoiceError::Configuration(format!(
                "capture.chunk_ms must be within 10..=250, got {}",
                capture.chunk_ms
            )));
        }
        if capture.sample_rate < 8000 || capture.sample_rate > 48000 {
            return Err(VoiceError::Configuration(format!(
                "capture.sample_rate {} is outside 8000..=48000",
                capture.sample_rate
            )));
        }
        if capture.encoding_preferences.is_empty() {
            return Err(VoiceError::Configuration(
                "capture.encoding_preferences must not be empty".into(),
            ));
        }
        if capture.channel_capacity == 0 {
            return Err(VoiceError::Configuration(
                "capture.channel_capacity must be positive".into(),
            ));
        }
        if self.playback.tick_ms == 0 {
            return Err(VoiceError::Configuration("playback.tick_ms must be positive".into()));
        }
        let validation = &self.validation;
        if validation.min_duration_secs >= validation.max_duration_secs {
            return Err(VoiceError::Configuration(
                "validation.min_duration_secs must be below max_duration_secs".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub chunk_ms: u32,
    pub encoding_preferences: Vec<AudioEncoding>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Ring buffer between the device callback and the pump.
    pub ring_capacity_ms: u32,
    /// Chunks waiting for the controller before new ones are dropped.
    pub channel_capacity: usize,
    pub voice_activity: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_ms: 100,
            encoding_preferences: vec![AudioEncoding::Pcm16, AudioEncoding::Wav, AudioEncoding::MuLaw],
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            ring_capacity_ms: 2000,
            channel_capacity: 32,
            voice_activity: true,
        }
    }
}

impl CaptureConfig {
    pub fn chunk_frames(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize) / 1000
    }

    pub fn ring_capacity(&self, device_rate: u32) -> usize {
        ((device_rate as usize * self.ring_capacity_ms as usize) / 1000).max(1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate assumed for inbound PCM payloads whose MIME type names none.
    pub inbound_sample_rate: u32,
    pub tick_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            inbound_sample_rate: 24000,
            tick_ms: crate::kernel::time::TICK_MS,
        }
    }
}

/// One level of the layered "has content" check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentTier {
    pub min_rms: f32,
    pub min_dynamic_range: f32,
    /// Tier only applies to clips at least this long.
    #[serde(default)]
    pub min_clip_secs: f32,
    /// Tier only applies to clips shorter than this.
    #[serde(default)]
    pub max_clip_secs: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_bytes: usize,
    pub min_duration_secs: f32,
    pub max_duration_secs: f32,
    pub short_clip_floor_secs: f32,
    pub decode_timeout_ms: u64,
    pub tiers: Vec<ContentTier>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_bytes: 1024,
            min_duration_secs: 0.5,
            max_duration_secs: 30.0,
            short_clip_floor_secs: 0.25,
            decode_timeout_ms: 2000,
            tiers: vec![
                ContentTier { min_rms: 0.01, min_dynamic_range: 0.05, min_clip_secs: 0.0, max_clip_secs: None },
                ContentTier { min_rms: 0.005, min_dynamic_range: 0.02, min_clip_secs: 0.0, max_clip_secs: Some(2.0) },
                ContentTier { min_rms: 0.002, min_dynamic_range: 0.1, min_clip_secs: 0.0, max_clip_secs: None },
                ContentTier { min_rms: 0.001, min_dynamic_range: 0.03, min_clip_secs: 1.0, max_clip_secs: None },
            ],
        }
    }
}

impl ValidationConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }
}
