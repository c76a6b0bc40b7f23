//! Silence and length checks for discretely recorded clips.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::codec::{decode_encoded, AudioEncoding, DecodedAudio};
use super::monitor::{dynamic_range, rms};
use crate::config::{ContentTier, ValidationConfig};

/// A fully recorded segment, as handed over by whoever did the recording.
#[derive(Debug, Clone)]
pub struct RecordedClip {
    pub encoding: AudioEncoding,
    /// Rate for headerless encodings. WAV carries its own.
    pub sample_rate: u32,
    pub data: Vec<u8>,
    /// Duration measured by the recorder, if it kept one.
    pub tracked_duration: Option<Duration>,
}

impl RecordedClip {
    pub fn new(encoding: AudioEncoding, sample_rate: u32, data: Vec<u8>) -> Self {
        Self { encoding, sample_rate, data, tracked_duration: None }
    }

    pub fn with_tracked_duration(mut self, duration: Duration) -> Self {
        self.tracked_duration = Some(duration);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipReason {
    TooSmall,
    TooShort,
    TooLong,
    Silent,
    Undecodable,
    /// Decode did not finish in time; the clip is let through.
    AssumedContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipValidation {
    pub is_valid: bool,
    pub reason: Option<ClipReason>,
    pub duration_secs: f32,
    pub rms: f32,
    pub dynamic_range: f32,
}

impl ClipValidation {
    fn rejected(reason: ClipReason, duration_secs: f32) -> Self {
        Self { is_valid: false, reason: Some(reason), duration_secs, rms: 0.0, dynamic_range: 0.0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClipValidator {
    config: ValidationConfig,
}

impl ClipValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Never fails: every outcome is a `ClipValidation`.
    pub async fn validate(&self, clip: &RecordedClip) -> ClipValidation {
        let tracked_secs = clip.tracked_duration.map(|d| d.as_secs_f32());

        if clip.data.len() < self.config.min_bytes {
            debug!("Clip rejected: {} bytes", clip.data.len());
            return ClipValidation::rejected(ClipReason::TooSmall, tracked_secs.unwrap_or(0.0));
        }

        let encoding = clip.encoding;
        let rate = clip.sample_rate;
        let data = clip.data.clone();
        let decode = tokio::task::spawn_blocking(move || decode_encoded(encoding, &data, rate));

        let decoded = match tokio::time::timeout(self.config.decode_timeout(), decode).await {
            Err(_) => {
                warn!("Clip decode exceeded {:?}; assuming content", self.config.decode_timeout());
                return ClipValidation {
                    is_valid: true,
                    reason: Some(ClipReason::AssumedContent),
                    duration_secs: tracked_secs.unwrap_or(0.0),
                    rms: 0.0,
                    dynamic_range: 0.0,
                };
            }
            Ok(Err(join)) => {
                warn!("Clip decode task failed: {}", join);
                return ClipValidation::rejected(ClipReason::Undecodable, tracked_secs.unwrap_or(0.0));
            }
            Ok(Ok(Err(e))) => {
                debug!("Clip rejected: {}", e);
                return ClipValidation::rejected(ClipReason::Undecodable, tracked_secs.unwrap_or(0.0));
            }
            Ok(Ok(Ok(decoded))) => decoded,
        };

        self.check_decoded(&decoded, tracked_secs)
    }

    /// Duration and content checks on an already decoded clip.
    pub fn check_decoded(&self, audio: &DecodedAudio, tracked_secs: Option<f32>) -> ClipValidation {
        let config = &self.config;
        let duration = audio.duration().as_secs_f32();

        let relaxed = tracked_secs.is_some_and(|t| t >= config.short_clip_floor_secs);
        if duration < config.min_duration_secs && !relaxed {
            return ClipValidation::rejected(ClipReason::TooShort, duration);
        }
        let longest = tracked_secs.map_or(duration, |t| t.max(duration));
        if longest > config.max_duration_secs {
            return ClipValidation::rejected(ClipReason::TooLong, duration);
        }

        let level = rms(&audio.samples);
        let range = dynamic_range(&audio.samples);
        let has_content = config
            .tiers
            .iter()
            .filter(|tier| tier_applies(tier, duration))
            .any(|tier| level > tier.min_rms && range > tier.min_dynamic_range);

        ClipValidation {
            is_valid: has_content,
            reason: (!has_content).then_some(ClipReason::Silent),
            duration_secs: duration,
            rms: level,
            dynamic_range: range,
        }
    }
}

fn tier_applies(tier: &ContentTier, duration_secs: f32) -> bool {
    duration_secs >= tier.min_clip_secs && tier.max_clip_secs.map_or(true, |max| duration_secs < max)
}
