use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Controller cadence for draining playback completions and refreshing the view.
pub const TICK_MS: u64 = 20;

/// Frames covered by `duration` at `sample_rate`, rounded down.
pub fn frames_for(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * sample_rate as f64) as u64
}

pub fn duration_of(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

/// Shared playhead, in frames, advanced by whoever renders the audio.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn advance(&self, frames: u64) -> u64 {
        self.frames.fetch_add(frames, Ordering::AcqRel) + frames
    }

    pub fn set(&self, frame: u64) {
        self.frames.store(frame, Ordering::Release);
    }
}
