use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Root-mean-square amplitude of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sq_sum: f32 = samples.iter().map(|&x| x * x).sum();
    (sq_sum / samples.len() as f32).sqrt()
}

/// Peak-to-peak spread (max - min) of a block of samples.
pub fn dynamic_range(samples: &[f32]) -> f32 {
    let mut iter = samples.iter().copied();
    let Some(first) = iter.next() else {
        return 0.0;
    };
    let (min, max) = iter.fold((first, first), |(lo, hi), x| (lo.min(x), hi.max(x)));
    max - min
}

/// Read-only live levels for waveform visualisation.
///
/// Writers are the capture pump (input) and the output device callback
/// (output); both store the RMS of their latest block without locking.
#[derive(Debug, Clone, Default)]
pub struct Analyser {
    input: Arc<AtomicU32>,
    output: Arc<AtomicU32>,
}

impl Analyser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.input.load(Ordering::Relaxed))
    }

    pub fn output_level(&self) -> f32 {
        f32::from_bits(self.output.load(Ordering::Relaxed))
    }

    pub(crate) fn record_input(&self, samples: &[f32]) {
        self.input.store(rms(samples).to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn record_output(&self, samples: &[f32]) {
        self.output.store(rms(samples).to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.input.store(0f32.to_bits(), Ordering::Relaxed);
        self.output.store(0f32.to_bits(), Ordering::Relaxed);
    }
}
