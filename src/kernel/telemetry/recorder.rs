use std::collections::VecDeque;

use super::event::TelemetryEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot};

pub const MAX_EVENTS: usize = 10_000;

/// Bounded event log; the oldest event goes first when full.
/// Counts in `snapshot()` cover every event ever recorded, not just the log.
#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
    totals: TelemetrySnapshot,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(MAX_EVENTS),
            totals: TelemetrySnapshot::default(),
        }
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        self.totals.apply(&event);
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.totals.clone()
    }

    /// Counts over the retained events only.
    pub fn window_snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.totals = TelemetrySnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_events_fall_off_when_full() {
        let mut recorder = TelemetryRecorder::new();
        for sequence in 0..(MAX_EVENTS as u64 + 5) {
            recorder.record(TelemetryEvent::ChunkDropped { sequence });
        }
        assert_eq!(recorder.len(), MAX_EVENTS);
        assert_eq!(recorder.events().next(), Some(&TelemetryEvent::ChunkDropped { sequence: 5 }));
        assert_eq!(recorder.window_snapshot().capture_stats.chunks_dropped, MAX_EVENTS as u64);
    }

    #[test]
    fn totals_outlive_the_event_window() {
        // Past the ring size, e.g. half an hour of 100 ms chunks.
        let mut recorder = TelemetryRecorder::new();
        let total = MAX_EVENTS as u64 * 2;
        for sequence in 0..total {
            recorder.record(TelemetryEvent::ChunkForwarded { sequence, bytes: 3200 });
        }
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.capture_stats.chunks_forwarded, total);
        assert_eq!(snapshot.capture_stats.bytes_forwarded, total * 3200);
        assert_eq!(recorder.len(), MAX_EVENTS);

        recorder.clear();
        assert_eq!(recorder.snapshot(), TelemetrySnapshot::default());
    }
}
