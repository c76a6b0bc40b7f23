use std::collections::VecDeque;

use serde::Serialize;

use super::event::TelemetryEvent;
use crate::kernel::state::SessionState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub session_stats: SessionStats,
    pub capture_stats: CaptureStats,
    pub playback_stats: PlaybackStats,
    pub dialogue_stats: DialogueStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub transitions: u64,
    pub connects: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureStats {
    pub chunks_forwarded: u64,
    pub chunks_dropped: u64,
    pub bytes_forwarded: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackStats {
    pub units_scheduled: u64,
    pub units_finished: u64,
    pub frames_scheduled: u64,
    pub interruptions: u64,
    pub units_cut: u64,
    pub decode_failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DialogueStats {
    pub tool_batches: u64,
    pub tool_calls: u64,
    pub unknown_tool_calls: u64,
    pub turns: u64,
    pub entries: u64,
}

/// Aggregate a window of events.
pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    for event in events {
        snap.apply(event);
    }
    snap
}

impl TelemetrySnapshot {
    /// Fold one event into the running counts.
    pub fn apply(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::StateTransition { to, .. } => {
                self.session_stats.transitions += 1;
                match to {
                    SessionState::Connected => self.session_stats.connects += 1,
                    SessionState::Error => self.session_stats.failures += 1,
                    _ => {}
                }
            }
            TelemetryEvent::ChunkForwarded { bytes, .. } => {
                self.capture_stats.chunks_forwarded += 1;
                self.capture_stats.bytes_forwarded += *bytes as u64;
            }
            TelemetryEvent::ChunkDropped { .. } => self.capture_stats.chunks_dropped += 1,
            TelemetryEvent::UnitScheduled { frames, .. } => {
                self.playback_stats.units_scheduled += 1;
                self.playback_stats.frames_scheduled += frames;
            }
            TelemetryEvent::UnitFinished { .. } => self.playback_stats.units_finished += 1,
            TelemetryEvent::Interruption { units_cut } => {
                self.playback_stats.interruptions += 1;
                self.playback_stats.units_cut += *units_cut as u64;
            }
            TelemetryEvent::ToolBatch { requests, unknown } => {
                self.dialogue_stats.tool_batches += 1;
                self.dialogue_stats.tool_calls += *requests as u64;
                self.dialogue_stats.unknown_tool_calls += *unknown as u64;
            }
            TelemetryEvent::TurnFlushed { entries } => {
                self.dialogue_stats.turns += 1;
                self.dialogue_stats.entries += *entries as u64;
            }
            TelemetryEvent::DecodeFailure => self.playback_stats.decode_failures += 1,
        }
    }
}
