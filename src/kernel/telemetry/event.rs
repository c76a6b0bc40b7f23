use serde::{Deserialize, Serialize};

use crate::kernel::state::SessionState;

// Allowed: ids, counts, frame positions, enum tags.
// Forbidden: text, audio, tool arguments or results.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    StateTransition {
        from: SessionState,
        to: SessionState,
    },

    ChunkForwarded {
        sequence: u64,
        bytes: usize,
    },

    ChunkDropped {
        sequence: u64,
    },

    UnitScheduled {
        unit_id: u64,
        start_frame: u64,
        frames: u64,
    },

    UnitFinished {
        unit_id: u64,
    },

    Interruption {
        units_cut: usize,
    },

    ToolBatch {
        requests: usize,
        unknown: usize,
    },

    TurnFlushed {
        entries: usize,
    },

    DecodeFailure,
}
