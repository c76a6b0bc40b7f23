//! Session telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a read-only side-effect layer. Nothing in the controller,
//! scheduler or dispatcher may branch on it.
//!
//! # PRIVACY INVARIANT
//! Events never carry user content (transcript text, audio, tool arguments).
//! Only ids, counts, durations and enum tags are allowed.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::TelemetryEvent;
pub use metrics::TelemetrySnapshot;
pub use recorder::TelemetryRecorder;
