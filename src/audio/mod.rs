pub mod capture;
pub mod codec;
pub mod engine;
pub mod monitor;
pub mod output;
pub mod playback;
pub mod processing;
pub mod validation;

pub use capture::{CaptureConstraints, CpalMicrophone, InputStream, Microphone};
pub use codec::{AudioChunk, AudioEncoding, DecodedAudio, InlineAudio};
pub use engine::AudioCaptureEngine;
pub use monitor::Analyser;
pub use output::{SpeakerOutput, VirtualOutput};
pub use playback::{AudioPlaybackScheduler, PlaybackOutput, PlaybackUnit, UnitId, UnitSpan};
pub use validation::{ClipReason, ClipValidation, ClipValidator, RecordedClip};
