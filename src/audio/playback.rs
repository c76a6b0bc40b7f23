//! Gapless scheduling of inbound audio on the output device's frame clock.
//!
//! Every unit starts at `max(next_start, now)` and pushes `next_start` past its
//! own end, so units never overlap and play in enqueue order. Times are frame
//! positions at the output rate.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::codec::{decode_payload, resample, DecodedAudio, InlineAudio};
use crate::error::{Result, VoiceError};
use crate::kernel::cancel::CancellationRegistry;

pub type UnitId = u64;

/// A decoded buffer bound to its start frame and cancellation token.
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    pub id: UnitId,
    pub start_frame: u64,
    /// Mono samples at the output rate.
    pub samples: Arc<[f32]>,
    pub cancel: CancellationToken,
}

impl PlaybackUnit {
    pub fn frames(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frames()
    }
}

/// Where a unit sits on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSpan {
    pub id: UnitId,
    pub start_frame: u64,
    pub end_frame: u64,
}

/// The device side of playback. Implementations own the playhead.
pub trait PlaybackOutput {
    fn sample_rate(&self) -> u32;

    /// Playhead in frames since the output was opened.
    fn current_frame(&self) -> u64;

    /// Arrange for `unit` to sound from its start frame.
    fn start(&mut self, unit: &PlaybackUnit) -> Result<()>;

    fn stop(&mut self, id: UnitId);

    fn stop_all(&mut self);

    /// Units that played to their end since the last call.
    fn drain_finished(&mut self) -> Vec<UnitId>;
}

pub struct AudioPlaybackScheduler {
    output: Box<dyn PlaybackOutput>,
    inbound_rate: u32,
    next_start: u64,
    next_id: UnitId,
    active: BTreeMap<UnitId, UnitSpan>,
    tokens: CancellationRegistry,
}

impl AudioPlaybackScheduler {
    /// `inbound_rate` applies to PCM payloads whose MIME type names no rate.
    pub fn new(output: Box<dyn PlaybackOutput>, inbound_rate: u32) -> Self {
        let next_start = output.current_frame();
        info!("Playback scheduler on {}Hz output", output.sample_rate());
        Self {
            output,
            inbound_rate,
            next_start,
            next_id: 0,
            active: BTreeMap::new(),
            tokens: CancellationRegistry::new(),
        }
    }

    pub fn set_inbound_rate(&mut self, rate: u32) {
        self.inbound_rate = rate;
    }

    pub fn now(&self) -> u64 {
        self.output.current_frame()
    }

    pub fn output_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Scheduled or sounding units, in playback order.
    pub fn active_units(&self) -> Vec<UnitSpan> {
        let mut spans: Vec<UnitSpan> = self.active.values().copied().collect();
        spans.sort_by_key(|span| span.start_frame);
        spans
    }

    pub fn enqueue_payload(&mut self, payload: &InlineAudio) -> Result<UnitSpan> {
        let decoded = decode_payload(payload, self.inbound_rate)?;
        self.enqueue(decoded)
    }

    pub fn enqueue(&mut self, audio: DecodedAudio) -> Result<UnitSpan> {
        if audio.is_empty() {
            return Err(VoiceError::decode("empty audio payload"));
        }
        let rate = self.output.sample_rate();
        let samples = if audio.sample_rate == rate {
            audio.samples
        } else {
            resample(&audio.samples, audio.sample_rate, rate)?
        };

        let id = self.next_id;
        self.next_id += 1;

        let start_frame = self.next_start.max(self.output.current_frame());
        let unit = PlaybackUnit {
            id,
            start_frame,
            samples: samples.into(),
            cancel: self.tokens.issue(id),
        };

        if let Err(e) = self.output.start(&unit) {
            self.tokens.release(id);
            return Err(e);
        }

        let span = UnitSpan { id, start_frame, end_frame: unit.end_frame() };
        self.next_start = span.end_frame;
        self.active.insert(id, span);
        debug!("Unit {} scheduled at frame {} for {} frames", id, start_frame, unit.frames());
        Ok(span)
    }

    /// Drop finished and individually cancelled units. Returns the finished ids.
    pub fn poll(&mut self) -> Vec<UnitId> {
        for id in self.tokens.take_cancelled() {
            self.output.stop(id);
            self.active.remove(&id);
            debug!("Unit {} cancelled", id);
        }

        let mut finished: Vec<UnitId> = self
            .output
            .drain_finished()
            .into_iter()
            .filter(|id| self.active.remove(id).is_some())
            .collect();

        // A completion lost by the output still ends at its end frame.
        let now = self.output.current_frame();
        let overdue: Vec<UnitId> =
            self.active.values().filter(|span| span.end_frame <= now).map(|span| span.id).collect();
        for id in overdue {
            self.active.remove(&id);
            finished.push(id);
        }

        for id in &finished {
            self.tokens.release(*id);
        }
        finished.sort_unstable();
        finished
    }

    pub fn cancel_unit(&mut self, id: UnitId) -> bool {
        if !self.tokens.cancel(id) {
            return false;
        }
        self.output.stop(id);
        self.active.remove(&id);
        true
    }

    /// Stop everything now and schedule later units from the current playhead.
    /// Returns how many units were cut.
    pub fn interrupt(&mut self) -> usize {
        let cut = self.active.len();
        self.clear_timeline();
        if cut > 0 {
            info!("Playback interrupted, {} unit(s) cut", cut);
        }
        cut
    }

    /// Session-end cleanup.
    pub fn reset(&mut self) {
        self.clear_timeline();
    }

    fn clear_timeline(&mut self) {
        self.tokens.cancel_all();
        self.output.stop_all();
        // Completions already in flight belong to the old timeline.
        self.output.drain_finished();
        self.active.clear();
        self.next_start = self.output.current_frame();
    }
}
