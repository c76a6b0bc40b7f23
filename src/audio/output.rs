//! Playback outputs: the cpal speaker and a device-free virtual sink.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::monitor::Analyser;
use super::playback::{PlaybackOutput, PlaybackUnit, UnitId};
use crate::error::{Result, VoiceError};
use crate::kernel::time::{frames_for, FrameClock};

const COMMAND_CAPACITY: usize = 256;
const FINISHED_CAPACITY: usize = 256;

/// In-memory output. Nothing is rendered; units "finish" when the clock
/// passes their end frame.
pub struct VirtualOutput {
    sample_rate: u32,
    clock: FrameClock,
    origin: Option<Instant>,
    queued: Vec<(UnitId, u64, CancellationToken)>,
}

impl VirtualOutput {
    /// Clock only moves when the owner advances it.
    pub fn manual(sample_rate: u32) -> Self {
        Self { sample_rate, clock: FrameClock::new(), origin: None, queued: Vec::new() }
    }

    /// Clock follows wall time from construction.
    pub fn realtime(sample_rate: u32) -> Self {
        Self { origin: Some(Instant::now()), ..Self::manual(sample_rate) }
    }

    /// Handle for driving a manual clock.
    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }
}

impl PlaybackOutput for VirtualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_frame(&self) -> u64 {
        match self.origin {
            Some(origin) => frames_for(origin.elapsed(), self.sample_rate),
            None => self.clock.now(),
        }
    }

    fn start(&mut self, unit: &PlaybackUnit) -> Result<()> {
        self.queued.push((unit.id, unit.end_frame(), unit.cancel.clone()));
        Ok(())
    }

    fn stop(&mut self, id: UnitId) {
        self.queued.retain(|(queued, _, _)| *queued != id);
    }

    fn stop_all(&mut self) {
        self.queued.clear();
    }

    fn drain_finished(&mut self) -> Vec<UnitId> {
        let now = self.current_frame();
        let mut finished = Vec::new();
        self.queued.retain(|(id, end, cancel)| {
            if cancel.is_cancelled() {
                return false;
            }
            if *end <= now {
                finished.push(*id);
                return false;
            }
            true
        });
        finished
    }
}

enum OutputCommand {
    Play(Voice),
    Stop(UnitId),
    StopAll,
}

struct Voice {
    id: UnitId,
    start: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Callback-side state. Lives inside the cpal stream closure.
struct Mixer {
    commands: HeapCons<OutputCommand>,
    finished: HeapProd<UnitId>,
    clock: FrameClock,
    voices: VecDeque<Voice>,
    channels: usize,
    analyser: Analyser,
    scratch: Vec<f32>,
}

impl Mixer {
    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                OutputCommand::Play(voice) => {
                    // Units arrive in start order; keep the queue sorted anyway.
                    let at = self.voices.partition_point(|v| v.start <= voice.start);
                    self.voices.insert(at, voice);
                }
                OutputCommand::Stop(id) => self.voices.retain(|v| v.id != id),
                OutputCommand::StopAll => self.voices.clear(),
            }
        }
    }

    /// Render `frames` mono samples into `scratch` and advance the playhead.
    fn render(&mut self, frames: usize) {
        self.apply_commands();
        self.scratch.clear();
        self.scratch.resize(frames, 0.0);

        let base = self.clock.now();
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let position = base + i as u64;
            while self.voices.front().is_some_and(|v| v.end() <= position) {
                if let Some(done) = self.voices.pop_front() {
                    let _ = self.finished.try_push(done.id);
                }
            }
            if let Some(voice) = self.voices.front() {
                if voice.start <= position {
                    *slot = voice.samples[(position - voice.start) as usize];
                }
            }
        }

        let end = self.clock.advance(frames as u64);
        while self.voices.front().is_some_and(|v| v.end() <= end) {
            if let Some(done) = self.voices.pop_front() {
                let _ = self.finished.try_push(done.id);
            }
        }
        self.analyser.record_output(&self.scratch);
    }

    fn write_f32(&mut self, data: &mut [f32]) {
        let frames = data.len() / self.channels;
        self.render(frames);
        for (frame, &sample) in data.chunks_mut(self.channels).zip(&self.scratch) {
            frame.fill(sample);
        }
    }

    fn write_i16(&mut self, data: &mut [i16]) {
        let frames = data.len() / self.channels;
        self.render(frames);
        for (frame, &sample) in data.chunks_mut(self.channels).zip(&self.scratch) {
            frame.fill((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
    }
}

/// Default-device speaker backed by cpal. The device callback owns the mix;
/// this side only sends commands and collects completions.
pub struct SpeakerOutput {
    _stream: cpal::Stream,
    commands: HeapProd<OutputCommand>,
    finished: HeapCons<UnitId>,
    clock: FrameClock,
    sample_rate: u32,
}

impl SpeakerOutput {
    pub fn open(analyser: Analyser) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::Device("No output device available".into()))?;
        info!("Audio Output Device: {}", device.name().unwrap_or_default());

        let config = device
            .default_output_config()
            .map_err(|e| VoiceError::Device(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels().max(1) as usize;
        info!("Output Config Selected: Rate={}Hz, Channels={}", sample_rate, channels);

        let (commands, command_rx) = HeapRb::<OutputCommand>::new(COMMAND_CAPACITY).split();
        let (finished_tx, finished) = HeapRb::<UnitId>::new(FINISHED_CAPACITY).split();
        let clock = FrameClock::new();

        let mut mixer = Mixer {
            commands: command_rx,
            finished: finished_tx,
            clock: clock.clone(),
            voices: VecDeque::new(),
            channels,
            analyser,
            scratch: Vec::with_capacity(4096),
        };

        let err_fn = |err| error!("an error occurred on output stream: {}", err);
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &_| mixer.write_f32(data),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config.into(),
                move |data: &mut [i16], _: &_| mixer.write_i16(data),
                err_fn,
                None,
            ),
            other => {
                return Err(VoiceError::Device(format!("Unsupported sample format {other:?}")));
            }
        }
        .map_err(|e| VoiceError::Device(e.to_string()))?;

        stream.play().map_err(|e| VoiceError::Device(e.to_string()))?;

        Ok(Self { _stream: stream, commands, finished, clock, sample_rate })
    }

    fn send(&mut self, command: OutputCommand) -> Result<()> {
        self.commands
            .try_push(command)
            .map_err(|_| VoiceError::Device("output command queue full".into()))
    }
}

impl PlaybackOutput for SpeakerOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_frame(&self) -> u64 {
        self.clock.now()
    }

    fn start(&mut self, unit: &PlaybackUnit) -> Result<()> {
        self.send(OutputCommand::Play(Voice {
            id: unit.id,
            start: unit.start_frame,
            samples: unit.samples.clone(),
        }))
    }

    fn stop(&mut self, id: UnitId) {
        if self.send(OutputCommand::Stop(id)).is_err() {
            warn!("Could not stop unit {}: command queue full", id);
        }
    }

    fn stop_all(&mut self) {
        if self.send(OutputCommand::StopAll).is_err() {
            warn!("Could not stop playback: command queue full");
        }
    }

    fn drain_finished(&mut self) -> Vec<UnitId> {
        let finished: Vec<UnitId> = self.finished.pop_iter().collect();
        if !finished.is_empty() {
            debug!("Units finished: {:?}", finished);
        }
        finished
    }
}
