use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Observer};
use ringbuf::HeapCons;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

use super::codec::{encode, AudioChunk, AudioEncoding, StreamResampler};
use super::monitor::Analyser;
use crate::config::CaptureConfig;

const IDLE_SLEEP: Duration = Duration::from_millis(5);
const VAD_FRAME_MS: usize = 20;
const MIN_SPEECH_FRAMES: usize = 3; // 60ms to trigger start
const MIN_SILENCE_FRAMES: usize = 20; // 400ms to trigger end

/// Moves audio from the device ring into encoded, fixed-size chunks.
///
/// Runs on its own thread. Never blocks on the consumer side: a full chunk
/// channel drops the chunk.
pub struct CapturePump {
    consumer: HeapCons<f32>,
    sink: mpsc::Sender<AudioChunk>,
    device_rate: u32,
    target_rate: u32,
    chunk_frames: usize,
    encoding: AudioEncoding,
    voice_activity: bool,
    analyser: Analyser,
    user_speaking: Arc<AtomicBool>,
    cancel: CancellationToken,

    // State
    sequence: u64,
    pending: Vec<f32>,
    consecutive_speech: usize,
    consecutive_silence: usize,
}

impl CapturePump {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: HeapCons<f32>,
        sink: mpsc::Sender<AudioChunk>,
        device_rate: u32,
        config: &CaptureConfig,
        encoding: AudioEncoding,
        analyser: Analyser,
        user_speaking: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            sink,
            device_rate,
            target_rate: config.sample_rate,
            chunk_frames: config.chunk_frames().max(1),
            encoding,
            voice_activity: config.voice_activity,
            analyser,
            user_speaking,
            cancel,
            sequence: 0,
            pending: Vec::new(),
            consecutive_speech: 0,
            consecutive_silence: 0,
        }
    }

    pub fn run(mut self) {
        info!(
            "Capture pump started. Device {}Hz -> {}Hz, {} frames/chunk, {:?}",
            self.device_rate, self.target_rate, self.chunk_frames, self.encoding
        );

        let mut resampler = if self.device_rate != self.target_rate {
            match StreamResampler::new(self.device_rate, self.target_rate) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Capture resampler unavailable, stopping pump: {}", e);
                    return;
                }
            }
        } else {
            None
        };

        let mut vad = self.voice_activity.then(|| vad_for_rate(self.target_rate)).flatten();
        let mut framer = VadFramer::new(self.target_rate);
        if self.voice_activity && vad.is_none() {
            debug!("Unsupported VAD rate {}; voice activity disabled", self.target_rate);
        }

        let mut block: Vec<f32> = Vec::new();

        while !self.cancel.is_cancelled() {
            // 1. Read a device block. The resampler dictates its size.
            let need = resampler.as_ref().map_or(self.chunk_frames, |r| r.input_frames_next());
            if self.consumer.occupied_len() < need {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }
            block.resize(need, 0.0);
            let read = self.consumer.pop_slice(&mut block);
            block.truncate(read);

            // 2. Bring it to the target rate.
            match resampler.as_mut() {
                Some(r) => match r.process(&block) {
                    Ok(out) => self.pending.extend_from_slice(&out),
                    Err(e) => {
                        warn!("Capture resample failed, dropping block: {}", e);
                        continue;
                    }
                },
                None => self.pending.extend_from_slice(&block),
            }

            // 3. Emit every whole chunk.
            while self.pending.len() >= self.chunk_frames {
                let samples: Vec<f32> = self.pending.drain(..self.chunk_frames).collect();
                if let Some(vad) = vad.as_mut() {
                    self.detect_voice(vad, &mut framer, &samples);
                }
                self.analyser.record_input(&samples);
                self.forward(&samples);
            }
        }

        self.consumer.clear();
        self.user_speaking.store(false, Ordering::Relaxed);
        info!("Capture pump stopped after {} chunks", self.sequence);
    }

    fn forward(&mut self, samples: &[f32]) {
        let sequence = self.sequence;
        self.sequence += 1;

        let data = match encode(self.encoding, samples, self.target_rate) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping chunk {}: {}", sequence, e);
                return;
            }
        };

        let chunk = AudioChunk {
            sequence,
            encoding: self.encoding,
            sample_rate: self.target_rate,
            frames: samples.len(),
            data,
        };

        match self.sink.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Session not keeping up, dropped chunk {}", sequence),
            Err(TrySendError::Closed(_)) => {
                debug!("Chunk sink closed, stopping pump");
                self.cancel.cancel();
            }
        }
    }

    fn detect_voice(&mut self, vad: &mut Vad, framer: &mut VadFramer, samples: &[f32]) {
        framer.push(samples, |frame| {
            let is_speech_frame = vad.is_voice_segment(frame).unwrap_or(false);
            self.track_speech(is_speech_frame);
        });
    }

    fn track_speech(&mut self, is_speech_frame: bool) {
        if is_speech_frame {
            self.consecutive_silence = 0;
            self.consecutive_speech += 1;
        } else {
            self.consecutive_speech = 0;
            self.consecutive_silence += 1;
        }

        let speaking = self.user_speaking.load(Ordering::Relaxed);
        if !speaking && self.consecutive_speech >= MIN_SPEECH_FRAMES {
            debug!("Local speech START");
            self.user_speaking.store(true, Ordering::Relaxed);
        } else if speaking && self.consecutive_silence >= MIN_SILENCE_FRAMES {
            debug!("Local speech END");
            self.user_speaking.store(false, Ordering::Relaxed);
        }
    }
}

/// Cuts chunks of any length into whole VAD frames. The tail of a chunk
/// waits for the next one.
struct VadFramer {
    frame_size: usize,
    carry: Vec<i16>,
}

impl VadFramer {
    fn new(sample_rate: u32) -> Self {
        let frame_size = (sample_rate as usize * VAD_FRAME_MS / 1000).max(1);
        Self { frame_size, carry: Vec::with_capacity(frame_size) }
    }

    fn push(&mut self, samples: &[f32], mut on_frame: impl FnMut(&[i16])) {
        for &sample in samples {
            self.carry.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
            if self.carry.len() == self.frame_size {
                on_frame(&self.carry);
                self.carry.clear();
            }
        }
    }
}

fn vad_for_rate(rate: u32) -> Option<Vad> {
    let rate = match rate {
        8000 => SampleRate::Rate8kHz,
        16000 => SampleRate::Rate16kHz,
        32000 => SampleRate::Rate32kHz,
        48000 => SampleRate::Rate48kHz,
        _ => return None,
    };
    Some(Vad::new_with_rate_and_mode(rate, VadMode::Aggressive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_from(framer: &mut VadFramer, chunks: &[usize]) -> Vec<usize> {
        let mut sizes = Vec::new();
        for &len in chunks {
            framer.push(&vec![0.25; len], |frame| sizes.push(frame.len()));
        }
        sizes
    }

    #[test]
    fn short_chunks_still_fill_frames() {
        // 10 ms chunks at 16 kHz: a 320-sample frame every second chunk.
        let mut framer = VadFramer::new(16000);
        let sizes = frames_from(&mut framer, &[160; 6]);
        assert_eq!(sizes, vec![320; 3]);
        assert!(framer.carry.is_empty());
    }

    #[test]
    fn uneven_chunks_lose_no_samples() {
        // 30 ms chunks: the 10 ms tail of each one carries into the next.
        let mut framer = VadFramer::new(16000);
        let sizes = frames_from(&mut framer, &[480; 4]);
        assert_eq!(sizes.len(), 6);
        assert!(framer.carry.is_empty());

        let sizes = frames_from(&mut framer, &[100]);
        assert!(sizes.is_empty());
        assert_eq!(framer.carry.len(), 100);
    }

    #[test]
    fn frames_hold_pcm16_samples() {
        let mut framer = VadFramer::new(8000);
        let mut first = Vec::new();
        framer.push(&[1.0; 160], |frame| first = frame.to_vec());
        assert_eq!(first.len(), 160);
        assert!(first.iter().all(|&s| s == i16::MAX));
    }
}
