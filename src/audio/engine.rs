//! Microphone lifecycle: acquire, stream fixed-size encoded chunks, release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapRb};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::capture::{CaptureConstraints, InputStream, Microphone};
use super::codec::{select_encoding, AudioChunk, AudioEncoding};
use super::monitor::Analyser;
use super::processing::CapturePump;
use crate::config::CaptureConfig;
use crate::error::{Result, VoiceError};

struct Acquired {
    stream: Box<dyn InputStream>,
    // Handed to the pump on start.
    consumer: Option<HeapCons<f32>>,
}

struct RunningPump {
    cancel: CancellationToken,
    thread: JoinHandle<()>,
}

pub struct AudioCaptureEngine {
    microphone: Box<dyn Microphone>,
    analyser: Analyser,
    user_speaking: Arc<AtomicBool>,
    acquired: Option<Acquired>,
    pump: Option<RunningPump>,
    encoding: Option<AudioEncoding>,
}

impl AudioCaptureEngine {
    pub fn new(microphone: Box<dyn Microphone>, analyser: Analyser) -> Self {
        Self {
            microphone,
            analyser,
            user_speaking: Arc::new(AtomicBool::new(false)),
            acquired: None,
            pump: None,
            encoding: None,
        }
    }

    /// Request the input stream. This is where a denied permission surfaces.
    pub fn acquire(&mut self, config: &CaptureConfig) -> Result<()> {
        if self.acquired.is_some() || self.pump.is_some() {
            self.stop();
        }

        let constraints = CaptureConstraints::from(config);
        let device_rate = self.microphone.preferred_rate(&constraints);
        let ring = HeapRb::<f32>::new(config.ring_capacity(device_rate.max(config.sample_rate)));
        let (producer, consumer) = ring.split();

        let stream = self.microphone.request_stream(&constraints, producer)?;
        info!("Microphone acquired at {}Hz", stream.sample_rate());
        self.acquired = Some(Acquired { stream, consumer: Some(consumer) });
        Ok(())
    }

    /// Start producing chunks into `sink`, acquiring the microphone first if needed.
    pub fn start(
        &mut self,
        config: &CaptureConfig,
        supported: &[AudioEncoding],
        sink: mpsc::Sender<AudioChunk>,
    ) -> Result<AudioEncoding> {
        if self.pump.is_some() {
            return Err(VoiceError::InvalidState("capture already running".into()));
        }
        if self.acquired.is_none() {
            self.acquire(config)?;
        }

        let encoding = select_encoding(&config.encoding_preferences, supported).ok_or_else(|| {
            VoiceError::Configuration(format!(
                "none of {:?} is accepted by the session (supports {:?})",
                config.encoding_preferences, supported
            ))
        })?;

        let Some(acquired) = self.acquired.as_mut() else {
            return Err(VoiceError::InvalidState("microphone not acquired".into()));
        };
        let consumer = acquired
            .consumer
            .take()
            .ok_or_else(|| VoiceError::InvalidState("input stream already consumed".into()))?;
        let device_rate = acquired.stream.sample_rate();

        if let Err(e) = acquired.stream.play() {
            self.stop();
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let pump = CapturePump::new(
            consumer,
            sink,
            device_rate,
            config,
            encoding,
            self.analyser.clone(),
            self.user_speaking.clone(),
            cancel.clone(),
        );

        let thread = match std::thread::Builder::new()
            .name("capture-pump".into())
            .spawn(move || pump.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                self.stop();
                return Err(VoiceError::Device(format!("failed to spawn capture pump: {e}")));
            }
        };

        info!("Capture started with {:?}", encoding);
        self.pump = Some(RunningPump { cancel, thread });
        self.encoding = Some(encoding);
        Ok(encoding)
    }

    /// Stop the recorder, release the device, and discard buffered audio.
    /// Safe to call when not started.
    pub fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.cancel.cancel();
            if pump.thread.join().is_err() {
                warn!("Capture pump panicked");
            }
        }
        if let Some(mut acquired) = self.acquired.take() {
            acquired.stream.stop();
            info!("Microphone released");
        }
        self.encoding = None;
        self.user_speaking.store(false, Ordering::Relaxed);
        self.analyser.reset();
    }

    pub fn is_capturing(&self) -> bool {
        self.pump.as_ref().is_some_and(|p| !p.cancel.is_cancelled())
    }

    pub fn has_stream(&self) -> bool {
        self.acquired.is_some()
    }

    pub fn encoding(&self) -> Option<AudioEncoding> {
        self.encoding
    }

    pub fn user_speaking(&self) -> bool {
        self.user_speaking.load(Ordering::Relaxed)
    }
}

impl Drop for AudioCaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
