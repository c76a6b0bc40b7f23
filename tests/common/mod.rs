#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ringbuf::traits::Producer;
use ringbuf::HeapProd;
use tokio::sync::mpsc;

use duplex::audio::codec::{AudioChunk, AudioEncoding};
use duplex::audio::{Analyser, CaptureConstraints, InputStream, Microphone, VirtualOutput};
use duplex::kernel::event::{ServerMessage, TransportEvent};
use duplex::kernel::time::FrameClock;
use duplex::kernel::tools::ToolCallResponse;
use duplex::transport::{SessionHandle, SessionSetup, Transport};
use duplex::{Result, SessionController, VoiceError};

/// Everything the mock transport saw, plus knobs for failure injection.
#[derive(Default)]
pub struct MockState {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    pub setups: Vec<SessionSetup>,
    pub audio: Vec<AudioChunk>,
    pub tool_responses: Vec<Vec<ToolCallResponse>>,
    pub opens: usize,
    pub closes: usize,
    pub fail_open: Option<String>,
    pub fail_audio: bool,
    pub fail_tool_response: bool,
    pub supported: Option<Vec<AudioEncoding>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    fn emit(&self, event: TransportEvent) {
        let sender = self.state().events.clone().expect("no open session");
        sender.send(event).expect("controller dropped the event channel");
    }

    pub fn deliver(&self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message));
    }

    pub fn fail(&self, message: &str) {
        self.emit(TransportEvent::Error(message.to_string()));
    }

    pub fn close_remote(&self) {
        self.emit(TransportEvent::Closed);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn supported_encodings(&self) -> Vec<AudioEncoding> {
        self.state().supported.clone().unwrap_or_else(|| AudioEncoding::ALL.to_vec())
    }

    async fn open_session(
        &self,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn SessionHandle>> {
        let mut state = self.state();
        if let Some(message) = &state.fail_open {
            return Err(VoiceError::transport(message.clone()));
        }
        state.opens += 1;
        state.setups.push(setup.clone());
        state.events = Some(events);
        Ok(Box::new(MockSession { inner: self.inner.clone() }))
    }
}

struct MockSession {
    inner: Arc<Mutex<MockState>>,
}

#[async_trait]
impl SessionHandle for MockSession {
    async fn send_audio(&mut self, chunk: AudioChunk) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_audio {
            return Err(VoiceError::transport("session not ready"));
        }
        state.audio.push(chunk);
        Ok(())
    }

    async fn send_tool_response(&mut self, responses: Vec<ToolCallResponse>) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_tool_response {
            return Err(VoiceError::transport("socket closed"));
        }
        state.tool_responses.push(responses);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state.closes += 1;
        state.events = None;
        Ok(())
    }
}

/// Microphone that hands out a fixed recording, all at once.
pub struct ScriptedMicrophone {
    samples: Vec<f32>,
    rate: u32,
    pub requests: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    pub fn new(samples: Vec<f32>, rate: u32) -> Self {
        Self { samples, rate, requests: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn silent() -> Self {
        Self::new(Vec::new(), 16000)
    }
}

impl Microphone for ScriptedMicrophone {
    fn request_stream(
        &mut self,
        _constraints: &CaptureConstraints,
        mut producer: HeapProd<f32>,
    ) -> Result<Box<dyn InputStream>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        producer.push_slice(&self.samples);
        Ok(Box::new(ScriptedStream { rate: self.rate, _producer: producer, playing: false }))
    }
}

struct ScriptedStream {
    rate: u32,
    _producer: HeapProd<f32>,
    playing: bool,
}

impl InputStream for ScriptedStream {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
    }
}

pub struct DeniedMicrophone;

impl Microphone for DeniedMicrophone {
    fn request_stream(
        &mut self,
        _constraints: &CaptureConstraints,
        _producer: HeapProd<f32>,
    ) -> Result<Box<dyn InputStream>> {
        Err(VoiceError::Permission("denied by user".into()))
    }
}

/// A sine tone at `amplitude`, `frames` long.
pub fn tone(frames: usize, rate: u32, amplitude: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / rate as f32).sin())
        .collect()
}

pub fn pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

/// Controller on a mock transport and a manual 24 kHz output clock.
pub fn controller_with(microphone: Box<dyn Microphone>) -> (SessionController, MockTransport, FrameClock) {
    let transport = MockTransport::new();
    let output = VirtualOutput::manual(24000);
    let clock = output.clock();
    let controller = SessionController::new(
        Arc::new(transport.clone()),
        microphone,
        Box::new(output),
        Analyser::new(),
    );
    (controller, transport, clock)
}

/// Feed controller events until `done` holds, or panic after a few seconds.
pub async fn drive_until<F>(controller: &mut SessionController, done: F)
where
    F: Fn(&SessionController) -> bool,
{
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&*controller) {
            match controller.next_event().await {
                Some(event) => controller.handle_event(event).await,
                None => break,
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "controller did not reach the expected condition in time");
    assert!(done(&*controller), "session ended before the expected condition");
}
