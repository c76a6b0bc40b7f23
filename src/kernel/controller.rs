//! Session lifecycle and inbound demultiplexing.
//!
//! One task owns the controller and feeds it events one at a time, so none of
//! the state below needs a lock. Device callbacks never reach in here; they
//! talk to the capture pump and the output mixer through lock-free rings.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::event::{ControllerEvent, InboundPart, ServerMessage, TransportEvent};
use super::state::{SessionState, SessionView};
use super::telemetry::{TelemetryEvent, TelemetryRecorder};
use super::tools::ToolCallDispatcher;
use super::transcript::{TranscriptAssembler, TranscriptEntry};
use crate::audio::capture::Microphone;
use crate::audio::codec::{AudioChunk, InlineAudio};
use crate::audio::engine::AudioCaptureEngine;
use crate::audio::monitor::Analyser;
use crate::audio::playback::{AudioPlaybackScheduler, PlaybackOutput};
use crate::config::SessionConfig;
use crate::error::{Result, VoiceError};
use crate::transport::{SessionHandle, SessionSetup, Transport};

/// Resources held while a session is open. Dropped as one unit on teardown.
struct LiveSession {
    handle: Box<dyn SessionHandle>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    chunks: Option<mpsc::Receiver<AudioChunk>>,
    ticker: Interval,
    last_sequence: Option<u64>,
}

pub struct SessionController {
    transport: Arc<dyn Transport>,
    capture: AudioCaptureEngine,
    playback: AudioPlaybackScheduler,
    transcript: TranscriptAssembler,
    tools: ToolCallDispatcher,
    telemetry: TelemetryRecorder,
    analyser: Analyser,
    config: SessionConfig,
    session: Option<LiveSession>,
    view: watch::Sender<SessionView>,
}

impl SessionController {
    /// `analyser` should be the same handle the output was built with, so
    /// both levels show up on it.
    pub fn new(
        transport: Arc<dyn Transport>,
        microphone: Box<dyn Microphone>,
        output: Box<dyn PlaybackOutput>,
        analyser: Analyser,
    ) -> Self {
        let config = SessionConfig::default();
        let (view, _) = watch::channel(SessionView::default());
        Self {
            transport,
            capture: AudioCaptureEngine::new(microphone, analyser.clone()),
            playback: AudioPlaybackScheduler::new(output, config.playback.inbound_sample_rate),
            transcript: TranscriptAssembler::new(),
            tools: ToolCallDispatcher::new(),
            telemetry: TelemetryRecorder::new(),
            analyser,
            config,
            session: None,
            view,
        }
    }

    /// Register before `connect()` so the tool is declared to the remote side.
    pub fn register_tool<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.tools.register_handler(name, handler);
    }

    pub fn state(&self) -> SessionState {
        self.view.borrow().state
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn transcripts(&self) -> Vec<TranscriptEntry> {
        self.view.borrow().transcripts.clone()
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    pub fn playback(&self) -> &AudioPlaybackScheduler {
        &self.playback
    }

    pub fn transcript(&self) -> &TranscriptAssembler {
        &self.transcript
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Open a session. Anything already live is torn down first.
    ///
    /// A denied microphone fails here, before the remote side is contacted.
    pub async fn connect(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;

        if self.session.is_some() || self.state() != SessionState::Idle {
            self.teardown().await;
            self.set_state(SessionState::Idle, None);
        }

        self.config = config;
        self.playback.set_inbound_rate(self.config.playback.inbound_sample_rate);
        self.set_state(SessionState::Connecting, None);

        if let Err(e) = self.capture.acquire(&self.config.capture) {
            self.fail(&e).await;
            return Err(e);
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        let mut tools: Vec<String> = self.tools.names().map(str::to_string).collect();
        tools.sort_unstable();
        let setup = SessionSetup { config: self.config.clone(), tools };

        let handle = match self.transport.open_session(&setup, events_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                self.fail(&e).await;
                return Err(e);
            }
        };

        let mut ticker = interval(Duration::from_millis(self.config.playback.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.session = Some(LiveSession { handle, events, chunks: None, ticker, last_sequence: None });
        self.set_state(SessionState::Connected, None);

        let (chunk_tx, chunks) = mpsc::channel(self.config.capture.channel_capacity);
        let supported = self.transport.supported_encodings();
        if let Err(e) = self.capture.start(&self.config.capture, &supported, chunk_tx) {
            self.fail(&e).await;
            return Err(e);
        }
        if let Some(session) = self.session.as_mut() {
            session.chunks = Some(chunks);
        }

        info!("Session connected ({})", self.config.model);
        self.refresh_activity();
        Ok(())
    }

    /// Total cancellation. Safe from any state, any number of times.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.set_state(SessionState::Idle, None);
        info!("Session disconnected");
    }

    /// Release every session resource. The single cleanup path for
    /// disconnect, failure and remote close.
    async fn teardown(&mut self) {
        self.capture.stop();
        self.playback.reset();
        self.transcript.reset();
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.handle.close().await {
                warn!("Closing session handle failed: {}", e);
            }
        }
        self.view.send_if_modified(|view| {
            let changed = view.is_listening || view.is_speaking || view.user_speaking;
            view.is_listening = false;
            view.is_speaking = false;
            view.user_speaking = false;
            changed
        });
    }

    async fn fail(&mut self, e: &VoiceError) {
        error!("Session failed: {}", e);
        self.teardown().await;
        self.set_state(SessionState::Error, Some(e.to_string()));
    }

    fn set_state(&mut self, to: SessionState, error: Option<String>) {
        let from = self.state();
        if from.transition(to).is_none() {
            warn!("Rejected session transition {:?} -> {:?}", from, to);
            return;
        }
        if from != to {
            debug!("Session {:?} -> {:?}", from, to);
            self.telemetry.record(TelemetryEvent::StateTransition { from, to });
        }
        self.view.send_if_modified(|view| {
            let error = if to == SessionState::Error { error } else { None };
            let changed = view.state != to || view.error != error;
            view.state = to;
            view.error = error;
            changed
        });
    }

    /// Wait for the next thing to react to. `None` once no session is open.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        let session = self.session.as_mut()?;
        let chunks = session.chunks.as_mut();
        tokio::select! {
            biased;
            event = session.events.recv() => {
                Some(ControllerEvent::Transport(event.unwrap_or(TransportEvent::Closed)))
            }
            Some(chunk) = recv_chunk(chunks) => Some(ControllerEvent::Captured(chunk)),
            _ = session.ticker.tick() => Some(ControllerEvent::PlaybackTick),
        }
    }

    /// Drive the session until it ends (disconnect, failure or remote close).
    pub async fn run(&mut self) {
        info!("Controller loop started. Tick: {}ms", self.config.playback.tick_ms);
        while let Some(event) = self.next_event().await {
            self.handle_event(event).await;
        }
        info!("Controller loop finished in {:?}", self.state());
    }

    pub async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Transport(TransportEvent::Message(message)) => self.handle_message(message).await,
            ControllerEvent::Transport(TransportEvent::Error(message)) => {
                self.fail(&VoiceError::transport(message)).await;
            }
            ControllerEvent::Transport(TransportEvent::Closed) => {
                if self.session.is_some() {
                    info!("Remote closed the session");
                    self.teardown().await;
                    self.set_state(SessionState::Idle, None);
                }
            }
            ControllerEvent::Captured(chunk) => self.forward_chunk(chunk).await,
            ControllerEvent::PlaybackTick => self.on_tick(),
        }
    }

    /// Inbound demultiplexing. Parts are handled in a fixed order; see
    /// `ServerMessage::into_parts`.
    pub async fn handle_message(&mut self, message: ServerMessage) {
        if self.state() != SessionState::Connected {
            debug!("Ignoring message while {:?}", self.state());
            return;
        }

        for _ in 0..message.undecodable_audio {
            self.telemetry.record(TelemetryEvent::DecodeFailure);
        }
        for part in message.into_parts() {
            match part {
                InboundPart::ToolCalls(requests) => {
                    let unknown = requests.iter().filter(|r| !self.tools.has_handler(&r.name)).count();
                    let responses = self.tools.dispatch(&requests);
                    self.telemetry.record(TelemetryEvent::ToolBatch { requests: requests.len(), unknown });

                    let sent = match self.session.as_mut() {
                        Some(session) => session.handle.send_tool_response(responses).await,
                        None => return,
                    };
                    if let Err(e) = sent {
                        self.fail(&e).await;
                        return;
                    }
                }
                InboundPart::UserText(text) => self.transcript.append_user(&text),
                InboundPart::ModelText(text) => self.transcript.append_model(&text),
                InboundPart::TurnComplete => {
                    let entries = self.transcript.flush_turn();
                    self.telemetry.record(TelemetryEvent::TurnFlushed { entries: entries.len() });
                    if !entries.is_empty() {
                        self.view.send_modify(|view| view.transcripts.extend(entries));
                    }
                }
                InboundPart::Audio(payload) => self.schedule_audio(&payload),
                InboundPart::Interrupted => {
                    let units_cut = self.playback.interrupt();
                    self.transcript.discard_model_buffer();
                    self.telemetry.record(TelemetryEvent::Interruption { units_cut });
                }
            }
        }

        self.refresh_activity();
    }

    fn schedule_audio(&mut self, payload: &InlineAudio) {
        match self.playback.enqueue_payload(payload) {
            Ok(span) => self.telemetry.record(TelemetryEvent::UnitScheduled {
                unit_id: span.id,
                start_frame: span.start_frame,
                frames: span.end_frame - span.start_frame,
            }),
            Err(e) => {
                warn!("Dropping inbound audio ({}): {}", payload.mime_type, e);
                self.telemetry.record(TelemetryEvent::DecodeFailure);
            }
        }
    }

    async fn forward_chunk(&mut self, chunk: AudioChunk) {
        if self.state() != SessionState::Connected {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        // Gaps in the sequence are chunks the pump dropped on a full channel.
        let expected = session.last_sequence.map_or(0, |last| last + 1);
        for sequence in expected..chunk.sequence {
            self.telemetry.record(TelemetryEvent::ChunkDropped { sequence });
        }
        session.last_sequence = Some(chunk.sequence);

        let sequence = chunk.sequence;
        let bytes = chunk.data.len();
        match session.handle.send_audio(chunk).await {
            Ok(()) => self.telemetry.record(TelemetryEvent::ChunkForwarded { sequence, bytes }),
            Err(e) => {
                warn!("Dropping chunk {}: {}", sequence, e);
                self.telemetry.record(TelemetryEvent::ChunkDropped { sequence });
            }
        }
    }

    fn on_tick(&mut self) {
        for unit_id in self.playback.poll() {
            self.telemetry.record(TelemetryEvent::UnitFinished { unit_id });
        }
        self.refresh_activity();
    }

    fn refresh_activity(&mut self) {
        let is_listening = self.capture.is_capturing();
        let is_speaking = self.playback.is_speaking();
        let user_speaking = self.capture.user_speaking();
        self.view.send_if_modified(|view| {
            let changed = view.is_listening != is_listening
                || view.is_speaking != is_speaking
                || view.user_speaking != user_speaking;
            view.is_listening = is_listening;
            view.is_speaking = is_speaking;
            view.user_speaking = user_speaking;
            changed
        });
    }
}

async fn recv_chunk(chunks: Option<&mut mpsc::Receiver<AudioChunk>>) -> Option<AudioChunk> {
    match chunks {
        Some(chunks) => chunks.recv().await,
        None => std::future::pending().await,
    }
}
