// Microphone capture: chunking, encoding negotiation, release.

mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use duplex::audio::codec::{decode_encoded, AudioEncoding};
use duplex::audio::{Analyser, AudioCaptureEngine};
use duplex::config::CaptureConfig;
use duplex::{SessionConfig, SessionState, VoiceError};

use common::{controller_with, drive_until, tone, DeniedMicrophone, ScriptedMicrophone};

#[tokio::test]
async fn test_engine_emits_fixed_size_chunks() {
    let config = CaptureConfig::default();
    let microphone = ScriptedMicrophone::new(tone(4800, 16000, 0.3), 16000);
    let mut engine = AudioCaptureEngine::new(Box::new(microphone), Analyser::new());
    let (tx, mut rx) = mpsc::channel(8);

    let encoding = engine.start(&config, &AudioEncoding::ALL, tx).unwrap();
    assert_eq!(encoding, AudioEncoding::Pcm16);
    assert!(engine.is_capturing());

    // 100 ms at 16 kHz is 1600 frames, 3200 bytes of PCM16.
    for expected in 0..3u64 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("chunk not produced in time")
            .expect("pump closed the channel");
        assert_eq!(chunk.sequence, expected);
        assert_eq!(chunk.frames, 1600);
        assert_eq!(chunk.data.len(), 3200);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
    }

    engine.stop();
    assert!(!engine.is_capturing());
    assert!(!engine.has_stream());
}

#[tokio::test]
async fn test_engine_negotiates_mulaw() {
    let config = CaptureConfig::default();
    let samples = tone(1600, 16000, 0.3);
    let microphone = ScriptedMicrophone::new(samples.clone(), 16000);
    let mut engine = AudioCaptureEngine::new(Box::new(microphone), Analyser::new());
    let (tx, mut rx) = mpsc::channel(8);

    let encoding = engine.start(&config, &[AudioEncoding::MuLaw], tx).unwrap();
    assert_eq!(encoding, AudioEncoding::MuLaw);

    let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(chunk.data.len(), 1600, "one byte per µ-law sample");

    let decoded = decode_encoded(AudioEncoding::MuLaw, &chunk.data, 16000).unwrap();
    let max_error = decoded
        .samples
        .iter()
        .zip(&samples)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(max_error < 0.02, "µ-law error {max_error}");
}

#[tokio::test]
async fn test_engine_rejects_unsupported_encodings() {
    let config = CaptureConfig { encoding_preferences: vec![AudioEncoding::Wav], ..CaptureConfig::default() };
    let mut engine = AudioCaptureEngine::new(Box::new(ScriptedMicrophone::silent()), Analyser::new());
    let (tx, _rx) = mpsc::channel(8);

    let result = engine.start(&config, &[AudioEncoding::MuLaw], tx);
    assert!(matches!(result, Err(VoiceError::Configuration(_))));
    assert!(!engine.is_capturing());
}

#[tokio::test]
async fn test_engine_surfaces_denied_permission() {
    let mut engine = AudioCaptureEngine::new(Box::new(DeniedMicrophone), Analyser::new());
    let result = engine.acquire(&CaptureConfig::default());
    assert!(matches!(result, Err(VoiceError::Permission(_))));
    assert!(!engine.has_stream());
}

#[tokio::test]
async fn test_stop_is_safe_when_never_started() {
    let mut engine = AudioCaptureEngine::new(Box::new(ScriptedMicrophone::silent()), Analyser::new());
    engine.stop();
    engine.stop();
    assert!(!engine.is_capturing());
    assert_eq!(engine.encoding(), None);
}

#[tokio::test]
async fn test_engine_cannot_start_twice() {
    let mut engine = AudioCaptureEngine::new(Box::new(ScriptedMicrophone::silent()), Analyser::new());
    let config = CaptureConfig::default();
    let (tx, _rx) = mpsc::channel(8);
    engine.start(&config, &AudioEncoding::ALL, tx.clone()).unwrap();

    let again = engine.start(&config, &AudioEncoding::ALL, tx);
    assert!(matches!(again, Err(VoiceError::InvalidState(_))));
}

#[tokio::test]
async fn test_controller_forwards_captured_chunks() {
    let microphone = ScriptedMicrophone::new(tone(4800, 16000, 0.3), 16000);
    let (mut controller, transport, _clock) = controller_with(Box::new(microphone));
    controller.connect(SessionConfig::default()).await.unwrap();

    drive_until(&mut controller, |_| transport.state().audio.len() == 3).await;

    let sequences: Vec<u64> = transport.state().audio.iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    let snapshot = controller.telemetry().snapshot();
    assert_eq!(snapshot.capture_stats.chunks_forwarded, 3);
    assert_eq!(snapshot.capture_stats.bytes_forwarded, 9600);
    assert!(controller.analyser().input_level() > 0.0);
}

#[tokio::test]
async fn test_controller_uses_transport_encoding() {
    let microphone = ScriptedMicrophone::new(tone(1600, 16000, 0.3), 16000);
    let (mut controller, transport, _clock) = controller_with(Box::new(microphone));
    transport.state().supported = Some(vec![AudioEncoding::MuLaw]);
    controller.connect(SessionConfig::default()).await.unwrap();

    drive_until(&mut controller, |_| !transport.state().audio.is_empty()).await;
    assert_eq!(transport.state().audio[0].encoding, AudioEncoding::MuLaw);
}

#[tokio::test]
async fn test_audio_send_failure_drops_chunk_only() {
    let microphone = ScriptedMicrophone::new(tone(3200, 16000, 0.3), 16000);
    let (mut controller, transport, _clock) = controller_with(Box::new(microphone));
    transport.state().fail_audio = true;
    controller.connect(SessionConfig::default()).await.unwrap();

    drive_until(&mut controller, |c| c.telemetry().snapshot().capture_stats.chunks_dropped == 2).await;

    assert_eq!(controller.state(), SessionState::Connected);
    assert!(transport.state().audio.is_empty());
}

#[tokio::test]
async fn test_no_encoding_in_common_fails_connect() {
    let (mut controller, transport, _clock) = controller_with(Box::new(ScriptedMicrophone::silent()));
    transport.state().supported = Some(Vec::new());

    let result = controller.connect(SessionConfig::default()).await;

    assert!(matches!(result, Err(VoiceError::Configuration(_))));
    assert_eq!(controller.state(), SessionState::Error);
    assert!(!controller.has_session());
    assert_eq!(transport.state().closes, 1);
}
