//! Newline-delimited JSON frames in the Live API shape.
//!
//! Outbound: `setup`, `realtimeInput`, `toolResponse`.
//! Inbound: `setupComplete`, `toolCall`, `serverContent`, `goAway`.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::audio::codec::{AudioChunk, InlineAudio};
use crate::error::Result;
use crate::kernel::event::ServerMessage;
use crate::kernel::tools::{ToolCallRequest, ToolCallResponse};
use crate::transport::SessionSetup;

pub fn encode_setup(setup: &SessionSetup) -> Result<String> {
    let config = &setup.config;
    let mut body = json!({
        "model": config.model,
        "generationConfig": { "responseModalities": ["AUDIO"] },
        "inputAudioTranscription": {},
        "outputAudioTranscription": {},
    });
    if let Some(voice) = &config.voice {
        body["generationConfig"]["speechConfig"] =
            json!({ "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } } });
    }
    if let Some(instruction) = &config.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }
    if !setup.tools.is_empty() {
        let declarations: Vec<Value> = setup.tools.iter().map(|name| json!({ "name": name })).collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    Ok(serde_json::to_string(&json!({ "setup": body }))?)
}

pub fn encode_audio(chunk: &AudioChunk) -> Result<String> {
    let frame = json!({
        "realtimeInput": {
            "audio": { "mimeType": chunk.mime_type(), "data": chunk.to_base64() }
        }
    });
    Ok(serde_json::to_string(&frame)?)
}

pub fn encode_tool_response(responses: &[ToolCallResponse]) -> Result<String> {
    let function_responses: Vec<Value> = responses
        .iter()
        .map(|r| json!({ "id": r.id, "name": r.name, "response": r.result }))
        .collect();
    let frame = json!({ "toolResponse": { "functionResponses": function_responses } });
    Ok(serde_json::to_string(&frame)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    setup_complete: Option<Value>,
    tool_call: Option<ToolCallFrame>,
    server_content: Option<ServerContent>,
    go_away: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    // Parsed one by one so a malformed call does not sink its batch.
    #[serde(default)]
    function_calls: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

/// Parse one inbound line. Frames with nothing for the controller
/// (`setupComplete`, `goAway`, empty content) come back as `None`.
///
/// Only a line that is not a JSON frame at all is an error. A bad audio part
/// or tool call is skipped and the rest of the frame is kept.
pub fn decode_frame(line: &str) -> Result<Option<ServerMessage>> {
    let frame: InboundFrame = serde_json::from_str(line)?;

    if frame.setup_complete.is_some() {
        debug!("Session setup complete");
    }
    if let Some(go_away) = &frame.go_away {
        debug!("Server going away: {}", go_away);
    }

    let mut message = ServerMessage::default();
    if let Some(tool_call) = frame.tool_call {
        for call in tool_call.function_calls {
            match serde_json::from_value::<ToolCallRequest>(call) {
                Ok(request) => message.tool_calls.push(request),
                Err(e) => warn!("Skipping malformed function call: {}", e),
            }
        }
    }
    if let Some(content) = frame.server_content {
        message.input_transcription = content.input_transcription.map(|t| t.text);
        message.output_transcription = content.output_transcription.map(|t| t.text);
        message.turn_complete = content.turn_complete;
        message.interrupted = content.interrupted;
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(inline) = part.inline_data else {
                    continue;
                };
                if !inline.mime_type.starts_with("audio/") {
                    continue;
                }
                match InlineAudio::from_base64(inline.mime_type, &inline.data) {
                    Ok(audio) => message.audio.push(audio),
                    Err(e) => {
                        warn!("Skipping audio part: {}", e);
                        message.undecodable_audio += 1;
                    }
                }
            }
        }
    }

    Ok((!message.is_empty()).then_some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::AudioEncoding;
    use crate::config::SessionConfig;
    use crate::error::VoiceError;

    #[test]
    fn server_content_maps_every_field() {
        let line = r#"{"serverContent":{
            "inputTranscription":{"text":"hel"},
            "outputTranscription":{"text":"hi"},
            "modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAABAA=="}},{"text":"ignored"}]},
            "turnComplete":true}}"#;
        let message = decode_frame(line).unwrap().unwrap();
        assert_eq!(message.input_transcription.as_deref(), Some("hel"));
        assert_eq!(message.output_transcription.as_deref(), Some("hi"));
        assert!(message.turn_complete);
        assert!(!message.interrupted);
        assert_eq!(message.audio.len(), 1);
        assert_eq!(message.audio[0].data, vec![0, 0, 1, 0]);
    }

    #[test]
    fn tool_calls_keep_ids_and_args() {
        let line = r#"{"toolCall":{"functionCalls":[{"id":"1","name":"update_simulation","args":{"isActive":true}}]}}"#;
        let message = decode_frame(line).unwrap().unwrap();
        assert_eq!(message.tool_calls[0].id, "1");
        assert_eq!(message.tool_calls[0].args, json!({ "isActive": true }));
    }

    #[test]
    fn bookkeeping_frames_carry_nothing() {
        assert_eq!(decode_frame(r#"{"setupComplete":{}}"#).unwrap(), None);
        assert_eq!(decode_frame(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap(), None);
    }

    #[test]
    fn non_json_lines_are_errors_not_panics() {
        assert!(matches!(decode_frame("not json"), Err(VoiceError::Serialization(_))));
    }

    #[test]
    fn corrupt_audio_part_keeps_the_rest_of_the_frame() {
        let line = r#"{"serverContent":{
            "outputTranscription":{"text":"hi"},
            "modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"***"}}]},
            "turnComplete":true,
            "interrupted":true}}"#;
        let message = decode_frame(line).unwrap().unwrap();
        assert_eq!(message.audio.len(), 1);
        assert_eq!(message.undecodable_audio, 1);
        assert_eq!(message.output_transcription.as_deref(), Some("hi"));
        assert!(message.turn_complete);
        assert!(message.interrupted);
    }

    #[test]
    fn only_corrupt_audio_is_still_reported() {
        let line = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm","data":"***"}}]}}}"#;
        let message = decode_frame(line).unwrap().unwrap();
        assert!(message.audio.is_empty());
        assert_eq!(message.undecodable_audio, 1);
    }

    #[test]
    fn malformed_call_does_not_sink_its_batch() {
        let line = r#"{"toolCall":{"functionCalls":[
            {"name":"no_id"},
            {"id":"2","name":"update_simulation","args":{"isActive":false}}]}}"#;
        let message = decode_frame(line).unwrap().unwrap();
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].id, "2");
    }

    #[test]
    fn outbound_frames_use_live_shape() {
        let chunk = AudioChunk {
            sequence: 0,
            encoding: AudioEncoding::Pcm16,
            sample_rate: 16000,
            frames: 2,
            data: vec![0, 0, 1, 0],
        };
        let frame: Value = serde_json::from_str(&encode_audio(&chunk).unwrap()).unwrap();
        assert_eq!(frame["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(frame["realtimeInput"]["audio"]["data"], "AAABAA==");

        let responses = vec![ToolCallResponse { id: "1".into(), name: "f".into(), result: json!({ "ok": true }) }];
        let frame: Value = serde_json::from_str(&encode_tool_response(&responses).unwrap()).unwrap();
        assert_eq!(frame["toolResponse"]["functionResponses"][0]["response"]["ok"], true);

        let setup = SessionSetup { config: SessionConfig::default(), tools: vec!["f".into()] };
        let frame: Value = serde_json::from_str(&encode_setup(&setup).unwrap()).unwrap();
        assert_eq!(frame["setup"]["tools"][0]["functionDeclarations"][0]["name"], "f");
        assert!(frame["setup"].get("systemInstruction").is_none());
    }
}
