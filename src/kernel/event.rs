use crate::audio::codec::{AudioChunk, InlineAudio};
use crate::kernel::tools::ToolCallRequest;

/// One inbound message from the remote service, already decoded from the wire.
///
/// A single message may carry several kinds of content at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub tool_calls: Vec<ToolCallRequest>,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    pub audio: Vec<InlineAudio>,
    pub interrupted: bool,
    /// Audio parts the transport could not decode and left out of `audio`.
    pub undecodable_audio: usize,
}

/// A single piece of a `ServerMessage`, handled by exactly one component.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPart {
    ToolCalls(Vec<ToolCallRequest>),
    UserText(String),
    ModelText(String),
    TurnComplete,
    Audio(InlineAudio),
    Interrupted,
}

impl ServerMessage {
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty()
            && self.input_transcription.is_none()
            && self.output_transcription.is_none()
            && !self.turn_complete
            && self.audio.is_empty()
            && !self.interrupted
            && self.undecodable_audio == 0
    }

    /// Split into parts in processing order: tool calls, transcription deltas,
    /// turn completion, audio, interruption.
    pub fn into_parts(self) -> Vec<InboundPart> {
        let mut parts = Vec::new();
        if !self.tool_calls.is_empty() {
            parts.push(InboundPart::ToolCalls(self.tool_calls));
        }
        if let Some(text) = self.input_transcription {
            parts.push(InboundPart::UserText(text));
        }
        if let Some(text) = self.output_transcription {
            parts.push(InboundPart::ModelText(text));
        }
        if self.turn_complete {
            parts.push(InboundPart::TurnComplete);
        }
        parts.extend(self.audio.into_iter().map(InboundPart::Audio));
        if self.interrupted {
            parts.push(InboundPart::Interrupted);
        }
        parts
    }
}

/// What the transport delivers asynchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(ServerMessage),
    Error(String),
    Closed,
}

/// Everything the controller loop reacts to.
#[derive(Debug)]
pub enum ControllerEvent {
    Transport(TransportEvent),
    Captured(AudioChunk),
    PlaybackTick,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_follow_processing_order() {
        let message = ServerMessage {
            tool_calls: vec![ToolCallRequest {
                id: "1".into(),
                name: "noop".into(),
                args: serde_json::Value::Null,
            }],
            input_transcription: Some("hi".into()),
            output_transcription: Some("hello".into()),
            turn_complete: true,
            audio: vec![InlineAudio { mime_type: "audio/pcm".into(), data: vec![0, 0] }],
            interrupted: true,
            undecodable_audio: 0,
        };
        let kinds: Vec<&str> = message
            .into_parts()
            .iter()
            .map(|part| match part {
                InboundPart::ToolCalls(_) => "tools",
                InboundPart::UserText(_) => "user",
                InboundPart::ModelText(_) => "model",
                InboundPart::TurnComplete => "turn",
                InboundPart::Audio(_) => "audio",
                InboundPart::Interrupted => "interrupted",
            })
            .collect();
        assert_eq!(kinds, ["tools", "user", "model", "turn", "audio", "interrupted"]);
    }

    #[test]
    fn default_message_is_empty() {
        assert!(ServerMessage::default().is_empty());
        assert!(ServerMessage::default().into_parts().is_empty());
    }
}
