use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Model,
}

/// One finalized utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub is_complete: bool,
}

impl TranscriptEntry {
    fn finalized(sender: Sender, text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.to_string(),
            sender,
            timestamp: Utc::now(),
            is_complete: true,
        }
    }
}

/// Accumulates transcription deltas until a turn boundary.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    user: String,
    model: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: &str) {
        self.user.push_str(text);
    }

    pub fn append_model(&mut self, text: &str) {
        self.model.push_str(text);
    }

    /// User entry first, then model; blank buffers emit nothing.
    /// Both buffers are empty afterwards.
    pub fn flush_turn(&mut self) -> Vec<TranscriptEntry> {
        let user = std::mem::take(&mut self.user);
        let model = std::mem::take(&mut self.model);

        [(Sender::User, user), (Sender::Model, model)]
            .into_iter()
            .filter_map(|(sender, text)| {
                let text = text.trim();
                (!text.is_empty()).then(|| TranscriptEntry::finalized(sender, text))
            })
            .collect()
    }

    /// The interrupted reply counts as not said.
    pub fn discard_model_buffer(&mut self) {
        self.model.clear();
    }

    pub fn reset(&mut self) {
        self.user.clear();
        self.model.clear();
    }

    pub fn pending_user(&self) -> &str {
        &self.user
    }

    pub fn pending_model(&self) -> &str {
        &self.model
    }
}
