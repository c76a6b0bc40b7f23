//! The remote speech service, seen as an opaque session factory.

pub mod stdio;
pub mod wire;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::codec::{AudioChunk, AudioEncoding};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::kernel::event::TransportEvent;
use crate::kernel::tools::ToolCallResponse;

pub use stdio::{JsonLinesSession, StdioTransport};

/// What a new session is opened with.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub config: SessionConfig,
    /// Names of the tools the remote side may call.
    pub tools: Vec<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Encodings the remote side accepts for outbound audio.
    fn supported_encodings(&self) -> Vec<AudioEncoding> {
        AudioEncoding::ALL.to_vec()
    }

    /// Open a session. Inbound messages, errors and the close notification
    /// are delivered through `events`, in arrival order.
    async fn open_session(
        &self,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn SessionHandle>>;
}

#[async_trait]
pub trait SessionHandle: Send {
    /// Takes ownership; the chunk is not retained after sending.
    async fn send_audio(&mut self, chunk: AudioChunk) -> Result<()>;

    /// One batched response for one batch of tool calls.
    async fn send_tool_response(&mut self, responses: Vec<ToolCallResponse>) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}
