//! JSON-lines transport: frames out on a writer, frames in from a reader.
//!
//! `StdioTransport` binds it to the process's stdin/stdout so an external
//! bridge process can own the actual network connection.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::wire::{decode_frame, encode_audio, encode_setup, encode_tool_response};
use super::{SessionHandle, SessionSetup, Transport};
use crate::audio::codec::AudioChunk;
use crate::error::{Result, VoiceError};
use crate::kernel::event::TransportEvent;
use crate::kernel::tools::ToolCallResponse;

#[derive(Debug, Default)]
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn open_session(
        &self,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn SessionHandle>> {
        let reader = BufReader::new(tokio::io::stdin());
        let session = JsonLinesSession::open(tokio::io::stdout(), reader, setup, events).await?;
        info!("Session opened on stdio for {}", setup.config.model);
        Ok(Box::new(session))
    }
}

/// An open session over any line-oriented byte stream pair.
pub struct JsonLinesSession<W> {
    writer: W,
    reader: Option<JoinHandle<()>>,
}

impl<W> JsonLinesSession<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Write the setup frame and start reading inbound frames.
    pub async fn open<R>(
        writer: W,
        reader: R,
        setup: &SessionSetup,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let mut session = Self { writer, reader: None };
        session.write_line(&encode_setup(setup)?).await?;
        session.reader = Some(tokio::spawn(read_frames(reader, events)));
        Ok(session)
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let io = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        };
        io.await.map_err(|e| VoiceError::transport(e.to_string()))
    }
}

#[async_trait]
impl<W> SessionHandle for JsonLinesSession<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_audio(&mut self, chunk: AudioChunk) -> Result<()> {
        let line = encode_audio(&chunk)?;
        self.write_line(&line).await
    }

    async fn send_tool_response(&mut self, responses: Vec<ToolCallResponse>) -> Result<()> {
        let line = encode_tool_response(&responses)?;
        self.write_line(&line).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer
            .shutdown()
            .await
            .map_err(|e| VoiceError::transport(e.to_string()))
    }
}

impl<W> Drop for JsonLinesSession<W> {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_frames<R>(reader: R, events: mpsc::UnboundedSender<TransportEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let event = match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode_frame(&line) {
                Ok(Some(message)) => TransportEvent::Message(message),
                Ok(None) => continue,
                Err(e) => {
                    warn!("Dropping undecodable frame: {}", e);
                    continue;
                }
            },
            Ok(None) => {
                debug!("Inbound stream ended");
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::kernel::tools::ToolCallResponse;
    use serde_json::json;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (their_read, mut their_write) = tokio::io::split(theirs);
        let (our_read, our_write) = tokio::io::split(ours);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let setup = SessionSetup { config: SessionConfig::default(), tools: vec![] };
        let mut session = JsonLinesSession::open(our_write, BufReader::new(our_read), &setup, tx)
            .await
            .unwrap();

        let mut their_lines = BufReader::new(their_read).lines();
        let first = their_lines.next_line().await.unwrap().unwrap();
        assert!(first.starts_with(r#"{"setup""#));

        session
            .send_tool_response(vec![ToolCallResponse { id: "1".into(), name: "f".into(), result: json!("ok") }])
            .await
            .unwrap();
        let second = their_lines.next_line().await.unwrap().unwrap();
        assert!(second.contains("functionResponses"));

        their_write
            .write_all(b"garbage\n{\"serverContent\":{\"turnComplete\":true}}\n")
            .await
            .unwrap();
        match rx.recv().await {
            Some(TransportEvent::Message(message)) => assert!(message.turn_complete),
            other => panic!("unexpected {other:?}"),
        }

        drop(their_write);
        drop(their_lines);
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
    }
}
