// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! WebSocket peer transport.
//!
//! Implements the transport adapter contracts over a WebSocket connection:
//! binary messages carry raw PCM audio, text messages carry JSON control
//! objects translated by a [`FrameSerializer`]. Supports both client mode
//! (connect to a remote server) and single-connection server mode.
//!
//! The reader task routes inbound binary payloads to the
//! [`WebSocketInput`] adapter's audio buffer and inbound control frames into
//! the input stage's queue handle registered via
//! [`WebSocketTransport::set_message_sink`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::frames::{Frame, FrameDirection, FramePayload};
use crate::processors::runtime::{QueueHandle, StageError};
use crate::serializers::{FrameSerializer, SerializedFrame};
use crate::transports::{TransportInput, TransportOutput};

// ---------------------------------------------------------------------------
// Connection halves
// ---------------------------------------------------------------------------

type ClientSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Abstraction over client and server WebSocket write halves.
enum WsSink {
    Client(ClientSink),
    Server(ServerSink),
}

impl WsSink {
    async fn send(&mut self, msg: Message) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match self {
            WsSink::Client(sink) => sink.send(msg).await,
            WsSink::Server(sink) => sink.send(msg).await,
        }
    }

    async fn close(&mut self) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match self {
            WsSink::Client(sink) => sink.close().await,
            WsSink::Server(sink) => sink.close().await,
        }
    }
}

/// Abstraction over client and server WebSocket read halves.
enum WsStream {
    Client(SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>),
    Server(SplitStream<WebSocketStream<TcpStream>>),
}

impl WsStream {
    async fn next(
        &mut self,
    ) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
        match self {
            WsStream::Client(stream) => stream.next().await,
            WsStream::Server(stream) => stream.next().await,
        }
    }
}

type SharedSink = Arc<tokio::sync::Mutex<Option<WsSink>>>;
type MessageSink = Arc<std::sync::Mutex<Option<QueueHandle>>>;

// ---------------------------------------------------------------------------
// WebSocketTransport
// ---------------------------------------------------------------------------

/// WebSocket transport producing one input and one output adapter.
pub struct WebSocketTransport {
    serializer: Arc<dyn FrameSerializer>,
    sink: SharedSink,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    audio_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    message_sink: MessageSink,
    cancel: CancellationToken,
    reader_task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create an unconnected transport using the given serializer.
    pub fn new(serializer: Arc<dyn FrameSerializer>) -> Self {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        Self {
            serializer,
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            audio_tx,
            audio_rx: Some(audio_rx),
            message_sink: Arc::new(std::sync::Mutex::new(None)),
            cancel: CancellationToken::new(),
            reader_task: None,
        }
    }

    /// Connect to a remote WebSocket server (client mode).
    pub async fn connect(&mut self, url: &str) -> Result<(), StageError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| StageError::transport(format!("connect to {url} failed: {e}")))?;
        tracing::info!(url, "websocket connected");

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(WsSink::Client(sink));
        self.reader_task = Some(tokio::spawn(run_reader(
            WsStream::Client(stream),
            self.audio_tx.clone(),
            self.serializer.clone(),
            self.message_sink.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Bind `addr` and accept a single peer connection (server mode).
    ///
    /// Returns the bound address immediately; the accept happens in the
    /// background so callers can hand the peer the address first.
    pub async fn serve(&mut self, addr: &str) -> Result<SocketAddr, StageError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StageError::transport(format!("bind {addr} failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StageError::transport(format!("local_addr failed: {e}")))?;

        let sink_slot = self.sink.clone();
        let audio_tx = self.audio_tx.clone();
        let serializer = self.serializer.clone();
        let message_sink = self.message_sink.clone();
        let cancel = self.cancel.clone();

        self.reader_task = Some(tokio::spawn(async move {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    return;
                }
            };
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!("websocket handshake failed: {e}");
                    return;
                }
            };
            tracing::info!(%peer, "peer connected");

            let (sink, stream) = ws.split();
            *sink_slot.lock().await = Some(WsSink::Server(sink));
            run_reader(
                WsStream::Server(stream),
                audio_tx,
                serializer,
                message_sink,
                cancel,
            )
            .await;
        }));

        Ok(local_addr)
    }

    /// Register the input stage queue that receives inbound control frames.
    pub fn set_message_sink(&self, handle: QueueHandle) {
        *self.message_sink.lock().expect("message sink poisoned") = Some(handle);
    }

    /// Take the audio input adapter. Can only be taken once.
    pub fn take_input_adapter(&mut self) -> Option<WebSocketInput> {
        self.audio_rx
            .take()
            .map(|audio_rx| WebSocketInput { audio_rx })
    }

    /// An output adapter writing to this transport's connection.
    pub fn output_adapter(&self) -> WebSocketOutput {
        WebSocketOutput {
            sink: self.sink.clone(),
            serializer: self.serializer.clone(),
        }
    }

    /// Close the connection and stop the reader.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
    }
}

/// Read loop shared by client and server modes.
async fn run_reader(
    mut stream: WsStream,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    serializer: Arc<dyn FrameSerializer>,
    message_sink: MessageSink,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Binary(bytes))) => {
                let _ = audio_tx.send(bytes);
            }
            Some(Ok(Message::Text(text))) => {
                let Some(frame) = serializer.deserialize(&SerializedFrame::Text(text)) else {
                    continue;
                };
                match frame.payload() {
                    // Base64 audio inside a text message joins the audio path.
                    FramePayload::InputAudio(_) => {
                        if let FramePayload::InputAudio(audio) = frame.into_payload() {
                            let _ = audio_tx.send(audio.audio);
                        }
                    }
                    _ => {
                        let sink = message_sink
                            .lock()
                            .expect("message sink poisoned")
                            .clone();
                        match sink {
                            Some(handle) => handle.queue(frame, FrameDirection::Downstream),
                            None => {
                                tracing::debug!(
                                    frame = %frame,
                                    "no message sink registered, dropping peer message"
                                );
                            }
                        }
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!("peer closed connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!("websocket read error: {e}");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Audio source backed by the transport's inbound binary messages.
pub struct WebSocketInput {
    audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl TransportInput for WebSocketInput {
    async fn receive_audio(&mut self) -> Option<Vec<u8>> {
        self.audio_rx.recv().await
    }
}

/// Audio and message sink writing to the transport's connection.
pub struct WebSocketOutput {
    sink: SharedSink,
    serializer: Arc<dyn FrameSerializer>,
}

impl WebSocketOutput {
    async fn send_serialized(&self, data: SerializedFrame) -> Result<(), StageError> {
        let message = match data {
            SerializedFrame::Text(text) => Message::Text(text),
            SerializedFrame::Binary(bytes) => Message::Binary(bytes),
        };
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(message)
                .await
                .map_err(|e| StageError::transport(format!("websocket send failed: {e}"))),
            None => Err(StageError::transport("websocket not connected")),
        }
    }
}

#[async_trait]
impl TransportOutput for WebSocketOutput {
    async fn send_audio(&mut self, frame: &Frame) -> Result<(), StageError> {
        match self.serializer.serialize(frame) {
            Some(data) => self.send_serialized(data).await,
            None => Ok(()),
        }
    }

    async fn send_message(&mut self, frame: &Frame) -> Result<(), StageError> {
        match self.serializer.serialize(frame) {
            Some(data) => self.send_serialized(data).await,
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::processors::runtime::{Passthrough, Processor};
    use crate::serializers::json::JsonWireSerializer;

    #[tokio::test]
    async fn loopback_audio_and_messages() {
        let serializer = Arc::new(JsonWireSerializer::default());
        let mut transport = WebSocketTransport::new(serializer);
        let addr = transport.serve("127.0.0.1:0").await.expect("serve");

        // The control-message sink is a plain processor queue.
        let stage = Processor::with_defaults(Passthrough);
        transport.set_message_sink(stage.handle());

        let mut input = transport.take_input_adapter().expect("input adapter");
        assert!(transport.take_input_adapter().is_none());

        // Connect a raw peer and send one audio chunk and one control object.
        let url = format!("ws://{addr}");
        let (mut peer, _) = connect_async(&url).await.expect("peer connect");
        peer.send(Message::Binary(vec![7u8; 640])).await.expect("send audio");
        peer.send(Message::Text(r#"{"type":"hello","data":{}}"#.into()))
            .await
            .expect("send text");

        let audio = tokio::time::timeout(Duration::from_secs(2), input.receive_audio())
            .await
            .expect("timeout")
            .expect("stream open");
        assert_eq!(audio.len(), 640);

        // The control frame landed on the stage's ordinary queue.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if stage.metrics_snapshot().ordinary_depth == 1 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "no control frame arrived");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Outbound: audio goes out as binary, text as a bot_response object.
        let mut output = transport.output_adapter();
        output
            .send_audio(&Frame::output_audio(vec![1u8; 320], 24000, 1))
            .await
            .expect("send_audio");
        output
            .send_message(&Frame::text("hello peer"))
            .await
            .expect("send_message");

        let first = tokio::time::timeout(Duration::from_secs(2), peer.next())
            .await
            .expect("timeout")
            .expect("message")
            .expect("no error");
        assert!(matches!(first, Message::Binary(ref b) if b.len() == 320));

        let second = tokio::time::timeout(Duration::from_secs(2), peer.next())
            .await
            .expect("timeout")
            .expect("message")
            .expect("no error");
        match second {
            Message::Text(text) => assert!(text.contains("bot_response")),
            other => panic!("expected text message, got {other:?}"),
        }

        transport.close().await;
    }

    #[tokio::test]
    async fn output_without_connection_errors() {
        let serializer = Arc::new(JsonWireSerializer::default());
        let transport = WebSocketTransport::new(serializer);
        let mut output = transport.output_adapter();
        assert!(output
            .send_audio(&Frame::output_audio(vec![0u8; 4], 24000, 1))
            .await
            .is_err());
    }
}
