//! Negotiated tunnel connection
//!
//! Wraps the upgraded websocket and narrows it to the two primitives the
//! relay needs: read the next message together with its type tag, and
//! write a binary message. The connection can be split so each relay
//! direction owns one half.

use super::TunnelError;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

/// Type tag of a message received from the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Binary,
    Text,
    Ping,
    Pong,
    Close,
    /// Raw frame surfaced by the websocket layer
    Other,
}

/// A message received from the relay
#[derive(Debug, Clone)]
pub struct TunnelMessage {
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl TunnelMessage {
    pub fn is_binary(&self) -> bool {
        self.kind == MessageKind::Binary
    }
}

impl From<Message> for TunnelMessage {
    fn from(message: Message) -> Self {
        let (kind, payload) = match message {
            Message::Binary(data) => (MessageKind::Binary, Bytes::from(data)),
            Message::Text(text) => (MessageKind::Text, Bytes::from(text.into_bytes())),
            Message::Ping(data) => (MessageKind::Ping, Bytes::from(data)),
            Message::Pong(data) => (MessageKind::Pong, Bytes::from(data)),
            Message::Close(_) => (MessageKind::Close, Bytes::new()),
            Message::Frame(frame) => (MessageKind::Other, Bytes::from(frame.into_data())),
        };
        Self { kind, payload }
    }
}

/// Authenticated, message-oriented channel to the relay
pub struct TunnelConnection<S> {
    ws: WebSocketStream<S>,
}

impl<S> std::fmt::Debug for TunnelConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection").finish()
    }
}

impl<S> TunnelConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an upgraded websocket
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }

    /// Read the next message. `Ok(None)` means the relay closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<TunnelMessage>, TunnelError> {
        read_next(&mut self.ws).await
    }

    /// Send `data` as exactly one binary message
    pub async fn write_binary(&mut self, data: &[u8]) -> Result<(), TunnelError> {
        self.ws
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(TunnelError::WebSocket)
    }

    /// Close the connection. Consumes it, so it can only happen once.
    pub async fn close(mut self) -> Result<(), TunnelError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TunnelError::WebSocket(e)),
        }
    }

    /// Split into independently owned write and read halves
    pub fn split(self) -> (TunnelWriter<S>, TunnelReader<S>) {
        let (sink, source) = self.ws.split();
        (TunnelWriter { sink }, TunnelReader { source })
    }
}

/// Read half of a [`TunnelConnection`]
pub struct TunnelReader<S> {
    source: SplitStream<WebSocketStream<S>>,
}

impl<S> TunnelReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the next message. `Ok(None)` means the relay closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<TunnelMessage>, TunnelError> {
        read_next(&mut self.source).await
    }
}

/// Write half of a [`TunnelConnection`]
pub struct TunnelWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> TunnelWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `data` as exactly one binary message
    pub async fn write_binary(&mut self, data: &[u8]) -> Result<(), TunnelError> {
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(TunnelError::WebSocket)
    }

    /// Send a close frame and flush. Consumes the half, so it can only happen once.
    pub async fn close(mut self) -> Result<(), TunnelError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TunnelError::WebSocket(e)),
        }
    }
}

async fn read_next<St>(source: &mut St) -> Result<Option<TunnelMessage>, TunnelError>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match source.next().await {
        None => Ok(None),
        Some(Ok(message)) => {
            let message = TunnelMessage::from(message);
            trace!("Received {:?} message, {} bytes", message.kind, message.payload.len());
            Ok(Some(message))
        }
        Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => Ok(None),
        Some(Err(e)) => Err(TunnelError::WebSocket(e)),
    }
}
