//! Adapter from an upgraded axum [`WebSocket`] to the relay's Frame Channel.
//!
//! Ping and pong are handled by the protocol layer and never reach the
//! relay. axum delivers whole messages, so every inbound data frame is
//! final; outbound fragments cannot be expressed and are rejected.

use async_trait::async_trait;
use axum::extract::ws::{self, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use wsrelay_core::{
    CloseFrame, CloseHandshakeError, DataKind, Frame, FrameChannel, FrameSink, FrameSource,
    ReceiveError, SendError,
};

/// An upgraded axum socket.
pub struct AxumChannel(WebSocket);

impl AxumChannel {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self(socket)
    }
}

impl FrameChannel for AxumChannel {
    type Source = AxumSource;
    type Sink = AxumSink;

    fn split(self) -> (AxumSource, AxumSink) {
        let (sink, stream) = self.0.split();
        (AxumSource(stream), AxumSink(sink))
    }
}

/// Receive half of an [`AxumChannel`].
pub struct AxumSource(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for AxumSource {
    async fn recv(&mut self) -> Option<Result<Frame, ReceiveError>> {
        loop {
            match self.0.next().await? {
                Ok(message) => {
                    if let Some(frame) = frame_from_message(message) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => return Some(Err(ReceiveError::Transport(e.to_string()))),
            }
        }
    }
}

/// Send half of an [`AxumChannel`].
pub struct AxumSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for AxumSink {
    async fn send(&mut self, frame: Frame) -> Result<(), SendError> {
        let message = message_from_frame(frame)?;
        self.0
            .send(message)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    async fn close(&mut self, frame: Option<CloseFrame>) -> Result<(), CloseHandshakeError> {
        let message = Message::Close(frame.map(close_to_axum));
        match self.0.send(message).await.map_err(close_error) {
            // The peer closed first: its reply is queued in the protocol
            // layer and only goes out once the sink is flushed.
            Err(CloseHandshakeError::AlreadyClosed) => {
                SinkExt::close(&mut self.0).await.map_err(close_error)
            }
            other => other,
        }
    }

    async fn ping(&mut self) -> Result<(), SendError> {
        self.0
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }
}

/// Map an axum message to a relay frame. Ping and pong yield `None`.
pub fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Data {
            kind: DataKind::Text,
            payload: Bytes::from(text),
            is_final: true,
        }),
        Message::Binary(data) => Some(Frame::Data {
            kind: DataKind::Binary,
            payload: data,
            is_final: true,
        }),
        Message::Close(close) => Some(Frame::Close(close.map(|c| {
            CloseFrame::new(c.code, c.reason.as_str())
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

/// Map a relay frame to an axum message.
pub fn message_from_frame(frame: Frame) -> Result<Message, SendError> {
    match frame {
        Frame::Data {
            kind,
            payload,
            is_final,
        } => {
            if !is_final || kind == DataKind::Continuation {
                return Err(SendError::Unsupported(
                    "fragmented messages cannot be written to this socket".into(),
                ));
            }
            match kind {
                DataKind::Text => Utf8Bytes::try_from(payload)
                    .map(Message::Text)
                    .map_err(|_| SendError::Unsupported("text payload is not UTF-8".into())),
                DataKind::Binary | DataKind::Continuation => Ok(Message::Binary(payload)),
            }
        }
        Frame::Close(close) => Ok(Message::Close(close.map(close_to_axum))),
    }
}

fn close_to_axum(close: CloseFrame) -> ws::CloseFrame {
    ws::CloseFrame {
        code: close.code,
        reason: close.reason.into(),
    }
}

/// After a peer-initiated close the protocol layer has already queued the
/// peer's frame as its reply, so our own close is refused as "already closing".
fn close_error(error: axum::Error) -> CloseHandshakeError {
    let message = error.to_string();
    match error.into_inner().downcast::<tungstenite::Error>() {
        Ok(inner) => match *inner {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(tungstenite::error::ProtocolError::SendAfterClosing) => {
                CloseHandshakeError::AlreadyClosed
            }
            other => CloseHandshakeError::Transport(other.to_string()),
        },
        Err(_) => CloseHandshakeError::Transport(message),
    }
}
