//! axum WebSocket as a [`Frame`] transport.

use super::{Frame, TransportError};
use crate::actors::{ConnectionActor, LeaveReason};
use crate::errors::HubError;
use axum::extract::ws::{Message, WebSocket};
use futures::{future, SinkExt, StreamExt};

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }
}

/// Run `actor` over an upgraded WebSocket.
pub async fn serve_socket(
    socket: WebSocket,
    actor: ConnectionActor,
) -> Result<LeaveReason, HubError> {
    let (sink, stream) = socket.split();

    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(Message::from(frame))));
    let stream = stream.map(|read| {
        read.map(Frame::from)
            .map_err(|e| TransportError::Io(e.to_string()))
    });

    actor.run(sink, stream).await
}
