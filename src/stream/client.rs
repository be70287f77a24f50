//! Websocket dial and the receive loop.
//!
//! The loop owns the socket exclusively. It races the stop signal against
//! every read and every delivery so a stop request is never left waiting on
//! the network or on a slow consumer.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{summarize_error_body, StreamingErrorBody, VkError};
use crate::retry::with_timeout;
use crate::stream::listener::{StreamCounters, StreamEnd};
use crate::stream::proto::{
    Event, ServiceMessage, StreamingMessage, EVENT_CODE, SERVICE_MESSAGE_CODE,
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receive loop settings copied out of `ClientOptions`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoopSettings {
    pub idle_timeout: Option<Duration>,
    pub close_timeout: Duration,
}

/// Opens the stream websocket, classifying upgrade rejections.
pub(crate) async fn open_stream(url: &Url, timeout: Duration) -> Result<WsStream, VkError> {
    match with_timeout(timeout, connect_async(url.as_str())).await {
        Err(_) => Err(VkError::ConnectTimeout(timeout)),
        Ok(Err(WsError::Http(response))) => Err(handshake_error(
            response.status().as_u16(),
            response.body().as_deref(),
        )),
        Ok(Err(err)) => Err(VkError::WebSocket(err)),
        Ok(Ok((socket, _))) => Ok(socket),
    }
}

fn handshake_error(status: u16, body: Option<&[u8]>) -> VkError {
    #[derive(Deserialize)]
    struct HandshakeBody {
        #[serde(default)]
        error: Option<StreamingErrorBody>,
    }

    let body = body.unwrap_or_default();
    let message = match serde_json::from_slice::<HandshakeBody>(body) {
        Ok(HandshakeBody { error: Some(error) }) => error.message,
        _ => summarize_error_body(&String::from_utf8_lossy(body)),
    };
    VkError::Handshake { status, message }
}

/// What the loop does with one data frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Deliver(Event),
    Service(ServiceMessage),
    Ignored(i64),
    Malformed(String),
}

pub(crate) fn classify_frame(payload: &[u8]) -> Frame {
    let message = match StreamingMessage::from_slice(payload) {
        Ok(message) => message,
        Err(err) => return Frame::Malformed(err.to_string()),
    };

    match message {
        StreamingMessage {
            code: EVENT_CODE,
            event: Some(event),
            ..
        } => Frame::Deliver(event),
        StreamingMessage {
            code: EVENT_CODE,
            event: None,
            ..
        } => Frame::Malformed("event frame without event payload".to_string()),
        StreamingMessage {
            code: SERVICE_MESSAGE_CODE,
            service_message: Some(service),
            ..
        } => Frame::Service(service),
        StreamingMessage { code, .. } => Frame::Ignored(code),
    }
}

/// Reads frames until stopped or until the connection ends, then closes it.
pub(crate) async fn receive_loop(
    mut socket: WsStream,
    events_tx: &mpsc::Sender<Event>,
    mut stop_rx: oneshot::Receiver<()>,
    counters: &StreamCounters,
    settings: LoopSettings,
) -> StreamEnd {
    let end = loop {
        let inbound = tokio::select! {
            biased;
            _ = &mut stop_rx => break StreamEnd::Stopped,
            _ = idle_elapsed(settings.idle_timeout) => break StreamEnd::IdleTimeout,
            inbound = socket.next() => inbound,
        };

        let payload = match inbound {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Ping(payload))) => {
                if let Err(err) = socket.send(Message::Pong(payload)).await {
                    break StreamEnd::Failed(VkError::WebSocket(err));
                }
                continue;
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                    None => (None, String::new()),
                };
                break StreamEnd::ServerClosed { code, reason };
            }
            Some(Err(err)) => break StreamEnd::Failed(VkError::WebSocket(err)),
            None => {
                break StreamEnd::ServerClosed {
                    code: None,
                    reason: String::new(),
                }
            }
        };
        counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let event = match classify_frame(&payload) {
            Frame::Deliver(event) => event,
            Frame::Service(service) => {
                info!(
                    event = "stream_service_message",
                    service_code = service.service_code,
                    message = %service.message
                );
                continue;
            }
            Frame::Ignored(code) => {
                counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
                debug!(event = "stream_frame_ignored", code);
                continue;
            }
            Frame::Malformed(reason) => {
                counters.frames_discarded.fetch_add(1, Ordering::Relaxed);
                debug!(event = "stream_frame_malformed", reason = %reason);
                continue;
            }
        };

        tokio::select! {
            biased;
            _ = &mut stop_rx => break StreamEnd::Stopped,
            sent = events_tx.send(event) => {
                if sent.is_err() {
                    break StreamEnd::ConsumerDropped;
                }
                counters.events_delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    };

    if with_timeout(settings.close_timeout, socket.close(None))
        .await
        .is_err()
    {
        debug!(event = "stream_close_timed_out");
    }

    match &end {
        StreamEnd::Failed(err) => warn!(event = "stream_loop_failed", error = %err),
        other => info!(event = "stream_loop_ended", reason = ?other),
    }
    end
}

async fn idle_elapsed(idle_timeout: Option<Duration>) {
    match idle_timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
