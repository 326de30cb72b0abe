//! WebSocket subscriber sessions
//!
//! Each upgraded connection registers a queue-backed subscriber and pushes
//! every broadcast state to the client as a text message. Framing, masking
//! and control frames are handled by tokio-tungstenite; pings are answered
//! while the session reads.

use crate::events::shutdown_requested;
use crate::subscribers::{ChannelSubscriber, Subscriber, SubscriberRegistry};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Largest client message accepted; subscribers only send control frames
const MAX_CLIENT_MESSAGE: usize = 64 * 1024;

/// Upper bound on sending the final close frame
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Compute Sec-WebSocket-Accept from the client key
pub fn accept_key(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Messages buffered before the subscriber counts as too slow
    pub queue_capacity: usize,
    /// Longest a single message may take to reach the socket
    pub send_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    /// Client closed or the socket failed; nothing more to send
    Disconnected,
    /// Server side ends the session with this close code
    Close(CloseCode),
}

/// Push state updates to one upgraded WebSocket connection.
///
/// The subscriber is registered for the lifetime of the connection and
/// removed when the client closes, the socket fails, a send stalls past
/// `send_timeout`, the registry drops it as too slow, or shutdown is
/// signalled. A stalled write never blocks shutdown.
pub async fn serve_subscriber<S>(
    io: S,
    registry: Arc<SubscriberRegistry>,
    options: SessionOptions,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = WebSocketConfig {
        max_message_size: Some(MAX_CLIENT_MESSAGE),
        max_frame_size: Some(MAX_CLIENT_MESSAGE),
        ..Default::default()
    };
    let socket = WebSocketStream::from_raw_socket(io, Role::Server, Some(config)).await;
    let (mut sink, mut incoming) = socket.split();

    let (subscriber, mut updates) = ChannelSubscriber::new(options.queue_capacity);
    let id = subscriber.id();
    registry.add(subscriber);
    debug!(subscriber = %id, "WebSocket subscriber connected");

    let ending = loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break Ending::Close(CloseCode::Away),
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break Ending::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber = %id, error = %e, "WebSocket read failed");
                    break Ending::Disconnected;
                }
            },
            update = updates.recv() => match update {
                Some(message) => {
                    let send = tokio::time::timeout(
                        options.send_timeout,
                        sink.send(Message::Text(message.to_string())),
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break Ending::Close(CloseCode::Away),
                        result = send => match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(subscriber = %id, error = %e, "WebSocket send failed");
                                break Ending::Disconnected;
                            }
                            Err(_) => {
                                debug!(subscriber = %id, "WebSocket send timed out");
                                break Ending::Close(CloseCode::Policy);
                            }
                        }
                    }
                }
                // Registry dropped us, the client is too slow
                None => break Ending::Close(CloseCode::Policy),
            },
        }
    };

    registry.remove(id);
    if let Ending::Close(code) = ending {
        close(&mut sink, code).await;
    }
    debug!(subscriber = %id, ?ending, "WebSocket subscriber disconnected");
}

async fn close<S>(sink: &mut SplitSink<WebSocketStream<S>, Message>, code: CloseCode)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: "".into(),
    };
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await;
}
