//! WebSocket side of a relay session, using tokio-tungstenite.
//!
//! The relay treats the WebSocket as a duplex byte transport: binary and
//! text frames both carry payload bytes, pongs feed the heartbeat, and a
//! close frame or EOF ends the stream. The helpers take any sink or stream
//! of messages, so they work on a whole socket and on its split halves.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use vless_core::{VlessError, VlessResult};

/// Maximum inbound frame and message size (1 MiB).
pub const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// One inbound event, with control frames other than pong already absorbed.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Data(Vec<u8>),
    Pong,
    Closed,
}

/// Server-side limits. Larger frames fail while being read, before they
/// are buffered whole.
pub fn config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_WS_FRAME_SIZE);
    config.max_frame_size = Some(MAX_WS_FRAME_SIZE);
    config
}

/// Complete the server side of the WebSocket handshake on an admitted socket.
pub async fn accept<S>(io: S) -> VlessResult<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio_tungstenite::accept_async_with_config(io, Some(config()))
        .await
        .map_err(|e| VlessError::Transport(format!("WS handshake failed: {e}")))
}

/// Send a binary message.
pub async fn send_binary<W>(ws: &mut W, data: &[u8]) -> VlessResult<()>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    ws.send(Message::Binary(data.to_vec()))
        .await
        .map_err(|e| VlessError::Transport(format!("WS send failed: {e}")))
}

/// Send an empty ping.
pub async fn send_ping<W>(ws: &mut W) -> VlessResult<()>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    ws.send(Message::Ping(Vec::new()))
        .await
        .map_err(|e| VlessError::Transport(format!("WS ping failed: {e}")))
}

/// Receive the next inbound event. Cancel safe.
pub async fn recv<R>(ws: &mut R) -> VlessResult<Inbound>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(Inbound::Data(data)),
            Some(Ok(Message::Text(text))) => return Ok(Inbound::Data(text.into_bytes())),
            Some(Ok(Message::Pong(_))) => return Ok(Inbound::Pong),
            // tungstenite queues the pong reply itself.
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "WS close frame received");
                return Ok(Inbound::Closed);
            }
            Some(Err(e)) => return Err(VlessError::Transport(format!("WS recv failed: {e}"))),
            None => return Ok(Inbound::Closed),
        }
    }
}
