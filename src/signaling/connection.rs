//! One WebSocket signaling connection
//!
//! ```text
//!  socket ─► read loop ─► parse ─► CallHandler::handle ─┐
//!                                                       ▼
//!  socket ◄── writer task ◄──── outbound queue ◄── replies + pushes
//! ```
//!
//! Requests from one connection are handled in order. Ping frames are
//! answered by tungstenite itself.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ProtocolError, Result};
use crate::peer::PeerId;

use super::handler::CallHandler;
use super::message::{parse_request, Outbound};

/// Run the WebSocket handshake and serve `peer` until the socket closes
///
/// The peer is torn down on return, whatever the reason.
pub async fn serve_connection<S>(
    stream: S,
    peer: PeerId,
    handler: Arc<CallHandler>,
    queue_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::channel::<Outbound>(queue_size.max(1));
    handler.connect(peer, tx.clone()).await;

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let text = match outbound.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(peer = %peer, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                tracing::debug!(peer = %peer, error = %e, "Failed to send frame");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut result = Ok(());
    while let Some(frame) = source.next().await {
        let outbound = match frame {
            Ok(Message::Text(text)) => match parse_request(&text) {
                Ok((id, request)) => match handler.handle(peer, request).await {
                    Ok(reply) => Outbound::reply(id, reply),
                    Err(e) => Outbound::error(id, &e),
                },
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "Rejected frame");
                    Outbound::protocol_error(&e)
                }
            },
            Ok(Message::Binary(_)) => {
                Outbound::protocol_error(&ProtocolError::new(None, "binary frames are not supported"))
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                result = Err(e.into());
                break;
            }
        };

        if tx.send(outbound).await.is_err() {
            break;
        }
    }

    handler.disconnect(peer).await;
    drop(tx);
    let _ = writer.await;

    tracing::debug!(peer = %peer, "Signaling connection closed");
    result
}
