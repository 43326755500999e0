//! tokio-tungstenite connector

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::transport::channel::{StreamConnector, StreamPair};
use crate::transport::traits::TransportError;

/// [`StreamConnector`] over `tokio-tungstenite`
///
/// Only text frames are surfaced. Control frames are answered by the library;
/// a close frame ends the inbound stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<StreamPair, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(|e| TransportError::DeliveryFailed(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(WsMessage::Text(text))));

        let stream = stream
            .take_while(|frame| future::ready(!matches!(frame, Ok(WsMessage::Close(_)))))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(WsMessage::Text(text)) => Some(Ok(text)),
                    Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!(error = %e, "WebSocket read failed");
                        Some(Err(TransportError::ConnectionLost))
                    }
                })
            });

        Ok(StreamPair {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}
