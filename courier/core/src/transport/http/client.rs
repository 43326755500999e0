//! reqwest-backed request channel

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::sse::SseDecoder;
use crate::transport::channel::{ChannelReply, EventStream, RequestChannel};
use crate::transport::traits::TransportError;

/// [`RequestChannel`] over a shared `reqwest::Client`
#[derive(Clone, Debug)]
pub struct ReqwestChannel {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestChannel {
    /// Build a channel rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] if the client cannot be built.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn request_error(e: &reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::ConnectionFailed(e.to_string())
    } else {
        TransportError::DeliveryFailed(e.to_string())
    }
}

async fn into_reply(response: reqwest::Response) -> Result<ChannelReply, TransportError> {
    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(|e| request_error(&e))?;
    let body = if bytes.is_empty() {
        None
    } else {
        // Non-JSON bodies (plain-text errors) are dropped; status carries the outcome
        serde_json::from_slice(&bytes).ok()
    };
    Ok(ChannelReply { status, body })
}

#[async_trait]
impl RequestChannel for ReqwestChannel {
    async fn get(&self, path: &str, timeout: Duration) -> Result<ChannelReply, TransportError> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        into_reply(response).await
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ChannelReply, TransportError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        into_reply(response).await
    }

    async fn open_events(&self, path: &str) -> Result<EventStream, TransportError> {
        let response = self
            .client
            .get(self.url(path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "event stream returned {}",
                response.status()
            )));
        }

        let mut decoder = SseDecoder::new();
        let stream = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => Ok(decoder
                    .push(&bytes)
                    .into_iter()
                    .map(|event| Ok::<_, TransportError>(event.data))
                    .collect::<Vec<_>>()),
                Err(e) => {
                    tracing::debug!(error = %e, "Event stream read failed");
                    Err(TransportError::ConnectionLost)
                }
            })
            .flat_map(|batch| match batch {
                Ok(events) => futures::stream::iter(events),
                Err(e) => futures::stream::iter(vec![Err(e)]),
            });
        Ok(stream.boxed())
    }
}
