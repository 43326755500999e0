//! Inbound frame classification
//!
//! Servers push JSON objects over the event stream and the socket. They are
//! sorted into four shapes:
//!
//! | Shape | Recognised by |
//! |---|---|
//! | `Response` | object carries a `success` field |
//! | `Ping` | `type == "ping"` |
//! | `Pong` | `type == "pong"` |
//! | `Message` | anything else with a `type` |

use serde_json::Value;

use super::base::TransportCore;
use super::events::TransportEvent;
use super::traits::TransportError;
use super::types::{Message, Response};

/// Message type of liveness probes
pub const PING: &str = "ping";

/// Message type of liveness replies
pub const PONG: &str = "pong";

/// A decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Answer to a request
    Response(Response),
    /// Liveness probe from the peer
    Ping(Message),
    /// Liveness reply from the peer
    Pong(Message),
    /// Anything else
    Message(Message),
}

/// Decode one inbound text frame
///
/// # Errors
///
/// Returns [`TransportError::MalformedResponse`] for text that is not a JSON
/// object of a recognised shape.
pub fn classify(text: &str) -> Result<Inbound, TransportError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| TransportError::MalformedResponse(format!("invalid JSON frame: {e}")))?;
    classify_value(value)
}

/// [`classify`] for an already-parsed value
///
/// # Errors
///
/// See [`classify`].
pub fn classify_value(value: Value) -> Result<Inbound, TransportError> {
    if !value.is_object() {
        return Err(TransportError::MalformedResponse(
            "frame is not a JSON object".to_string(),
        ));
    }
    if value.get("success").is_some() {
        return serde_json::from_value(value)
            .map(Inbound::Response)
            .map_err(|e| TransportError::MalformedResponse(e.to_string()));
    }
    let message: Message =
        serde_json::from_value(value).map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
    Ok(match message.message_type.as_str() {
        PING => Inbound::Ping(message),
        PONG => Inbound::Pong(message),
        _ => Inbound::Message(message),
    })
}

/// Turn a reply body into the response for request `id`
///
/// Bodies shaped like a `Response` are used as-is; any other JSON body is the
/// payload of a successful response, and no body at all is an empty success.
///
/// # Errors
///
/// Returns [`TransportError::MalformedResponse`] for a `Response`-shaped body
/// that does not decode or answers a different request.
pub fn response_from_body(id: &str, body: Option<Value>) -> Result<Response, TransportError> {
    let Some(body) = body else {
        return Ok(Response::success(id, Value::Null));
    };
    if body.get("success").is_none() {
        return Ok(Response::success(id, body));
    }
    let mut response: Response = serde_json::from_value(body)
        .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
    if response.id.is_empty() {
        response.id = id.to_string();
    } else if response.id != id {
        return Err(TransportError::MalformedResponse(format!(
            "response id {} does not match request {id}",
            response.id
        )));
    }
    Ok(response)
}

/// Settle a pending request from a response or reply message, or emit it as
/// an unsolicited `message` event
///
/// Returns `true` if a pending request was resolved.
pub fn route_to_pending(core: &TransportCore, inbound: Inbound) -> bool {
    match inbound {
        Inbound::Response(response) => {
            let id = response.id.clone();
            let resolved = core.pending().resolve(&id, response);
            if !resolved {
                tracing::debug!(transport = %core.kind(), message_id = %id, "Ignoring response with no pending request");
            }
            resolved
        }
        Inbound::Message(message) | Inbound::Ping(message) | Inbound::Pong(message) => {
            if let Some(reply_to) = message.reply_to.as_deref() {
                if core.pending().contains(reply_to) {
                    let response = Response::success(reply_to, message.payload.clone());
                    return core.pending().resolve(reply_to, response);
                }
            }
            core.emit(TransportEvent::MessageReceived {
                kind: core.kind(),
                message,
            });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::circuit_breaker::CircuitBreakerConfig;
    use crate::transport::types::TransportKind;
    use std::time::Duration;

    #[test]
    fn test_classify_shapes() {
        assert!(matches!(
            classify(r#"{"id":"m1","success":true,"payload":1}"#),
            Ok(Inbound::Response(_))
        ));
        assert!(matches!(classify(r#"{"type":"ping"}"#), Ok(Inbound::Ping(_))));
        assert!(matches!(
            classify(r#"{"type":"pong","data":{"ts":1}}"#),
            Ok(Inbound::Pong(_))
        ));
        assert!(matches!(
            classify(r#"{"type":"vault_sync","data":{}}"#),
            Ok(Inbound::Message(_))
        ));
        assert!(classify("[1,2]").is_err());
        assert!(classify("not json").is_err());
        assert!(classify(r#"{"success":"yes"}"#).is_err());
    }

    #[test]
    fn test_response_from_body() {
        let wrapped = response_from_body("m1", Some(serde_json::json!({"status": "ok"}))).unwrap();
        assert_eq!(wrapped.id, "m1");
        assert_eq!(wrapped.payload, Some(serde_json::json!({"status": "ok"})));

        let failed = response_from_body(
            "m1",
            Some(serde_json::json!({"success": false, "error": "nope"})),
        )
        .unwrap();
        assert_eq!(failed.id, "m1");
        assert!(!failed.success);

        assert!(response_from_body("m1", Some(serde_json::json!({"id": "m2", "success": true}))).is_err());
        assert!(response_from_body("m1", None).unwrap().success);
    }

    #[tokio::test]
    async fn test_reply_message_resolves_pending() {
        let core = TransportCore::new(
            TransportKind::WebSocket,
            Duration::from_secs(1),
            CircuitBreakerConfig::default(),
        );
        let rx = core.pending().register("req-1").unwrap();
        let reply = Message::new("chat", serde_json::json!({"text": "hi"})).with_reply_to("req-1");

        assert!(route_to_pending(&core, Inbound::Message(reply)));
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.id, "req-1");
        assert_eq!(response.payload, Some(serde_json::json!({"text": "hi"})));
    }

    #[test]
    fn test_unmatched_message_emitted() {
        let core = TransportCore::new(
            TransportKind::WebSocket,
            Duration::from_secs(1),
            CircuitBreakerConfig::default(),
        );
        let mut messages = core.events().subscribe(TransportEvent::MESSAGE);
        let push = Message::new("vault_sync", serde_json::Value::Null);

        assert!(!route_to_pending(&core, Inbound::Message(push)));
        assert!(matches!(
            messages.try_recv(),
            Ok(TransportEvent::MessageReceived { .. })
        ));
    }
}
