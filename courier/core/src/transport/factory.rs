//! Transport Factory
//!
//! Builds transport instances from configuration so hosts never name the
//! concrete types.

use std::sync::Arc;

use super::file_exchange::FileExchangeTransport;
use super::http::HttpTransport;
use super::traits::Transport;
use super::types::TransportKind;
use super::websocket::WebSocketTransport;
use crate::config::CourierConfig;

/// Create the transport of `kind` with its default host primitive
///
/// Nothing is validated or opened here; that happens in `initialize` and
/// `connect`.
#[must_use]
pub fn create_transport(kind: TransportKind, config: &CourierConfig) -> Arc<dyn Transport> {
    match kind {
        TransportKind::Http => Arc::new(HttpTransport::new(config.http.clone())),
        TransportKind::WebSocket => Arc::new(WebSocketTransport::new(config.websocket.clone())),
        TransportKind::FileExchange => {
            Arc::new(FileExchangeTransport::new(config.file_exchange.clone()))
        }
    }
}

/// Create every transport listed in `manager.enabled`, in that order
#[must_use]
pub fn create_transports(config: &CourierConfig) -> Vec<Arc<dyn Transport>> {
    config
        .manager
        .enabled
        .iter()
        .map(|kind| create_transport(*kind, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_each_kind() {
        let config = CourierConfig::default();
        for kind in TransportKind::ALL {
            let transport = create_transport(kind, &config);
            assert_eq!(transport.kind(), kind);
            assert!(!transport.is_available());
        }
    }

    #[test]
    fn test_enabled_list_respected() {
        let mut config = CourierConfig::default();
        config.manager.enabled = vec![TransportKind::Http];
        let transports = create_transports(&config);
        assert_eq!(transports.len(), 1);
        assert_eq!(transports[0].kind(), TransportKind::Http);
    }
}
