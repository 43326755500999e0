//! Host Channel Primitives
//!
//! The three capabilities the host environment supplies to transports:
//!
//! - [`RequestChannel`]: a request/response call plus an optional server
//!   event stream (HTTP)
//! - [`StreamConnector`]: a persistent bidirectional text-frame connection
//!   (WebSocket)
//! - [`FileStore`]: a readable, writable, listable file store
//!
//! Transports depend only on these traits. Default implementations live next
//! to each transport (`ReqwestChannel`, `TungsteniteConnector`,
//! `LocalFileStore`); tests substitute in-memory fakes.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Sink;

use super::traits::TransportError;

// ============================================================================
// Request/Response
// ============================================================================

/// Status and decoded body of one request
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelReply {
    /// HTTP-style status code
    pub status: u16,
    /// JSON body, if the reply had one
    pub body: Option<serde_json::Value>,
}

impl ChannelReply {
    /// 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Stream of server event payloads (`data:` fields)
pub type EventStream = BoxStream<'static, Result<String, TransportError>>;

/// Request/response primitive
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// `GET path`
    async fn get(&self, path: &str, timeout: Duration) -> Result<ChannelReply, TransportError>;

    /// `POST path` with a JSON body
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ChannelReply, TransportError>;

    /// Open the server event stream at `path`
    async fn open_events(&self, path: &str) -> Result<EventStream, TransportError>;
}

// ============================================================================
// Persistent Connection
// ============================================================================

/// Outbound half of a persistent connection
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a persistent connection; ends when the peer closes
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// An open persistent connection
pub struct StreamPair {
    /// Frames to the peer
    pub sink: FrameSink,
    /// Frames from the peer
    pub stream: FrameStream,
}

impl std::fmt::Debug for StreamPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPair").finish_non_exhaustive()
    }
}

/// Persistent bidirectional connection primitive
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a connection to `url`
    async fn open(&self, url: &str) -> Result<StreamPair, TransportError>;
}

// ============================================================================
// File Store
// ============================================================================

/// Readable, writable, listable file store
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Create a directory and its parents
    async fn create_dir_all(&self, dir: &Path) -> io::Result<()>;

    /// Write a whole file; readers never observe partial content
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Read a whole file, `None` if it does not exist
    async fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    /// Remove a file; missing files are not an error
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Files directly inside `dir`, sorted by name
    async fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
}
