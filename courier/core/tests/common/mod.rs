//! Shared fixtures for the integration tests
//!
//! Everything here goes through the public API: a scripted
//! [`RequestChannel`] for the HTTP transport and a peer task that answers
//! request files for the file-exchange transport.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use courier_core::transport::channel::{ChannelReply, EventStream, FileStore, RequestChannel};
use courier_core::transport::LocalFileStore;
use courier_core::{
    FileExchangeConfig, FileExchangeTransport, HttpConfig, HttpTransport, Message, Transport,
    TransportError,
};

/// How the scripted server answers a post
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    /// 200 with a response echoing the payload
    Echo,
    /// The given status and no body
    Status(u16),
    /// 202; the answer, if any, comes on the event stream
    Accept,
}

/// HTTP server stand-in
pub struct ScriptedChannel {
    reply: Mutex<Reply>,
    healthy: AtomicBool,
    posts: AtomicUsize,
    posted_ids: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<String, TransportError>>>>,
}

impl ScriptedChannel {
    /// Echoing server without an event stream
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            healthy: AtomicBool::new(true),
            posts: AtomicUsize::new(0),
            posted_ids: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    /// Server plus the sending side of its event stream
    pub fn with_events(
        reply: Reply,
    ) -> (Arc<Self>, mpsc::UnboundedSender<Result<String, TransportError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self::new(reply);
        *channel.events.lock() = Some(rx);
        (channel, tx)
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub fn posted_ids(&self) -> Vec<String> {
        self.posted_ids.lock().clone()
    }
}

#[async_trait]
impl RequestChannel for ScriptedChannel {
    async fn get(&self, _path: &str, _timeout: Duration) -> Result<ChannelReply, TransportError> {
        let status = if self.healthy.load(Ordering::SeqCst) { 200 } else { 503 };
        Ok(ChannelReply { status, body: None })
    }

    async fn post_json(
        &self,
        _path: &str,
        body: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<ChannelReply, TransportError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        if let Some(id) = body["id"].as_str() {
            self.posted_ids.lock().push(id.to_string());
        }
        let reply = *self.reply.lock();
        Ok(match reply {
            Reply::Echo => ChannelReply {
                status: 200,
                body: Some(serde_json::json!({
                    "id": body["id"],
                    "success": true,
                    "payload": {"via": "http", "echo": body["payload"]},
                })),
            },
            Reply::Status(status) => ChannelReply { status, body: None },
            Reply::Accept => ChannelReply {
                status: 202,
                body: None,
            },
        })
    }

    async fn open_events(&self, _path: &str) -> Result<EventStream, TransportError> {
        match self.events.lock().take() {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Err(TransportError::ConnectionFailed("no event stream".into())),
        }
    }
}

/// HTTP transport on a scripted channel; event stream only when `events`
pub fn http_transport(channel: Arc<ScriptedChannel>, events: bool) -> Arc<HttpTransport> {
    let config = if events {
        HttpConfig::for_testing()
    } else {
        HttpConfig::for_testing().without_events()
    };
    Arc::new(HttpTransport::with_channel(config, channel))
}

/// Initialized and connected HTTP transport
pub async fn connected_http(channel: Arc<ScriptedChannel>, events: bool) -> Arc<HttpTransport> {
    let transport = http_transport(channel, events);
    transport.initialize().await.unwrap();
    transport.connect().await.unwrap();
    transport
}

/// File-exchange transport rooted at `dir`
pub fn file_exchange(dir: &Path) -> Arc<FileExchangeTransport> {
    Arc::new(FileExchangeTransport::new(
        FileExchangeConfig::for_testing().with_exchange_dir(dir),
    ))
}

/// Peer process stand-in: answers every request file until aborted
pub fn spawn_exchange_peer(dir: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let store = LocalFileStore;
        let requests = dir.join("requests");
        let responses = dir.join("responses");
        loop {
            let listed = store.list(&requests).await.unwrap_or_default();
            for path in listed {
                let Ok(Some(bytes)) = store.read(&path).await else {
                    continue;
                };
                let Ok(request) = serde_json::from_slice::<Message>(&bytes) else {
                    continue;
                };
                let Some(name) = path.file_name() else {
                    continue;
                };
                let answer = serde_json::json!({
                    "id": request.id,
                    "success": true,
                    "payload": {"via": "file_exchange", "echo": request.payload},
                });
                let _ = store.remove(&path).await;
                let _ = store
                    .write(&responses.join(name), answer.to_string().as_bytes())
                    .await;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    check()
}

pub fn as_dyn<T: Transport + 'static>(transport: &Arc<T>) -> Arc<dyn Transport> {
    Arc::clone(transport) as Arc<dyn Transport>
}
