//! Transport - framed, full-duplex message channel
//!
//! The connection only needs three things from a channel: send one frame,
//! receive one frame within a bounded wait, close. Everything else
//! (correlation, routing) lives above this seam.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{CDPError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one complete frame. Concurrent senders are serialized per frame.
    ///
    /// Callers bound the wait and may drop the future before it completes.
    async fn send(&self, frame: String) -> Result<()>;

    /// Wait at most `wait` for the next frame
    ///
    /// `Ok(None)` means nothing arrived in time. Any `Err` is fatal for the
    /// channel, including an orderly close by the remote end.
    async fn recv(&self, wait: Duration) -> Result<Option<String>>;

    async fn close(&self) -> Result<()>;
}

/// WebSocket channel to a single target
pub struct WebSocketTransport {
    url: String,
    /// Write half, locked per frame
    sink: Mutex<SplitSink<WsStream, Message>>,
    /// Read half, only the receiver loop touches it
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                CDPError::transport(format!(
                    "connecting to {} timed out after {:?}",
                    url, connect_timeout
                ))
            })??;
        let (sink, stream) = ws_stream.split();
        tracing::debug!("WebSocket connected: {}", url);

        Ok(Self {
            url: url.to_string(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn recv(&self, wait: Duration) -> Result<Option<String>> {
        let mut stream = self.stream.lock().await;
        let next = match tokio::time::timeout(wait, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(None),
        };

        match next {
            Some(Ok(Message::Text(text))) => Ok(Some(text)),
            Some(Ok(Message::Binary(bytes))) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| CDPError::transport(format!("non UTF-8 binary frame: {}", e))),
            Some(Ok(Message::Close(frame))) => Err(CDPError::transport(format!(
                "closed by remote: {:?}",
                frame
            ))),
            // Ping/Pong are answered by tungstenite itself
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => Err(e.into()),
            None => Err(CDPError::transport("stream ended")),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport

    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    type Responder = Box<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

    pub(crate) struct MockTransport {
        sent: SyncMutex<Vec<Value>>,
        inbound_tx: mpsc::UnboundedSender<Result<String>>,
        inbound_rx: Mutex<mpsc::UnboundedReceiver<Result<String>>>,
        responder: Option<Responder>,
        closed: AtomicBool,
        stalled: AtomicBool,
        rejecting: AtomicBool,
    }

    impl MockTransport {
        /// Transport that never answers on its own
        pub(crate) fn silent() -> Self {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            Self {
                sent: SyncMutex::new(Vec::new()),
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                responder: None,
                closed: AtomicBool::new(false),
                stalled: AtomicBool::new(false),
                rejecting: AtomicBool::new(false),
            }
        }

        /// Transport that answers every sent request with the frames `f` returns
        pub(crate) fn replying(f: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) -> Self {
            Self {
                responder: Some(Box::new(f)),
                ..Self::silent()
            }
        }

        /// Queue an inbound frame
        pub(crate) fn push(&self, frame: Value) {
            let _ = self.inbound_tx.send(Ok(frame.to_string()));
        }

        pub(crate) fn push_raw(&self, frame: &str) {
            let _ = self.inbound_tx.send(Ok(frame.to_string()));
        }

        /// Make the next read fail as if the socket was reset
        pub(crate) fn fail(&self) {
            let _ = self
                .inbound_tx
                .send(Err(CDPError::transport("connection reset by peer")));
        }

        /// From now on sends and closes never complete, like a peer that
        /// stopped reading
        pub(crate) fn stall(&self) {
            self.stalled.store(true, Ordering::SeqCst);
        }

        /// From now on every send fails
        pub(crate) fn reject_sends(&self) {
            self.rejecting.store(true, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<Value> {
            self.sent.lock().clone()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, frame: String) -> Result<()> {
            if self.stalled.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            if self.rejecting.load(Ordering::SeqCst) {
                return Err(CDPError::transport("broken pipe"));
            }
            if self.is_closed() {
                return Err(CDPError::transport("send on closed transport"));
            }
            let value: Value = serde_json::from_str(&frame)?;
            if let Some(responder) = &self.responder {
                for reply in responder(&value) {
                    self.push(reply);
                }
            }
            self.sent.lock().push(value);
            Ok(())
        }

        async fn recv(&self, wait: Duration) -> Result<Option<String>> {
            if self.is_closed() {
                return Err(CDPError::transport("closed"));
            }
            let mut rx = self.inbound_rx.lock().await;
            match tokio::time::timeout(wait, rx.recv()).await {
                Err(_) => Ok(None),
                Ok(Some(frame)) => frame.map(Some),
                Ok(None) => Err(CDPError::transport("closed")),
            }
        }

        async fn close(&self) -> Result<()> {
            if self.stalled.load(Ordering::SeqCst) {
                return std::future::pending().await;
            }
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
