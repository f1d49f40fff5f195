//! The duplex push channel.
//!
//! One WebSocket connection per [`ChannelManager`], shared through cheap
//! [`ChannelHandle`] clones. The only event is `"message"`, framed as
//! `{"event":"message","data":<payload>}` in both directions.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the single event carried on the channel.
pub const MESSAGE_EVENT: &str = "message";

/// Outgoing frames buffered ahead of the writer task.
const OUTGOING_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("push channel is unavailable")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChannelError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Decodes one inbound text frame into a `"message"` payload.
///
/// Frames naming another event yield `None`. Text that is not an event
/// frame is itself the payload; non-JSON text becomes a string payload.
pub fn decode_inbound(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.get("event").is_some_and(Value::is_string) => {
            match EventFrame::deserialize(&value) {
                Ok(frame) if frame.event == MESSAGE_EVENT => Some(frame.data),
                Ok(frame) => {
                    debug!(event = %frame.event, "ignoring channel event");
                    None
                }
                Err(_) => Some(value),
            }
        }
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(text.to_string())),
    }
}

/// Wraps a payload in a `"message"` event frame.
pub fn encode_outgoing(payload: &Value) -> String {
    json!({ "event": MESSAGE_EVENT, "data": payload }).to_string()
}

type Listener = Arc<dyn Fn(Value) + Send + Sync>;

struct Slot {
    id: u64,
    listener: Listener,
}

struct Inner {
    outgoing: mpsc::Sender<String>,
    slot: Mutex<Option<Slot>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl Inner {
    fn dispatch(&self, payload: Value) {
        let listener = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|slot| Arc::clone(&slot.listener));
        match listener {
            Some(listener) => listener(payload),
            None => debug!("no subscriber for channel message"),
        }
    }

    fn clear(&self, id: u64) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shared access to an open channel. Only [`ChannelManager`] opens or
/// closes it; everyone else sends and subscribes.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("open", &self.is_open())
            .finish()
    }
}

impl ChannelHandle {
    /// Splits the stream into a reader and a writer task.
    fn spawn<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
        let cancel = CancellationToken::new();
        let inner = Arc::new(Inner {
            outgoing,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            cancel: cancel.clone(),
        });

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                    frame = outgoing_rx.recv() => {
                        let Some(json) = frame else { break };
                        if let Err(e) = ws_write.send(tungstenite::Message::Text(json.into())).await {
                            warn!(error = %ChannelError::from_tungstenite(e), "channel write failed");
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
            debug!("channel writer stopped");
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = ws_read.next() => match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            let Some(payload) = decode_inbound(&text) else { continue };
                            let Some(inner) = weak.upgrade() else { break };
                            inner.dispatch(payload);
                        }
                        Some(Ok(tungstenite::Message::Close(_))) | None => {
                            info!("channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %ChannelError::from_tungstenite(e), "channel read failed");
                            break;
                        }
                    }
                }
            }
            cancel.cancel();
            debug!("channel reader stopped");
        });

        Self { inner }
    }

    /// Queues a `"message"` event. Fire-and-forget: failures are logged.
    pub fn send(&self, payload: &Value) {
        if !self.is_open() {
            debug!("channel closed, dropping outgoing message");
            return;
        }
        if let Err(e) = self.inner.outgoing.try_send(encode_outgoing(payload)) {
            warn!(error = %e, "failed to queue channel message");
        }
    }

    /// Installs `listener` for inbound payloads, replacing any previous one.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Slot {
                id,
                listener: Arc::new(listener),
            });
        if previous.is_some() {
            debug!("replaced channel subscriber");
        }
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    fn close(&self) {
        self.inner.cancel.cancel();
    }
}

/// Keeps a listener installed. Dropping it (or calling
/// [`Subscription::unsubscribe`]) removes the listener, unless a newer
/// subscription has already replaced it.
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    /// Same as dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.clear(self.id);
        }
    }
}

/// Owns the single duplex connection.
pub struct ChannelManager {
    url: String,
    handle: Option<ChannelHandle>,
}

impl ChannelManager {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handle: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connects, or returns the existing handle if the channel is still open.
    pub async fn open(&mut self) -> Result<ChannelHandle, ChannelError> {
        if let Some(handle) = &self.handle
            && handle.is_open()
        {
            return Ok(handle.clone());
        }
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(ChannelError::from_tungstenite)?;
        info!(url = %self.url, "channel open");
        let handle = ChannelHandle::spawn(ws_stream);
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    pub fn handle(&self) -> Option<&ChannelHandle> {
        self.handle.as_ref()
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
            info!(url = %self.url, "channel closed");
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close();
    }
}
