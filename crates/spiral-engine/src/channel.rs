//! Async channels (spec.md §4.5) and the registry that hands out opaque
//! channel handles, in the same spirit as `seq-runtime::channel` — a
//! process-wide table keyed by an atomically generated id, guarded by a
//! single mutex, behind a small handle type.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use spiral_value::{ChannelId, SpiralError, Value};
use tokio::sync::{oneshot, Mutex};

struct PendingSender {
    value: Value,
    completion: oneshot::Sender<Result<(), SpiralError>>,
}

struct PendingReceiver {
    completion: oneshot::Sender<Result<Value, SpiralError>>,
}

struct Inner {
    buffer: VecDeque<Value>,
    capacity: usize,
    closed: bool,
    waiting_senders: VecDeque<PendingSender>,
    waiting_receivers: VecDeque<PendingReceiver>,
}

/// One channel's state machine (spec.md §4.5's buffer / waiting-senders /
/// waiting-receivers / closed-flag description).
pub struct AsyncChannel {
    id: ChannelId,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for AsyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncChannel").field("id", &self.id).finish()
    }
}

impl AsyncChannel {
    fn new(id: ChannelId, capacity: usize) -> Self {
        AsyncChannel {
            id,
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                capacity,
                closed: false,
                waiting_senders: VecDeque::new(),
                waiting_receivers: VecDeque::new(),
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub async fn send(&self, value: Value) -> Result<(), SpiralError> {
        let mut inner = self.inner.lock().await;
        if let Some(receiver) = inner.waiting_receivers.pop_front() {
            let _ = receiver.completion.send(Ok(value));
            return Ok(());
        }
        if inner.closed {
            return Err(SpiralError::channel_closed());
        }
        if inner.buffer.len() < inner.capacity {
            inner.buffer.push_back(value);
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        inner.waiting_senders.push_back(PendingSender { value, completion: tx });
        drop(inner);
        rx.await.unwrap_or_else(|_| Err(SpiralError::channel_closed()))
    }

    pub async fn recv(&self) -> Result<Value, SpiralError> {
        let mut inner = self.inner.lock().await;
        if let Some(value) = inner.buffer.pop_front() {
            Self::promote_one_sender(&mut inner);
            return Ok(value);
        }
        if let Some(sender) = inner.waiting_senders.pop_front() {
            let _ = sender.completion.send(Ok(()));
            return Ok(sender.value);
        }
        if inner.closed {
            return Err(SpiralError::channel_closed());
        }
        let (tx, rx) = oneshot::channel();
        inner.waiting_receivers.push_back(PendingReceiver { completion: tx });
        drop(inner);
        rx.await.unwrap_or_else(|_| Err(SpiralError::channel_closed()))
    }

    pub async fn try_send(&self, value: Value) -> Result<bool, SpiralError> {
        let mut inner = self.inner.lock().await;
        if let Some(receiver) = inner.waiting_receivers.pop_front() {
            let _ = receiver.completion.send(Ok(value));
            return Ok(true);
        }
        if inner.closed {
            return Err(SpiralError::channel_closed());
        }
        if inner.buffer.len() < inner.capacity {
            inner.buffer.push_back(value);
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn try_recv(&self) -> Result<Option<Value>, SpiralError> {
        let mut inner = self.inner.lock().await;
        if let Some(value) = inner.buffer.pop_front() {
            Self::promote_one_sender(&mut inner);
            return Ok(Some(value));
        }
        if let Some(sender) = inner.waiting_senders.pop_front() {
            let _ = sender.completion.send(Ok(()));
            return Ok(Some(sender.value));
        }
        if inner.closed {
            return Ok(None);
        }
        Ok(None)
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        for sender in inner.waiting_senders.drain(..) {
            let _ = sender.completion.send(Err(SpiralError::channel_closed()));
        }
        for receiver in inner.waiting_receivers.drain(..) {
            let _ = receiver.completion.send(Err(SpiralError::channel_closed()));
        }
    }

    /// After a buffered value is dequeued, a waiting sender (if any) has its
    /// value promoted into the now-free slot and is woken (spec.md §4.5:
    /// "if a sender was waiting, promote its value into the buffer and wake
    /// it").
    fn promote_one_sender(inner: &mut Inner) {
        if let Some(sender) = inner.waiting_senders.pop_front() {
            inner.buffer.push_back(sender.value);
            let _ = sender.completion.send(Ok(()));
        }
    }
}

/// Process-wide channel table, the same registry-behind-a-mutex shape
/// used for FFI channel handles elsewhere in this codebase.
#[derive(Clone, Default)]
pub struct ChannelStore {
    channels: Arc<std::sync::Mutex<HashMap<ChannelId, Arc<AsyncChannel>>>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        ChannelStore::default()
    }

    pub fn create(&self, capacity: usize) -> Arc<AsyncChannel> {
        let id = ChannelId::fresh();
        let channel = Arc::new(AsyncChannel::new(id, capacity));
        self.channels.lock().unwrap().insert(id, channel.clone());
        channel
    }

    pub fn get(&self, id: ChannelId) -> Option<Arc<AsyncChannel>> {
        self.channels.lock().unwrap().get(&id).cloned()
    }
}

/// Builds the opaque handle value returned by `channel(bufferSize?)`.
pub fn channel_handle(channel: &Arc<AsyncChannel>) -> Value {
    Value::Opaque {
        tag: Arc::from("channel"),
        payload: Arc::new(channel.clone()),
    }
}

/// Recovers the channel a handle value refers to.
pub fn channel_from_value(value: &Value) -> Result<Arc<AsyncChannel>, SpiralError> {
    match value {
        Value::Opaque { tag, payload } if tag.as_ref() == "channel" => payload
            .as_any()
            .downcast_ref::<Arc<AsyncChannel>>()
            .cloned()
            .ok_or_else(|| SpiralError::type_error("opaque value is not a channel handle")),
        other => Err(SpiralError::type_error(format!(
            "expected a channel handle, found {}",
            other.type_tag()
        ))),
    }
}
