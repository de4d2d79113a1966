// Backend contract for the hosted realtime document store.
//
// The application never owns chat state; it subscribes to collections the
// backend pushes and writes through to them. Everything here is the seam
// between the typed stores in `crate::chat` and that black-box service.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub mod memory;

pub use memory::{MemoryBackend, MemoryObjectStore};

/// Errors surfaced by backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    /// Referenced record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Underlying storage rejected the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record could not be encoded or decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

// Matches the bounded fan-out channels used throughout; a full channel
// drops the update rather than buffering unboundedly.
const SUBSCRIPTION_BUFFER: usize = 100;

/// Cancellation handle for a subscription. Cancelling is idempotent and
/// guarantees no further deliveries once it returns.
#[derive(Clone)]
pub struct Canceller {
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl Canceller {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Canceller {
            cancel: Arc::new(cancel),
        }
    }

    pub fn cancel(&self) {
        (self.cancel)();
    }
}

/// A live push subscription: the current state is delivered immediately,
/// then every subsequent change, FIFO, full state each time (no diffs).
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    canceller: Canceller,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::Receiver<T>, canceller: Canceller) -> Self {
        Subscription { rx, canceller }
    }

    /// Wait for the next delivery. Returns `None` once the subscription
    /// has been cancelled and the buffer drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Handle that detaches this subscription from its source. Dropping
    /// the subscription also ends delivery (the source prunes closed
    /// channels), but callers that hand the receiver elsewhere should
    /// keep a canceller and call it explicitly.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// View the remaining deliveries as a `futures` stream.
    pub fn into_stream(self) -> ReceiverStream<T> {
        ReceiverStream::new(self.rx)
    }
}

struct HubInner<T> {
    next_token: u64,
    subscribers: Vec<(u64, mpsc::Sender<T>)>,
}

/// Fan-out point for one watched collection. Subscribers get a bounded
/// channel; closed ones are pruned on the next publish.
pub struct SubscriptionHub<T> {
    inner: Arc<Mutex<HubInner<T>>>,
}

impl<T> Clone for SubscriptionHub<T> {
    fn clone(&self) -> Self {
        SubscriptionHub {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SubscriptionHub<T> {
    pub fn new() -> Self {
        SubscriptionHub {
            inner: Arc::new(Mutex::new(HubInner {
                next_token: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a subscriber and deliver `initial` to it before any
    /// published update can be observed.
    pub fn subscribe_with_initial(&self, initial: T) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        // Fresh channel, cannot be full or closed.
        let _ = tx.try_send(initial);

        let token = {
            let mut inner = self.inner.lock().unwrap();
            let token = inner.next_token;
            inner.next_token += 1;
            inner.subscribers.push((token, tx));
            token
        };

        let hub = self.inner.clone();
        let canceller = Canceller::new(move || {
            let mut inner = hub.lock().unwrap();
            inner.subscribers.retain(|(t, _)| *t != token);
        });

        Subscription::new(rx, canceller)
    }

    /// Push a new state to every live subscriber.
    pub fn publish(&self, value: T) {
        let mut inner = self.inner.lock().unwrap();
        let mut to_remove = Vec::new();

        for (i, (_, tx)) in inner.subscribers.iter().enumerate() {
            if let Err(e) = tx.try_send(value.clone()) {
                match e {
                    mpsc::error::TrySendError::Closed(_) => {
                        // Subscriber dropped without cancelling; prune it.
                        to_remove.push(i);
                    }
                    mpsc::error::TrySendError::Full(_) => {
                        warn!("Subscription channel full, dropping update");
                    }
                }
            }
        }

        for i in to_remove.into_iter().rev() {
            inner.subscribers.remove(i);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for SubscriptionHub<T> {
    fn default() -> Self {
        SubscriptionHub::new()
    }
}

/// Adapt a raw backend subscription into a typed one. Items the mapper
/// rejects are simply not forwarded. Cancelling the returned subscription
/// cancels the inner one.
pub(crate) fn map_subscription<A, B, F>(inner: Subscription<A>, f: F) -> Subscription<B>
where
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> Option<B> + Send + 'static,
{
    let canceller = inner.canceller();
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

    tokio::spawn(async move {
        let mut inner = inner;
        while let Some(item) = inner.recv().await {
            if let Some(mapped) = f(item) {
                if tx.send(mapped).await.is_err() {
                    break;
                }
            }
        }
        // Either side is gone; make sure the source stops delivering.
        inner.cancel();
    });

    Subscription::new(rx, canceller)
}

/// The hosted realtime store the chat layer subscribes to and writes
/// through. Records cross this boundary as untyped JSON documents; the
/// stores in `crate::chat` validate them on the way in.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Overwrite the presence record for a user. Last writer wins.
    async fn write_presence(&self, user_id: &str, doc: Value) -> Result<(), BackendError>;

    /// Watch one user's presence record. The initial delivery is the
    /// current record, or `Value::Null` when none exists yet.
    async fn watch_presence(&self, user_id: &str) -> Subscription<Value>;

    /// Insert a new conversation record under the given id.
    async fn insert_conversation(&self, id: &str, doc: Value) -> Result<(), BackendError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Value>, BackendError>;

    /// Overwrite an existing conversation record. Plain last-writer-wins;
    /// there is no version check or transaction.
    async fn update_conversation(&self, id: &str, doc: Value) -> Result<(), BackendError>;

    /// Watch the full conversation collection. Every change re-delivers
    /// the whole collection.
    async fn watch_conversations(&self) -> Subscription<Vec<Value>>;

    /// Append a message to a conversation's log. The backend assigns the
    /// timestamp (strictly increasing within the conversation) and
    /// returns the stored document.
    async fn append_message(&self, conversation_id: &str, doc: Value)
        -> Result<Value, BackendError>;

    /// Watch a conversation's ordered message log. Every append
    /// re-delivers the full sequence.
    async fn watch_messages(&self, conversation_id: &str) -> Subscription<Vec<Value>>;
}

/// Result of uploading an attachment to object storage.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub url: String,
    pub name: String,
    pub size: u64,
}

/// Opaque binary storage for image/file attachments. The chat layer only
/// ever records the metadata that comes back.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<StoredObject, BackendError>;
}
