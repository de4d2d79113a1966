// In-memory stand-in for the hosted realtime store. Used by the test
// suite and local development; the production app points the same traits
// at the real backend SDK.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::backend::{
    BackendError, ChatBackend, ObjectStore, StoredObject, Subscription, SubscriptionHub,
};
use crate::utils::now_millis;

/// Source of server timestamps; swappable so tests can pin the tick.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

struct State {
    presence: HashMap<String, Value>,
    conversations: HashMap<String, Value>,
    // Insertion order; conversation snapshots are delivered in this order.
    conversation_order: Vec<String>,
    messages: HashMap<String, Vec<Value>>,
    // Last server-assigned timestamp per conversation log.
    last_timestamp: HashMap<String, i64>,
    presence_hubs: HashMap<String, SubscriptionHub<Value>>,
    conversation_hub: SubscriptionHub<Vec<Value>>,
    message_hubs: HashMap<String, SubscriptionHub<Vec<Value>>>,
}

pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    clock: Clock,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::with_clock(Arc::new(now_millis))
    }

    /// Build a backend with an injected clock for server timestamps.
    /// Tests use this to pin the wall-clock tick.
    pub fn with_clock(clock: Clock) -> Self {
        MemoryBackend {
            state: Arc::new(Mutex::new(State {
                presence: HashMap::new(),
                conversations: HashMap::new(),
                conversation_order: Vec::new(),
                messages: HashMap::new(),
                last_timestamp: HashMap::new(),
                presence_hubs: HashMap::new(),
                conversation_hub: SubscriptionHub::new(),
                message_hubs: HashMap::new(),
            })),
            clock,
        }
    }

    fn conversation_snapshot(state: &State) -> Vec<Value> {
        state
            .conversation_order
            .iter()
            .filter_map(|id| state.conversations.get(id))
            .cloned()
            .collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn write_presence(&self, user_id: &str, doc: Value) -> Result<(), BackendError> {
        let hub = {
            let mut state = self.state.lock().unwrap();
            state.presence.insert(user_id.to_string(), doc.clone());
            state.presence_hubs.get(user_id).cloned()
        };
        if let Some(hub) = hub {
            hub.publish(doc);
        }
        Ok(())
    }

    async fn watch_presence(&self, user_id: &str) -> Subscription<Value> {
        let (hub, initial) = {
            let mut state = self.state.lock().unwrap();
            let initial = state
                .presence
                .get(user_id)
                .cloned()
                .unwrap_or(Value::Null);
            let hub = state
                .presence_hubs
                .entry(user_id.to_string())
                .or_insert_with(SubscriptionHub::new)
                .clone();
            (hub, initial)
        };
        hub.subscribe_with_initial(initial)
    }

    async fn insert_conversation(&self, id: &str, doc: Value) -> Result<(), BackendError> {
        let (hub, snapshot) = {
            let mut state = self.state.lock().unwrap();
            if state.conversations.contains_key(id) {
                return Err(BackendError::Storage(format!(
                    "Conversation {} already exists",
                    id
                )));
            }
            state.conversations.insert(id.to_string(), doc);
            state.conversation_order.push(id.to_string());
            (state.conversation_hub.clone(), Self::conversation_snapshot(&state))
        };
        debug!("Inserted conversation {}", id);
        hub.publish(snapshot);
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Value>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state.conversations.get(id).cloned())
    }

    async fn update_conversation(&self, id: &str, doc: Value) -> Result<(), BackendError> {
        let (hub, snapshot) = {
            let mut state = self.state.lock().unwrap();
            if !state.conversations.contains_key(id) {
                return Err(BackendError::NotFound(format!("conversation {}", id)));
            }
            state.conversations.insert(id.to_string(), doc);
            (state.conversation_hub.clone(), Self::conversation_snapshot(&state))
        };
        hub.publish(snapshot);
        Ok(())
    }

    async fn watch_conversations(&self) -> Subscription<Vec<Value>> {
        let (hub, snapshot) = {
            let state = self.state.lock().unwrap();
            (state.conversation_hub.clone(), Self::conversation_snapshot(&state))
        };
        hub.subscribe_with_initial(snapshot)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        mut doc: Value,
    ) -> Result<Value, BackendError> {
        let (hub, log) = {
            let mut state = self.state.lock().unwrap();

            // Server-assigned timestamp, strictly increasing within the
            // conversation's log even when the clock does not move.
            let last = state
                .last_timestamp
                .get(conversation_id)
                .copied()
                .unwrap_or(0);
            let assigned = (self.clock)().max(last + 1);
            state
                .last_timestamp
                .insert(conversation_id.to_string(), assigned);

            match doc.as_object_mut() {
                Some(fields) => {
                    fields.insert("timestamp".to_string(), json!(assigned));
                }
                None => {
                    return Err(BackendError::Storage(
                        "Message document is not an object".to_string(),
                    ));
                }
            }

            let log = state
                .messages
                .entry(conversation_id.to_string())
                .or_default();
            log.push(doc.clone());
            let snapshot = log.clone();

            let hub = state
                .message_hubs
                .entry(conversation_id.to_string())
                .or_insert_with(SubscriptionHub::new)
                .clone();
            (hub, snapshot)
        };
        hub.publish(log);
        Ok(doc)
    }

    async fn watch_messages(&self, conversation_id: &str) -> Subscription<Vec<Value>> {
        let (hub, initial) = {
            let mut state = self.state.lock().unwrap();
            let initial = state
                .messages
                .get(conversation_id)
                .cloned()
                .unwrap_or_default();
            let hub = state
                .message_hubs
                .entry(conversation_id.to_string())
                .or_insert_with(SubscriptionHub::new)
                .clone();
            (hub, initial)
        };
        hub.subscribe_with_initial(initial)
    }
}

/// In-memory object storage; uploads land in a map keyed by a generated
/// URL, which is all the chat layer ever sees of them.
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        MemoryObjectStore {
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        MemoryObjectStore::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<StoredObject, BackendError> {
        let url = format!("memstore://uploads/{}/{}", Uuid::new_v4(), name);
        self.objects
            .lock()
            .unwrap()
            .insert(url.clone(), bytes.to_vec());
        debug!("Uploaded {} ({} bytes) to {}", name, bytes.len(), url);
        Ok(StoredObject {
            url,
            name: name.to_string(),
            size: bytes.len() as u64,
        })
    }
}
