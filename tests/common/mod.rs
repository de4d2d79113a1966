// Common test utilities for integration tests
// This module contains shared code for all integration tests
#![allow(dead_code)]

// Standard library imports
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Once};

// External crate imports
use log::LevelFilter;
use tokio::time::{timeout, Duration};

// Import the crate functionality
use marketchat::backend::{MemoryBackend, MemoryObjectStore, Subscription};
use marketchat::chat::notify::{Notifier, OsNotification};
use marketchat::ChatClient;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";
pub const CAROL: &str = "carol";

/// A shared backend plus object store, standing in for the hosted
/// services both chat participants talk to.
pub struct TestRig {
    pub backend: Arc<MemoryBackend>,
    pub store: Arc<MemoryObjectStore>,
}

impl TestRig {
    pub fn new() -> Self {
        setup_logging();
        TestRig {
            backend: Arc::new(MemoryBackend::new()),
            store: Arc::new(MemoryObjectStore::new()),
        }
    }

    /// Backend whose server clock always reads `fixed_ms`. Timestamps
    /// within one conversation still increase; first messages of two
    /// different conversations land on the same tick.
    pub fn with_fixed_clock(fixed_ms: i64) -> Self {
        setup_logging();
        TestRig {
            backend: Arc::new(MemoryBackend::with_clock(Arc::new(move || fixed_ms))),
            store: Arc::new(MemoryObjectStore::new()),
        }
    }

    /// Backend whose server clock advances by 1ms per reading, starting
    /// at `start_ms`. Gives distinct, ordered timestamps without sleeps.
    pub fn with_ticking_clock(start_ms: i64) -> Self {
        setup_logging();
        let tick = AtomicI64::new(start_ms);
        TestRig {
            backend: Arc::new(MemoryBackend::with_clock(Arc::new(move || {
                tick.fetch_add(1, Ordering::SeqCst)
            }))),
            store: Arc::new(MemoryObjectStore::new()),
        }
    }

    /// A signed-in client for one user, sharing this rig's backend.
    pub fn client_for(&self, user_id: &str) -> ChatClient {
        ChatClient::new(self.backend.clone(), self.store.clone(), user_id)
    }
}

/// Display names used by most conversation fixtures.
pub fn buyer_vendor_names() -> HashMap<String, String> {
    let mut names = HashMap::new();
    names.insert(ALICE.to_string(), "Alice".to_string());
    names.insert(BOB.to_string(), "Bob's Woodshop".to_string());
    names
}

/// Wait for the next delivery on a subscription, failing the test if
/// nothing arrives in time.
pub async fn recv_next<T>(sub: &mut Subscription<T>) -> T {
    timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("Timed out waiting for a subscription delivery")
        .expect("Subscription closed unexpectedly")
}

/// Assert that a subscription delivers nothing further and then closes.
/// Buffered deliveries from before the cancellation are drained first.
pub async fn drain_to_close<T>(sub: &mut Subscription<T>) {
    loop {
        match timeout(Duration::from_millis(500), sub.recv()).await {
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(_) => panic!("Subscription still open after cancellation"),
        }
    }
}

/// Give spawned watcher tasks a moment to wire themselves up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Notification surface that records everything it is asked to show.
pub struct RecordingNotifier {
    permission: bool,
    toasts: Mutex<Vec<String>>,
    notifications: Mutex<Vec<OsNotification>>,
}

impl RecordingNotifier {
    pub fn new(permission: bool) -> Arc<Self> {
        Arc::new(RecordingNotifier {
            permission,
            toasts: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
        })
    }

    pub fn toasts(&self) -> Vec<String> {
        self.toasts.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<OsNotification> {
        self.notifications.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn request_permission(&self) -> bool {
        self.permission
    }

    fn toast(&self, text: &str) {
        self.toasts.lock().unwrap().push(text.to_string());
    }

    fn notify(&self, notification: &OsNotification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }
}
