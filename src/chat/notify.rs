// Notification dispatch: one loop per session that watches every
// conversation the user participates in and raises toasts plus, when the
// app is backgrounded, OS notifications.
//
// The last-notified watermark is a single scalar shared across all
// conversations. Messages from two conversations landing in the same
// tick with equal timestamps can therefore suppress one another; that is
// the observed behavior of the feature and is pinned by the tests, not
// fixed here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{Canceller, ChatBackend, Subscription};
use crate::models::{ChatMessage, Conversation, MessageKind, UNKNOWN_USER};
use crate::utils::now_millis;

/// An OS-level notification. Duplicate delivery of the same `tag` is
/// suppressed by the OS notification surface, not by us.
#[derive(Debug, Clone)]
pub struct OsNotification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub tag: String,
}

/// The platform notification surface. Permission is requested once per
/// session, best effort; without it the dispatcher degrades to in-app
/// toasts only.
pub trait Notifier: Send + Sync {
    fn request_permission(&self) -> bool;
    fn toast(&self, text: &str);
    fn notify(&self, notification: &OsNotification);
}

/// Fallback notifier that only writes to the log. Used where no platform
/// surface is wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn request_permission(&self) -> bool {
        false
    }

    fn toast(&self, text: &str) {
        info!("[toast] {}", text);
    }

    fn notify(&self, notification: &OsNotification) {
        info!(
            "[notification {}] {}: {}",
            notification.tag, notification.title, notification.body
        );
    }
}

/// Session-scoped dispatcher context. Construct at sign-in, `run` it,
/// and stop the returned handle at sign-out.
pub struct NotificationDispatcher {
    user_id: String,
    backend: Arc<dyn ChatBackend>,
    notifier: Arc<dyn Notifier>,
    foreground: Arc<AtomicBool>,
    last_notified: i64,
}

/// Controls a running dispatcher: foreground visibility and shutdown.
pub struct DispatcherHandle {
    cancellers: Arc<Mutex<Vec<Canceller>>>,
    foreground: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Mirror document visibility; OS notifications only fire while the
    /// app is backgrounded.
    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    /// Cancel every subscription the dispatcher holds. The dispatch loop
    /// winds down on its own afterwards.
    pub fn stop(&self) {
        for canceller in self.cancellers.lock().unwrap().iter() {
            canceller.cancel();
        }
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.join.await;
    }
}

impl NotificationDispatcher {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        notifier: Arc<dyn Notifier>,
        user_id: impl Into<String>,
    ) -> Self {
        NotificationDispatcher {
            user_id: user_id.into(),
            backend,
            notifier,
            // Sessions start foregrounded.
            foreground: Arc::new(AtomicBool::new(true)),
            // Baseline at session start so replayed history stays quiet.
            last_notified: now_millis(),
        }
    }

    /// Start the dispatch loop. The loop watches the conversation
    /// directory, keeps one message watcher per conversation, and runs
    /// until the handle stops it.
    pub async fn run(self) -> DispatcherHandle {
        let permitted = self.notifier.request_permission();
        if !permitted {
            info!("Notification permission unavailable, toasts only for this session");
        }

        let foreground = self.foreground.clone();
        let cancellers: Arc<Mutex<Vec<Canceller>>> = Arc::new(Mutex::new(Vec::new()));

        let conversation_sub = self.backend.watch_conversations().await;
        cancellers.lock().unwrap().push(conversation_sub.canceller());

        let registry = cancellers.clone();
        let join = tokio::spawn(async move {
            self.dispatch(conversation_sub, registry, permitted).await;
        });

        DispatcherHandle {
            cancellers,
            foreground,
            join,
        }
    }

    async fn dispatch(
        self,
        mut conversation_sub: Subscription<Vec<Value>>,
        cancellers: Arc<Mutex<Vec<Canceller>>>,
        permitted: bool,
    ) {
        // Fan-in of every per-conversation message watcher.
        let (fan_tx, mut fan_rx) = mpsc::channel::<(String, Vec<Value>)>(100);
        let mut watchers: HashMap<String, Canceller> = HashMap::new();
        let mut conversations: HashMap<String, Conversation> = HashMap::new();
        let mut last_notified = self.last_notified;

        loop {
            tokio::select! {
                update = conversation_sub.recv() => {
                    match update {
                        Some(docs) => {
                            self.reconcile_watchers(
                                &docs,
                                &mut conversations,
                                &mut watchers,
                                &cancellers,
                                &fan_tx,
                            ).await;
                        }
                        None => break,
                    }
                }
                batch = fan_rx.recv() => {
                    if let Some((conversation_id, docs)) = batch {
                        last_notified = self.handle_batch(
                            &conversations,
                            &conversation_id,
                            &docs,
                            last_notified,
                            permitted,
                        );
                    }
                }
            }
        }

        for canceller in watchers.values() {
            canceller.cancel();
        }
        debug!("Notification dispatcher for {} stopped", self.user_id);
    }

    /// Spawn a message watcher for every conversation of ours that does
    /// not have one yet. Watchers are never torn down individually;
    /// conversations are never deleted upstream.
    async fn reconcile_watchers(
        &self,
        docs: &[Value],
        conversations: &mut HashMap<String, Conversation>,
        watchers: &mut HashMap<String, Canceller>,
        cancellers: &Arc<Mutex<Vec<Canceller>>>,
        fan_tx: &mpsc::Sender<(String, Vec<Value>)>,
    ) {
        for doc in docs {
            let conversation = match Conversation::from_doc(doc) {
                Some(c) => c,
                None => continue,
            };
            if !conversation.has_participant(&self.user_id) {
                continue;
            }
            let id = conversation.id.clone();
            conversations.insert(id.clone(), conversation);

            if watchers.contains_key(&id) {
                continue;
            }
            let mut sub = self.backend.watch_messages(&id).await;
            watchers.insert(id.clone(), sub.canceller());
            cancellers.lock().unwrap().push(sub.canceller());

            let tx = fan_tx.clone();
            let conversation_id = id.clone();
            tokio::spawn(async move {
                while let Some(batch) = sub.recv().await {
                    if tx.send((conversation_id.clone(), batch)).await.is_err() {
                        break;
                    }
                }
                sub.cancel();
            });
            debug!("Watching messages for conversation {}", id);
        }
    }

    /// Process one delivered message snapshot, raising notifications for
    /// anything newer than the shared watermark.
    fn handle_batch(
        &self,
        conversations: &HashMap<String, Conversation>,
        conversation_id: &str,
        docs: &[Value],
        last_notified: i64,
        permitted: bool,
    ) -> i64 {
        let mut watermark = last_notified;
        for doc in docs {
            let message = match ChatMessage::from_doc(doc) {
                Some(m) => m,
                None => continue,
            };
            if message.sender_id == self.user_id || message.timestamp <= watermark {
                continue;
            }

            let title = conversations
                .get(conversation_id)
                .map(|c| c.display_name(&message.sender_id).to_string())
                .unwrap_or_else(|| UNKNOWN_USER.to_string());
            let body = match message.kind {
                MessageKind::Text => message.content.clone(),
                MessageKind::Image => "Sent a photo".to_string(),
                MessageKind::File => match &message.file_name {
                    Some(name) => format!("Sent a file: {}", name),
                    None => "Sent a file".to_string(),
                },
            };

            self.notifier.toast(&format!("{}: {}", title, body));
            if !self.foreground.load(Ordering::SeqCst) {
                if permitted {
                    self.notifier.notify(&OsNotification {
                        title,
                        body,
                        icon: None,
                        tag: message.id.clone(),
                    });
                } else {
                    warn!("Backgrounded without notification permission, toast only");
                }
            }

            watermark = message.timestamp;
        }
        watermark
    }
}
