// The chat layer: typed stores over the backend contract, plus the
// per-session client that bundles them for one signed-in user.

use std::sync::Arc;

use anyhow::Result;

use crate::backend::{ChatBackend, ObjectStore};

pub mod directory;
pub mod messages;
pub mod notify;
pub mod presence;

pub use directory::ConversationDirectory;
pub use messages::{search_messages, MessageStream};
pub use notify::{
    DispatcherHandle, LogNotifier, Notifier, NotificationDispatcher, OsNotification,
};
pub use presence::{last_seen_label, presence_label, PresenceStore};

/// Everything one signed-in user needs: presence, the conversation
/// directory, and message streams, all over a shared backend handle.
pub struct ChatClient {
    user_id: String,
    backend: Arc<dyn ChatBackend>,
    pub presence: PresenceStore,
    pub directory: ConversationDirectory,
    pub messages: MessageStream,
}

impl ChatClient {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn ObjectStore>,
        user_id: impl Into<String>,
    ) -> Self {
        ChatClient {
            user_id: user_id.into(),
            presence: PresenceStore::new(backend.clone()),
            directory: ConversationDirectory::new(backend.clone()),
            messages: MessageStream::new(backend.clone(), store),
            backend,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Heartbeat: mark this user online now.
    pub async fn go_online(&self) -> Result<()> {
        self.presence.set_status(&self.user_id, true).await
    }

    /// Mark this user offline, recording the time they were last seen.
    pub async fn go_offline(&self) -> Result<()> {
        self.presence.set_status(&self.user_id, false).await
    }

    /// Start the notification dispatcher for this session.
    pub async fn spawn_notifications(&self, notifier: Arc<dyn Notifier>) -> DispatcherHandle {
        NotificationDispatcher::new(self.backend.clone(), notifier, self.user_id.clone())
            .run()
            .await
    }
}
