// Conversation directory: the per-user inbox view of the conversation
// collection, plus creation of new two-party conversations.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info};
use uuid::Uuid;

use crate::backend::{map_subscription, ChatBackend, Subscription};
use crate::models::Conversation;

pub struct ConversationDirectory {
    backend: Arc<dyn ChatBackend>,
}

impl ConversationDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        ConversationDirectory { backend }
    }

    /// Watch the conversations `user_id` participates in, most recent
    /// first. The full list is re-delivered on every upstream change.
    /// Conversations with equal last-message times keep the backend's
    /// order; that order is stable but not guaranteed.
    pub async fn subscribe_conversations(&self, user_id: &str) -> Subscription<Vec<Conversation>> {
        let uid = user_id.to_string();
        let inner = self.backend.watch_conversations().await;
        map_subscription(inner, move |docs| {
            let mut conversations: Vec<Conversation> = docs
                .iter()
                .filter_map(Conversation::from_doc)
                .filter(|c| c.has_participant(&uid))
                .collect();
            conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
            Some(conversations)
        })
    }

    /// Create a conversation between exactly two users, with zero unread
    /// counts and an empty preview. Returns the generated id.
    ///
    /// No duplicate-pair lookup happens here: a caller that does not
    /// check the existing directory first can end up with two parallel
    /// conversations for the same pair.
    pub async fn create_conversation(
        &self,
        participant_ids: &[String],
        participant_names: &HashMap<String, String>,
    ) -> Result<String> {
        if participant_ids.len() != 2 {
            bail!(
                "A conversation takes exactly 2 participants, got {}",
                participant_ids.len()
            );
        }

        let id = Uuid::new_v4().to_string();
        let conversation = Conversation {
            id: id.clone(),
            participants: participant_ids.to_vec(),
            participant_names: participant_names.clone(),
            last_message: String::new(),
            last_message_at: 0,
            last_message_sender: String::new(),
            unread: participant_ids.iter().map(|p| (p.clone(), 0)).collect(),
        };
        let doc = serde_json::to_value(&conversation)
            .context("Failed to encode conversation record")?;

        match self.backend.insert_conversation(&id, doc).await {
            Ok(()) => {
                info!(
                    "Created conversation {} between {} and {}",
                    id, participant_ids[0], participant_ids[1]
                );
                Ok(id)
            }
            Err(e) => {
                error!("Failed to create conversation: {}", e);
                Err(e).context("Failed to create conversation")
            }
        }
    }
}
