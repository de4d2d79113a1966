// Per-conversation message streams: ordered subscription, sending,
// unread accounting, and the linear in-conversation search.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{debug, error, warn};
use uuid::Uuid;

use crate::backend::{map_subscription, ChatBackend, ObjectStore, Subscription};
use crate::models::{ChatMessage, Conversation, DeliveryStatus, FileMeta, MessageKind};

pub struct MessageStream {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ObjectStore>,
}

impl MessageStream {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<dyn ObjectStore>) -> Self {
        MessageStream { backend, store }
    }

    /// Watch a conversation's message log. The full sequence arrives on
    /// subscribe and again on every append, ordered by the server
    /// timestamp ascending. Malformed records are dropped at this
    /// boundary, not surfaced.
    pub async fn subscribe_messages(&self, conversation_id: &str) -> Subscription<Vec<ChatMessage>> {
        let inner = self.backend.watch_messages(conversation_id).await;
        map_subscription(inner, |docs| {
            Some(docs.iter().filter_map(ChatMessage::from_doc).collect())
        })
    }

    /// Append a message. Text messages carry no file fields; image and
    /// file messages record metadata for an attachment that has already
    /// been uploaded (see [`MessageStream::send_attachment`]).
    ///
    /// After the append, the parent conversation's preview is rewritten
    /// and every participant except the sender gains one unread. That
    /// update is a plain read-modify-write on a record both participants
    /// write to; concurrent sends can race and that is accepted.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        kind: MessageKind,
        file: Option<FileMeta>,
    ) -> Result<ChatMessage> {
        if kind == MessageKind::Text && file.is_some() {
            bail!("Text messages cannot carry an attachment");
        }
        if kind != MessageKind::Text && file.is_none() {
            bail!("Image and file messages need attachment metadata");
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            timestamp: 0, // assigned by the backend
            kind,
            file_url: file.as_ref().map(|f| f.url.clone()),
            file_name: file.as_ref().map(|f| f.name.clone()),
            file_size: file.as_ref().map(|f| f.size),
            delivery_status: DeliveryStatus::Sent,
        };
        let doc = serde_json::to_value(&message).context("Failed to encode message")?;

        let stored = match self.backend.append_message(conversation_id, doc).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to send message to {}: {}", conversation_id, e);
                return Err(e).context("Failed to send message");
            }
        };
        let message = ChatMessage::from_doc(&stored)
            .context("Backend returned an undecodable message record")?;
        debug!(
            "Message {} appended to {} at {}",
            message.id, conversation_id, message.timestamp
        );

        self.bump_conversation(&message).await?;
        Ok(message)
    }

    /// Upload an attachment and send the resulting metadata message in
    /// one step. The binary never enters the message log.
    pub async fn send_attachment(
        &self,
        conversation_id: &str,
        sender_id: &str,
        kind: MessageKind,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<ChatMessage> {
        if kind == MessageKind::Text {
            bail!("Attachments are image or file messages");
        }

        let object = match self.store.upload(file_name, bytes).await {
            Ok(object) => object,
            Err(e) => {
                error!("Failed to upload {}: {}", file_name, e);
                return Err(e).context("Failed to upload attachment");
            }
        };

        self.send_message(
            conversation_id,
            sender_id,
            "",
            kind,
            Some(FileMeta {
                url: object.url,
                name: object.name,
                size: object.size,
            }),
        )
        .await
    }

    /// Reset one participant's unread counter to 0. Not atomic with
    /// message delivery; a message landing during the round trip can
    /// leave a transient stale badge.
    pub async fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let doc = match self.backend.get_conversation(conversation_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!("mark_read on unknown conversation {}", conversation_id);
                return Ok(());
            }
            Err(e) => {
                error!("Failed to read conversation {}: {}", conversation_id, e);
                return Ok(()); // background sync failure, stale badge stands
            }
        };
        let mut conversation = match Conversation::from_doc(&doc) {
            Some(c) => c,
            None => return Ok(()),
        };

        conversation.unread.insert(user_id.to_string(), 0);
        let doc = serde_json::to_value(&conversation)
            .context("Failed to encode conversation record")?;
        if let Err(e) = self.backend.update_conversation(conversation_id, doc).await {
            error!(
                "Failed to reset unread for {} on {}: {}",
                user_id, conversation_id, e
            );
        }
        Ok(())
    }

    /// Rewrite the parent conversation's preview and bump the unread
    /// counter of every participant other than the sender.
    async fn bump_conversation(&self, message: &ChatMessage) -> Result<()> {
        let doc = match self.backend.get_conversation(&message.conversation_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                warn!(
                    "Message {} sent to unknown conversation {}",
                    message.id, message.conversation_id
                );
                return Ok(());
            }
            Err(e) => {
                error!(
                    "Failed to read conversation {}: {}",
                    message.conversation_id, e
                );
                return Ok(());
            }
        };
        let mut conversation = match Conversation::from_doc(&doc) {
            Some(c) => c,
            None => return Ok(()),
        };

        conversation.last_message = preview_text(message);
        conversation.last_message_at = message.timestamp;
        conversation.last_message_sender = message.sender_id.clone();
        for participant in conversation.participants.clone() {
            if participant != message.sender_id {
                *conversation.unread.entry(participant).or_insert(0) += 1;
            }
        }

        let doc = serde_json::to_value(&conversation)
            .context("Failed to encode conversation record")?;
        if let Err(e) = self
            .backend
            .update_conversation(&message.conversation_id, doc)
            .await
        {
            error!(
                "Failed to update preview for {}: {}",
                message.conversation_id, e
            );
        }
        Ok(())
    }
}

/// The one-line preview shown in the conversation list.
pub fn preview_text(message: &ChatMessage) -> String {
    match message.kind {
        MessageKind::Text => message.content.clone(),
        MessageKind::Image => message
            .file_name
            .clone()
            .unwrap_or_else(|| "Photo".to_string()),
        MessageKind::File => message
            .file_name
            .clone()
            .unwrap_or_else(|| "File".to_string()),
    }
}

/// Linear scan over a delivered message sequence. Case-insensitive match
/// on text content; returns indices for highlight/scroll. This is
/// client-side only, there is no server-side index.
pub fn search_messages(messages: &[ChatMessage], query: &str) -> Vec<usize> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();
    messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.content.to_lowercase().contains(&needle))
        .map(|(i, _)| i)
        .collect()
}
