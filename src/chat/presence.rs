// Presence tracking: heartbeat writes and per-user status subscriptions.
// "Online" is best effort; a missed heartbeat just leaves the last value.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error};
use serde_json::Value;

use crate::backend::{map_subscription, ChatBackend, Subscription};
use crate::models::PresenceStatus;
use crate::utils::now_millis;

pub struct PresenceStore {
    backend: Arc<dyn ChatBackend>,
}

impl PresenceStore {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        PresenceStore { backend }
    }

    /// Overwrite the user's presence record with the current time. No
    /// merge, no retry; a failed write leaves subscribers on the last
    /// known status.
    pub async fn set_status(&self, user_id: &str, online: bool) -> Result<()> {
        let status = PresenceStatus {
            user_id: user_id.to_string(),
            online,
            last_seen: now_millis(),
        };
        let doc = serde_json::to_value(&status).context("Failed to encode presence record")?;

        match self.backend.write_presence(user_id, doc).await {
            Ok(()) => {
                debug!("Presence for {} set to online={}", user_id, online);
                Ok(())
            }
            Err(e) => {
                error!("Failed to write presence for {}: {}", user_id, e);
                Err(e).context("Failed to write presence")
            }
        }
    }

    /// Watch a user's status. The current value is delivered immediately;
    /// if the user has never written presence, a synthesized
    /// `{online: false, last_seen: now}` stands in.
    pub async fn subscribe_status(&self, user_id: &str) -> Subscription<PresenceStatus> {
        let uid = user_id.to_string();
        let inner = self.backend.watch_presence(user_id).await;
        map_subscription(inner, move |doc| Some(decode_status(&uid, &doc)))
    }
}

fn decode_status(user_id: &str, doc: &Value) -> PresenceStatus {
    if !doc.is_null() {
        match serde_json::from_value::<PresenceStatus>(doc.clone()) {
            Ok(status) => return status,
            Err(e) => {
                error!("Malformed presence record for {}: {}", user_id, e);
            }
        }
    }
    PresenceStatus {
        user_id: user_id.to_string(),
        online: false,
        last_seen: now_millis(),
    }
}

/// Render elapsed time since `last_seen` the way the contact header shows
/// it: "Just now" under a minute, then minute/hour/day buckets.
pub fn last_seen_label(last_seen: i64, now: i64) -> String {
    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    let elapsed = (now - last_seen).max(0);
    if elapsed < MINUTE {
        "Just now".to_string()
    } else if elapsed < HOUR {
        format!("{}m ago", elapsed / MINUTE)
    } else if elapsed < DAY {
        format!("{}h ago", elapsed / HOUR)
    } else {
        format!("{}d ago", elapsed / DAY)
    }
}

/// Full display label for a status line.
pub fn presence_label(status: &PresenceStatus, now: i64) -> String {
    if status.online {
        "Online".to_string()
    } else {
        last_seen_label(status.last_seen, now)
    }
}
