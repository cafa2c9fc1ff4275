use std::sync::Arc;

use tracing::{debug, warn};

use crate::relay::ConversationClass;
use crate::store::{IdentityMatcher, Message, MessageFilter, MessageStore};

/// Polls the message store for the latest message of a conversation class.
///
/// Store failures never reach the caller: they are logged and reported as
/// "no message", and the next tick simply tries again.
#[derive(Clone)]
pub struct Watcher {
    store: Arc<dyn MessageStore>,
}

impl Watcher {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    fn filter_for(
        matcher: Option<&IdentityMatcher>,
        class: ConversationClass,
    ) -> Option<MessageFilter> {
        match class {
            ConversationClass::GroupMention => Some(MessageFilter::AnyInbound),
            ConversationClass::Direct | ConversationClass::Admin => {
                matcher.cloned().map(MessageFilter::Identity)
            }
        }
    }

    pub async fn poll(
        &self,
        matcher: Option<&IdentityMatcher>,
        class: ConversationClass,
    ) -> Option<Message> {
        let Some(filter) = Self::filter_for(matcher, class) else {
            warn!("{} conversation has no identity to watch", class);
            return None;
        };

        match self.store.latest(&filter).await {
            Ok(message) => message,
            Err(e) => {
                warn!("Error reading message store for {}: {:#}", class, e);
                None
            }
        }
    }

    /// Id of the newest message right now, used to seed a cursor at startup.
    pub async fn latest_id(
        &self,
        matcher: Option<&IdentityMatcher>,
        class: ConversationClass,
    ) -> Option<i64> {
        let message = self.poll(matcher, class).await;
        match &message {
            Some(m) => debug!(
                "{}: last message id={} ({})",
                class,
                m.id,
                preview(m.text.as_deref().unwrap_or(""))
            ),
            None => debug!("{}: no messages yet", class),
        }
        message.map(|m| m.id)
    }
}

/// First 50 characters of a message for log lines.
pub fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(50).collect();
    if text.chars().count() > 50 {
        out.push_str("...");
    }
    out
}
