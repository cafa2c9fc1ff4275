use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{ResponseCache, RECENT_CONTEXT};
use crate::delivery::{Channel, Delivery};
use crate::generator::{GeneratedResponse, GenerationMode, Generator};
use crate::store::{IdentityMatcher, Message};
use crate::watcher::{preview, Watcher};

/// Polls between liveness log lines.
const HEARTBEAT_EVERY: u64 = 20;

/// Kind of conversation being watched; decides admission and reply policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationClass {
    /// One-to-one partner.
    Direct,
    /// Operator channel; only your own prefixed messages are commands.
    Admin,
    /// Every inbound message, answered only when it mentions the assistant.
    GroupMention,
}

impl ConversationClass {
    pub fn mode(self) -> GenerationMode {
        match self {
            ConversationClass::Direct => GenerationMode::Direct,
            ConversationClass::Admin => GenerationMode::Admin,
            ConversationClass::GroupMention => GenerationMode::GroupMention,
        }
    }

    /// Pause between having a reply and sending it.
    pub fn send_delay(self) -> Duration {
        match self {
            ConversationClass::Admin => Duration::from_secs(1),
            ConversationClass::Direct | ConversationClass::GroupMention => Duration::from_secs(2),
        }
    }
}

impl std::fmt::Display for ConversationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationClass::Direct => write!(f, "direct"),
            ConversationClass::Admin => write!(f, "admin"),
            ConversationClass::GroupMention => write!(f, "group"),
        }
    }
}

/// A message that passed its class filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    /// Text handed to the generator.
    pub text: String,
    /// Identity the reply is delivered to.
    pub reply_to: String,
}

/// One polled conversation and its cursor.
#[derive(Debug, Clone)]
pub struct WatchedConversation {
    pub class: ConversationClass,
    pub matcher: Option<IdentityMatcher>,
    /// Id of the last message evaluated. Only ever moves forward.
    pub cursor: Option<i64>,
    /// Admin prefix or group mention token; empty for direct.
    token: String,
    reply_to: Option<String>,
}

impl WatchedConversation {
    pub fn direct(identity: &str) -> Self {
        Self {
            class: ConversationClass::Direct,
            matcher: Some(IdentityMatcher::new(identity)),
            cursor: None,
            token: String::new(),
            reply_to: None,
        }
    }

    pub fn admin(identity: &str, prefix: &str) -> Self {
        Self {
            class: ConversationClass::Admin,
            matcher: Some(IdentityMatcher::new(identity)),
            cursor: None,
            token: prefix.trim().to_string(),
            reply_to: None,
        }
    }

    pub fn group(mention: &str, reply_to: Option<&str>) -> Self {
        Self {
            class: ConversationClass::GroupMention,
            matcher: None,
            cursor: None,
            token: mention.trim().to_string(),
            reply_to: reply_to.map(str::to_string),
        }
    }

    pub fn is_new(&self, id: i64) -> bool {
        self.cursor.map_or(true, |cursor| id > cursor)
    }

    pub fn advance(&mut self, id: i64) {
        self.cursor = Some(self.cursor.map_or(id, |cursor| cursor.max(id)));
    }

    /// Apply the class filter. `None` means the message is seen but not answered.
    pub fn admit(&self, message: &Message) -> Option<Admitted> {
        match self.class {
            ConversationClass::Direct => {
                if !message.is_inbound() {
                    return None;
                }
                let text = message.body()?;
                Some(Admitted {
                    text: text.to_string(),
                    reply_to: self.matcher.as_ref()?.identity().to_string(),
                })
            }
            ConversationClass::Admin => {
                if message.is_inbound() {
                    return None;
                }
                let command = strip_prefix_ci(message.body()?, &self.token)?;
                Some(Admitted {
                    text: command.trim().to_string(),
                    reply_to: self.matcher.as_ref()?.identity().to_string(),
                })
            }
            ConversationClass::GroupMention => {
                if !message.is_inbound() {
                    return None;
                }
                let body = message.body()?;
                if find_ci(body, &self.token, 0).is_none() {
                    return None;
                }
                let cleaned = remove_all_ci(body, &self.token);
                let cleaned = cleaned.trim();
                if cleaned.is_empty() {
                    info!("{} mentioned but no message content", self.token);
                    return None;
                }
                Some(Admitted {
                    text: cleaned.to_string(),
                    reply_to: self
                        .reply_to
                        .clone()
                        .unwrap_or_else(|| message.sender.clone()),
                })
            }
        }
    }
}

/// Byte offset of the first ASCII-case-insensitive occurrence of `needle` at or after `from`.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let (hay, pat) = (haystack.as_bytes(), needle.as_bytes());
    if pat.is_empty() || hay.len() < pat.len() {
        return None;
    }
    (from..=hay.len() - pat.len()).find(|&i| {
        haystack.is_char_boundary(i)
            && haystack.is_char_boundary(i + pat.len())
            && hay[i..i + pat.len()].eq_ignore_ascii_case(pat)
    })
}

fn remove_all_ci(haystack: &str, needle: &str) -> String {
    let mut out = String::with_capacity(haystack.len());
    let mut pos = 0;
    while let Some(start) = find_ci(haystack, needle, pos) {
        out.push_str(&haystack[pos..start]);
        pos = start + needle.len();
    }
    out.push_str(&haystack[pos..]);
    out
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    (find_ci(text, prefix, 0) == Some(0)).then(|| &text[prefix.len()..])
}

/// What a single poll of one conversation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing newer than the cursor (or the store was unavailable).
    NoChange,
    /// A new message was seen but did not pass the class filter.
    Filtered,
    /// A reply was generated, cached and handed to delivery.
    Replied {
        response: GeneratedResponse,
        channel: Option<Channel>,
    },
}

/// Drives one polling state machine per watched conversation, sequentially.
pub struct Relay {
    watcher: Watcher,
    generator: Arc<Generator>,
    cache: ResponseCache,
    delivery: Delivery,
    conversations: Vec<WatchedConversation>,
    poll_interval: Duration,
    polls: u64,
}

impl Relay {
    pub fn new(
        watcher: Watcher,
        generator: Arc<Generator>,
        cache: ResponseCache,
        delivery: Delivery,
        conversations: Vec<WatchedConversation>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            watcher,
            generator,
            cache,
            delivery,
            conversations,
            poll_interval,
            polls: 0,
        }
    }

    pub fn conversations(&self) -> &[WatchedConversation] {
        &self.conversations
    }

    /// Start every cursor at the store's current latest message so history is not answered.
    pub async fn seed_cursors(&mut self) {
        for conversation in &mut self.conversations {
            conversation.cursor = self
                .watcher
                .latest_id(conversation.matcher.as_ref(), conversation.class)
                .await;
            info!(
                "Watching {} conversation from message id {:?}",
                conversation.class, conversation.cursor
            );
        }
    }

    /// Poll the conversation at `index` once and act on anything new.
    pub async fn tick(&mut self, index: usize) -> TickOutcome {
        let (class, matcher) = {
            let conversation = &self.conversations[index];
            (conversation.class, conversation.matcher.clone())
        };

        let Some(message) = self.watcher.poll(matcher.as_ref(), class).await else {
            return TickOutcome::NoChange;
        };

        let conversation = &self.conversations[index];
        if !conversation.is_new(message.id) {
            return TickOutcome::NoChange;
        }

        let admitted = conversation.admit(&message);
        let Some(admitted) = admitted else {
            debug!(
                "{}: message {} does not need a reply ({})",
                class,
                message.id,
                preview(message.text.as_deref().unwrap_or(""))
            );
            self.conversations[index].advance(message.id);
            return TickOutcome::Filtered;
        };

        debug!("{}: new message {} at {:?}", class, message.id, message.timestamp);
        info!("[{}] {} says: {}", class, message.sender, admitted.text);
        let (response, channel) = self.respond(class, &admitted).await;

        self.conversations[index].advance(message.id);
        TickOutcome::Replied { response, channel }
    }

    async fn respond(
        &self,
        class: ConversationClass,
        admitted: &Admitted,
    ) -> (GeneratedResponse, Option<Channel>) {
        let recent = self.cache.recent(RECENT_CONTEXT).await;
        let response = self
            .generator
            .generate(class.mode(), &recent, &admitted.text)
            .await;
        if response.fallback {
            info!("Responding with {} fallback: {}", response.mode, response.text);
        } else {
            info!("Responding: {}", response.text);
        }

        // Cached before sending: a failed send still counts as "already said".
        if let Err(e) = self.cache.append(&response.text).await {
            warn!("Could not save response cache: {:#}", e);
        }

        tokio::time::sleep(class.send_delay()).await;

        // Delivery logs its own failure summary.
        let report = self.delivery.send(&admitted.reply_to, &response.text).await;
        (response, report.channel)
    }

    /// Poll every watched conversation once, in order.
    pub async fn tick_all(&mut self) -> Vec<TickOutcome> {
        self.polls += 1;
        if self.polls % HEARTBEAT_EVERY == 0 {
            debug!("Still listening... (checked {} times)", self.polls);
        }

        let mut outcomes = Vec::with_capacity(self.conversations.len());
        for index in 0..self.conversations.len() {
            outcomes.push(self.tick(index).await);
        }
        outcomes
    }

    /// Run until `shutdown` resolves. Shutdown is only observed between iterations.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(
            "Waiting for messages, polling every {}s",
            self.poll_interval.as_secs()
        );

        loop {
            self.tick_all().await;
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping relay");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
