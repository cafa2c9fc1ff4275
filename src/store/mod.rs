pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteMessageStore;

/// Number of trailing digits used to match a phone-like identity.
const MATCH_DIGITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the other party.
    Inbound,
    /// Sent from this account (by the operator or by the relay itself).
    Outbound,
}

/// A row of the external message store. Never mutated here.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub text: Option<String>,
    pub direction: Direction,
    pub sender: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Text with surrounding whitespace removed, `None` when absent or blank.
    pub fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Suffix matcher over the digits of a phone-like identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMatcher {
    identity: String,
    suffix: String,
}

impl IdentityMatcher {
    pub fn new(identity: &str) -> Self {
        let digits: Vec<char> = identity.chars().filter(|c| c.is_ascii_digit()).collect();
        let start = digits.len().saturating_sub(MATCH_DIGITS);
        Self {
            identity: identity.to_string(),
            suffix: digits[start..].iter().collect(),
        }
    }

    /// The identity as configured, used as the delivery address.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// True when the handle contains the last ten digits of this identity.
    pub fn matches(&self, handle: &str) -> bool {
        let digits: String = handle.chars().filter(|c| c.is_ascii_digit()).collect();
        !self.suffix.is_empty() && digits.contains(&self.suffix)
    }
}

/// Which rows a lookup considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFilter {
    /// Any direction, restricted to handles matching the identity.
    Identity(IdentityMatcher),
    /// Inbound messages from every handle.
    AnyInbound,
}

/// Read-only, append-only source of messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent message passing `filter`: latest timestamp first, higher id on ties.
    async fn latest(&self, filter: &MessageFilter) -> Result<Option<Message>>;
}
