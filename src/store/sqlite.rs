use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{Direction, Message, MessageFilter, MessageStore};

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// Newer databases store nanoseconds; anything this large cannot be seconds.
const NANOSECOND_THRESHOLD: i64 = 100_000_000_000;

const LATEST_FOR_HANDLE: &str = "
    SELECT m.rowid, m.text, m.is_from_me, m.date, h.id
    FROM message m
    JOIN handle h ON m.handle_id = h.rowid
    WHERE h.id LIKE ?1
    ORDER BY m.date DESC, m.rowid DESC
    LIMIT 1";

const LATEST_INBOUND: &str = "
    SELECT m.rowid, m.text, m.is_from_me, m.date, h.id
    FROM message m
    JOIN handle h ON m.handle_id = h.rowid
    WHERE m.is_from_me = 0
    ORDER BY m.date DESC, m.rowid DESC
    LIMIT 1";

/// The macOS Messages database (`chat.db`), opened read-only for each query.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    path: PathBuf,
}

impl SqliteMessageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open message database: {}", path.display()))
    }

    fn query_latest(path: &Path, filter: &MessageFilter) -> Result<Option<Message>> {
        // Connection is dropped on every return path, releasing the file.
        let conn = Self::open(path)?;
        let row = match filter {
            MessageFilter::Identity(matcher) => {
                if matcher.suffix().is_empty() {
                    return Ok(None);
                }
                conn.query_row(
                    LATEST_FOR_HANDLE,
                    rusqlite::params![format!("%{}%", matcher.suffix())],
                    parse_message_row,
                )
            }
            MessageFilter::AnyInbound => {
                conn.query_row(LATEST_INBOUND, rusqlite::params![], parse_message_row)
            }
        };
        row.optional().context("Failed to query latest message")
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn latest(&self, filter: &MessageFilter) -> Result<Option<Message>> {
        let path = self.path.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || Self::query_latest(&path, &filter))
            .await
            .context("Message database query task panicked")?
    }
}

fn parse_message_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let is_from_me: i64 = row.get(2)?;
    let date: Option<i64> = row.get(3)?;
    Ok(Message {
        id: row.get(0)?,
        text: row.get(1)?,
        direction: if is_from_me == 0 {
            Direction::Inbound
        } else {
            Direction::Outbound
        },
        sender: row.get(4)?,
        timestamp: date.and_then(apple_timestamp),
    })
}

/// Convert a Messages `date` column (seconds or nanoseconds since 2001-01-01) to UTC.
pub fn apple_timestamp(date: i64) -> Option<DateTime<Utc>> {
    let (secs, nanos) = if date.unsigned_abs() >= NANOSECOND_THRESHOLD as u64 {
        (date.div_euclid(1_000_000_000), date.rem_euclid(1_000_000_000))
    } else {
        (date, 0)
    };
    DateTime::from_timestamp(secs + APPLE_EPOCH_OFFSET, nanos as u32)
}
