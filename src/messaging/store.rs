//! SQLite persistence for messages.
//!
//! Message creation only happens inside a transaction opened by the
//! fan-out coordinator, so [`MessageStore::create`] takes a connection
//! rather than the pool. Reads and read-state updates use the pool directly.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, trace};

use super::message::{Message, MessageMetadata, NewMessage};
use super::party::PartyRef;
use super::MessagingError;
use crate::config::MessagesConfig;

/// Schema applied by [`migrate`].
const SCHEMA: &str = include_str!("../../migrations/001_messages.sql");

/// Row type returned by SQLite queries for messages.
type MessageRow = (
    i64,
    String,
    i64,
    String,
    i64,
    String,
    String,
    bool,
    Option<String>,
    String,
    String,
);

const SELECT_COLUMNS: &str = "SELECT id, sender_kind, sender_id, recipient_kind, recipient_id, \
     subject, content, sender_copy, read_at, metadata, created_at FROM messages";

/// Extra validation applied to every message before insertion.
///
/// Returning `Err(reason)` fails the creation with
/// [`MessagingError::DeliveryFailed`].
pub type Validator = Arc<dyn Fn(&NewMessage) -> Result<(), String> + Send + Sync>;

/// Create the `messages` table and its indexes if missing.
///
/// # Errors
///
/// Returns [`MessagingError::Database`] on SQLite failure.
pub async fn migrate(db: &SqlitePool) -> Result<(), MessagingError> {
    sqlx::raw_sql(SCHEMA).execute(db).await?;
    debug!("messages schema applied");
    Ok(())
}

/// Open (creating if missing) the SQLite database at `path` and apply the schema.
///
/// # Errors
///
/// Returns [`MessagingError::Database`] if the database cannot be opened or migrated.
pub async fn connect(path: &Path, max_connections: u32) -> Result<SqlitePool, MessagingError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .pragma("trusted_schema", "OFF");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    debug!(path = %path.display(), "message database opened");
    Ok(pool)
}

/// Message persistence with creation-time validation.
#[derive(Clone)]
pub struct MessageStore {
    db: SqlitePool,
    limits: MessagesConfig,
    validators: Vec<Validator>,
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("limits", &self.limits)
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}

impl MessageStore {
    /// Store over `db` with default limits and no custom validators.
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            limits: MessagesConfig::default(),
            validators: Vec::new(),
        }
    }

    /// Replace the size limits.
    pub fn with_limits(mut self, limits: MessagesConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Add a custom validator.
    pub fn with_validator(
        mut self,
        validator: impl Fn(&NewMessage) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Check a message against the built-in rules and custom validators.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::DeliveryFailed`] naming the first violated rule.
    pub fn validate(&self, message: &NewMessage) -> Result<(), MessagingError> {
        let fail = |reason: String| MessagingError::DeliveryFailed {
            recipient: message.recipient.clone(),
            reason,
        };

        if message.subject.trim().is_empty() {
            return Err(fail("subject is blank".to_owned()));
        }
        let subject_len = message.subject.chars().count();
        if subject_len > self.limits.max_subject_len {
            return Err(fail(format!(
                "subject is {subject_len} characters, limit is {}",
                self.limits.max_subject_len
            )));
        }
        if message.content.len() > self.limits.max_content_size {
            return Err(fail(format!(
                "content is {} bytes, limit is {}",
                message.content.len(),
                self.limits.max_content_size
            )));
        }
        if let Some(url) = &message.metadata.url {
            url::Url::parse(url).map_err(|e| fail(format!("invalid url {url:?}: {e}")))?;
        }
        for validator in &self.validators {
            validator(message).map_err(fail)?;
        }
        Ok(())
    }

    /// Validate and insert a message on `conn` (normally an open transaction).
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::DeliveryFailed`] on validation failure or
    /// [`MessagingError::Database`] on SQLite failure.
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        message: &NewMessage,
    ) -> Result<i64, MessagingError> {
        self.validate(message)?;
        let metadata = message.metadata.to_json()?;
        let result = sqlx::query(
            "INSERT INTO messages (sender_kind, sender_id, recipient_kind, recipient_id, \
             subject, content, sender_copy, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&message.sender.kind)
        .bind(message.sender.id)
        .bind(&message.recipient.kind)
        .bind(message.recipient.id)
        .bind(&message.subject)
        .bind(&message.content)
        .bind(message.sender_copy)
        .bind(&metadata)
        .execute(&mut *conn)
        .await?;
        let id = result.last_insert_rowid();
        trace!(
            message_id = id,
            recipient = %message.recipient,
            sender_copy = message.sender_copy,
            "message created"
        );
        Ok(id)
    }

    /// Load a message by id.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::MessageNotFound`] if no message matches.
    pub async fn find(&self, id: i64) -> Result<Message, MessagingError> {
        let row: MessageRow = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(MessagingError::MessageNotFound(id))?;
        message_from_row(row)
    }

    /// Set `read_at` to now and persist it, skipping validation.
    ///
    /// Calling it again rewrites the timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::MessageNotFound`] if the row was deleted.
    pub async fn mark_as_read(&self, message: &mut Message) -> Result<(), MessagingError> {
        let now = Utc::now();
        let result = sqlx::query("UPDATE messages SET read_at = ?1 WHERE id = ?2")
            .bind(now.to_rfc3339())
            .bind(message.id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MessagingError::MessageNotFound(message.id));
        }
        message.read_at = Some(now);
        trace!(message_id = message.id, "message marked as read");
        Ok(())
    }

    /// Persist the message's current metadata (e.g. after
    /// [`Message::set_url`]).
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::MessageNotFound`] if the row was deleted.
    pub async fn update_metadata(&self, message: &Message) -> Result<(), MessagingError> {
        let metadata = message.metadata().to_json()?;
        let result = sqlx::query("UPDATE messages SET metadata = ?1 WHERE id = ?2")
            .bind(&metadata)
            .bind(message.id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MessagingError::MessageNotFound(message.id));
        }
        Ok(())
    }

    /// Messages received by `party`, newest first. Sender copies excluded.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Database`] on SQLite failure.
    pub async fn received_messages(
        &self,
        party: &PartyRef,
        limit: usize,
    ) -> Result<Vec<Message>, MessagingError> {
        self.inbox(party, "", limit).await
    }

    /// Received messages without a read timestamp, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Database`] on SQLite failure.
    pub async fn unread_messages(
        &self,
        party: &PartyRef,
        limit: usize,
    ) -> Result<Vec<Message>, MessagingError> {
        self.inbox(party, " AND read_at IS NULL", limit).await
    }

    /// Received messages with a read timestamp, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Database`] on SQLite failure.
    pub async fn read_messages(
        &self,
        party: &PartyRef,
        limit: usize,
    ) -> Result<Vec<Message>, MessagingError> {
        self.inbox(party, " AND read_at IS NOT NULL", limit).await
    }

    /// Sender copies of messages sent by `party`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Database`] on SQLite failure.
    pub async fn sent_messages(
        &self,
        party: &PartyRef,
        limit: usize,
    ) -> Result<Vec<Message>, MessagingError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE sender_kind = ?1 AND sender_id = ?2 AND sender_copy = 1 \
             ORDER BY id DESC LIMIT ?3"
        ))
        .bind(&party.kind)
        .bind(party.id)
        .bind(limit_i64)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn inbox(
        &self,
        party: &PartyRef,
        read_filter: &str,
        limit: usize,
    ) -> Result<Vec<Message>, MessagingError> {
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE recipient_kind = ?1 AND recipient_id = ?2 \
             AND sender_copy = 0{read_filter} ORDER BY id DESC LIMIT ?3"
        ))
        .bind(&party.kind)
        .bind(party.id)
        .bind(limit_i64)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    /// Total number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Database`] on SQLite failure.
    pub async fn count(&self) -> Result<u64, MessagingError> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM messages")
            .fetch_one(&self.db)
            .await?;
        // count(*) is always non-negative, safe to cast.
        Ok(row.0.cast_unsigned())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, MessagingError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| MessagingError::InvalidTimestamp(format!("{value:?}: {e}")))
}

fn message_from_row(row: MessageRow) -> Result<Message, MessagingError> {
    let read_at = row.8.as_deref().map(parse_timestamp).transpose()?;
    let created_at = parse_timestamp(&row.10)?;
    Ok(Message::from_parts(
        row.0,
        PartyRef::new(row.1, row.2),
        PartyRef::new(row.3, row.4),
        row.5,
        row.6,
        row.7,
        read_at,
        created_at,
        MessageMetadata::from_json(&row.9)?,
    ))
}
