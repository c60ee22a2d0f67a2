//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `domchat-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reads on the reader pool
//! and writes on the single-connection writer.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;

use domchat_core::chat::repository::ConversationRepository;
use domchat_types::chat::{Conversation, ConversationFilter, Message, MessageRole};
use domchat_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationRepository`.
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationRow {
    id: String,
    user_id: String,
    partition: String,
    title: String,
    is_pinned: bool,
    is_archived: bool,
    message_count: i64,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            partition: row.try_get("partition")?,
            title: row.try_get("title")?,
            is_pinned: row.try_get("is_pinned")?,
            is_archived: row.try_get("is_archived")?,
            message_count: row.try_get("message_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation id: {e}")))?;

        Ok(Conversation {
            id,
            user_id: self.user_id,
            partition: self.partition,
            title: self.title,
            is_pinned: self.is_pinned,
            is_archived: self.is_archived,
            message_count: self.message_count as u32,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    metadata: Option<String>,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid message metadata: {e}")))?;

        Ok(Message {
            id,
            conversation_id,
            role,
            content: self.content,
            metadata,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn map_conversations(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Conversation>, RepositoryError> {
    rows.iter()
        .map(|row| {
            ConversationRow::from_row(row)
                .map_err(query_error)?
                .into_conversation()
        })
        .collect()
}

fn map_messages(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Message>, RepositoryError> {
    rows.iter()
        .map(|row| MessageRow::from_row(row).map_err(query_error)?.into_message())
        .collect()
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversations (id, user_id, partition, title, is_pinned, is_archived, message_count, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.user_id)
        .bind(&conversation.partition)
        .bind(&conversation.title)
        .bind(conversation.is_pinned)
        .bind(conversation.is_archived)
        .bind(conversation.message_count as i64)
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("conversation {} already exists", conversation.id))
            }
            other => query_error(other),
        })?;

        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let conversation_row = ConversationRow::from_row(&row).map_err(query_error)?;
                Ok(Some(conversation_row.into_conversation()?))
            }
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        filter: &ConversationFilter,
    ) -> Result<(Vec<Conversation>, u64), RepositoryError> {
        const WHERE: &str = "WHERE user_id = ?1 AND (?2 IS NULL OR partition = ?2) AND (?3 OR is_archived = 0)";

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM conversations {WHERE}"))
            .bind(user_id)
            .bind(&filter.partition)
            .bind(filter.include_archived)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let rows = sqlx::query(&format!(
            "SELECT * FROM conversations {WHERE} ORDER BY is_pinned DESC, updated_at DESC, rowid DESC LIMIT ?4 OFFSET ?5"
        ))
        .bind(user_id)
        .bind(&filter.partition)
        .bind(filter.include_archived)
        .bind(i64::from(filter.limit))
        .bind(i64::from(filter.offset))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        Ok((map_conversations(&rows)?, total as u64))
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE conversations
               SET title = ?, is_pinned = ?, is_archived = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&conversation.title)
        .bind(conversation.is_pinned)
        .bind(conversation.is_archived)
        .bind(format_datetime(&conversation.updated_at))
        .bind(conversation.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_conversation(&self, id: &Uuid) -> Result<(), RepositoryError> {
        // Messages go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn append_message(
        &self,
        message: &Message,
        retitle: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid message metadata: {e}")))?;

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let updated = sqlx::query(
            r#"UPDATE conversations
               SET message_count = message_count + 1, updated_at = ?, title = COALESCE(?, title)
               WHERE id = ?"#,
        )
        .bind(format_datetime(&message.created_at))
        .bind(retitle)
        .bind(message.conversation_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, role, content, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(metadata)
        .bind(format_datetime(&message.created_at))
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_messages(&self, conversation_id: &Uuid) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        map_messages(&rows)
    }

    async fn recent_messages(
        &self,
        conversation_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM (
                   SELECT *, rowid AS seq FROM messages
                   WHERE conversation_id = ?
                   ORDER BY created_at DESC, rowid DESC
                   LIMIT ?
               ) ORDER BY created_at ASC, seq ASC"#,
        )
        .bind(conversation_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        map_messages(&rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(&dir.path().join("test.db")).await.unwrap();
        (pool, dir)
    }

    fn conversation(user_id: &str, partition: &str) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            partition: partition.to_string(),
            title: "New conversation".to_string(),
            is_pinned: false,
            is_archived: false,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(conversation_id: Uuid, role: MessageRole, content: &str) -> Message {
        Message {
            id: Uuid::now_v7(),
            conversation_id,
            role,
            content: content.to_string(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);

        let conv = conversation("u1", "horse_racing");
        repo.create_conversation(&conv).await.unwrap();

        let fetched = repo.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, conv.id);
        assert_eq!(fetched.partition, "horse_racing");
        assert_eq!(fetched.message_count, 0);
        assert!(!fetched.is_pinned);

        assert!(repo.get_conversation(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_conflict() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);
        let conv = conversation("u1", "p");
        repo.create_conversation(&conv).await.unwrap();
        assert!(matches!(
            repo.create_conversation(&conv).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_append_message_updates_conversation() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);
        let conv = conversation("u1", "p");
        repo.create_conversation(&conv).await.unwrap();

        let mut answer = message(conv.id, MessageRole::Assistant, "Hi there");
        answer.metadata = Some(json!({"capabilities": ["get_race_statistics"]}));

        repo.append_message(&message(conv.id, MessageRole::User, "hello"), Some("hello"))
            .await
            .unwrap();
        repo.append_message(&answer, None).await.unwrap();

        let fetched = repo.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.message_count, 2);
        assert_eq!(fetched.title, "hello");
        assert!(fetched.updated_at >= conv.updated_at);

        let messages = repo.get_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "Hi there");
        assert_eq!(messages[1].metadata, answer.metadata);
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);
        let result = repo
            .append_message(&message(Uuid::now_v7(), MessageRole::User, "x"), None)
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order_on_equal_timestamps() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);
        let conv = conversation("u1", "p");
        repo.create_conversation(&conv).await.unwrap();

        let at = Utc::now();
        for content in ["a", "b", "c", "d"] {
            let mut m = message(conv.id, MessageRole::User, content);
            m.created_at = at;
            repo.append_message(&m, None).await.unwrap();
        }

        let all: Vec<String> = repo
            .get_messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(all, vec!["a", "b", "c", "d"]);

        let recent: Vec<String> = repo
            .recent_messages(&conv.id, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(recent, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);

        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut conv = conversation("u1", "horse_racing");
            conv.updated_at = base + Duration::seconds(i);
            repo.create_conversation(&conv).await.unwrap();
            ids.push(conv.id);
        }
        let mut pinned = conversation("u1", "horse_racing");
        pinned.is_pinned = true;
        pinned.updated_at = base - Duration::days(1);
        repo.create_conversation(&pinned).await.unwrap();

        let mut archived = conversation("u1", "horse_racing");
        archived.is_archived = true;
        repo.create_conversation(&archived).await.unwrap();

        repo.create_conversation(&conversation("u1", "customer_support"))
            .await
            .unwrap();
        repo.create_conversation(&conversation("u2", "horse_racing"))
            .await
            .unwrap();

        let filter = ConversationFilter {
            partition: Some("horse_racing".to_string()),
            ..Default::default()
        };
        let (items, total) = repo.list_conversations("u1", &filter).await.unwrap();
        assert_eq!(total, 4);
        let order: Vec<Uuid> = items.iter().map(|c| c.id).collect();
        assert_eq!(order, vec![pinned.id, ids[2], ids[1], ids[0]]);

        let (_, total) = repo
            .list_conversations(
                "u1",
                &ConversationFilter {
                    include_archived: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(total, 6);

        let (page, total) = repo
            .list_conversations(
                "u1",
                &ConversationFilter {
                    partition: Some("horse_racing".to_string()),
                    limit: 2,
                    offset: 2,
                    include_archived: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(page.iter().map(|c| c.id).collect::<Vec<_>>(), vec![ids[1], ids[0]]);
    }

    #[tokio::test]
    async fn test_update_conversation() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);
        let mut conv = conversation("u1", "p");
        repo.create_conversation(&conv).await.unwrap();

        conv.title = "Renamed".to_string();
        conv.is_pinned = true;
        repo.update_conversation(&conv).await.unwrap();

        let fetched = repo.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Renamed");
        assert!(fetched.is_pinned);

        let missing = conversation("u1", "p");
        assert!(matches!(
            repo.update_conversation(&missing).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_messages() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteConversationRepository::new(pool);
        let conv = conversation("u1", "p");
        repo.create_conversation(&conv).await.unwrap();
        repo.append_message(&message(conv.id, MessageRole::User, "hi"), None)
            .await
            .unwrap();

        repo.delete_conversation(&conv.id).await.unwrap();
        assert!(repo.get_conversation(&conv.id).await.unwrap().is_none());
        assert!(repo.get_messages(&conv.id).await.unwrap().is_empty());

        assert!(matches!(
            repo.delete_conversation(&conv.id).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
