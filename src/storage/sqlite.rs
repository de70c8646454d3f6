//! SQLite storage backend (rusqlite, bundled).

use super::{ConversationRow, IdentityRow, MessageRow, Role, Store, UserRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    email      TEXT NOT NULL UNIQUE,
    name       TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS conversations (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    session_id      TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
CREATE TABLE IF NOT EXISTS webhook_identities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    email       TEXT NOT NULL UNIQUE,
    external_id TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_external ON webhook_identities(external_id);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp '{raw}'"))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
    })
}

struct RawConversation {
    id: i64,
    user_id: i64,
    title: String,
    created_at: String,
    updated_at: String,
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<RawConversation> {
    Ok(RawConversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl RawConversation {
    fn into_row(self) -> Result<ConversationRow> {
        Ok(ConversationRow {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct RawMessage {
    id: i64,
    conversation_id: i64,
    role: String,
    content: String,
    session_id: Option<String>,
    created_at: String,
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        session_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl RawMessage {
    fn into_row(self) -> Result<MessageRow> {
        Ok(MessageRow {
            id: self.id,
            conversation_id: self.conversation_id,
            role: self.role.parse()?,
            content: self.content,
            session_id: self.session_id,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const CONVERSATION_COLS: &str = "id, user_id, title, created_at, updated_at";
const MESSAGE_COLS: &str = "id, conversation_id, role, content, session_id, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_user(&self, email: &str, name: Option<&str>) -> Result<UserRow> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO users (email, name, created_at) VALUES (?1, ?2, ?3)",
            params![email, name, Utc::now().to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT id, email, name FROM users WHERE email = ?1",
            params![email],
            user_from_row,
        )
        .context("Failed to read back user row")
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT id, email, name FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()?)
    }

    async fn create_conversation(&self, user_id: i64, title: &str) -> Result<ConversationRow> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![user_id, title, now],
        )
        .context("Failed to insert conversation")?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
            params![id],
            conversation_from_row,
        )?
        .into_row()
    }

    async fn conversation(&self, id: i64) -> Result<Option<ConversationRow>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
                params![id],
                conversation_from_row,
            )
            .optional()?;
        raw.map(RawConversation::into_row).transpose()
    }

    async fn conversations_for_user(&self, user_id: i64) -> Result<Vec<ConversationRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations
             WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_id], conversation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawConversation::into_row).collect()
    }

    async fn latest_conversation_for_user(&self, user_id: i64) -> Result<Option<ConversationRow>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLS} FROM conversations
                     WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC LIMIT 1"
                ),
                params![user_id],
                conversation_from_row,
            )
            .optional()?;
        raw.map(RawConversation::into_row).transpose()
    }

    async fn rename_conversation(&self, id: i64, title: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![id, title],
        )?;
        Ok(())
    }

    async fn touch_conversation(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn delete_conversation(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        session_id: Option<&str>,
    ) -> Result<MessageRow> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                role.as_str(),
                content,
                session_id,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert message")?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
            params![id],
            message_from_row,
        )?
        .into_row()
    }

    async fn messages(&self, conversation_id: i64) -> Result<Vec<MessageRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![conversation_id], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawMessage::into_row).collect()
    }

    async fn message_count(&self, conversation_id: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn update_message_content(&self, id: i64, content: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE messages SET content = ?2 WHERE id = ?1",
            params![id, content],
        )?;
        anyhow::ensure!(changed == 1, "message {id} no longer exists");
        Ok(())
    }

    async fn latest_assistant_by_session(&self, session_id: &str) -> Result<Option<MessageRow>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                     WHERE session_id = ?1 AND role = 'assistant'
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![session_id],
                message_from_row,
            )
            .optional()?;
        raw.map(RawMessage::into_row).transpose()
    }

    async fn latest_pending_in_conversation(
        &self,
        conversation_id: i64,
        prefix: &str,
    ) -> Result<Option<MessageRow>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                     WHERE conversation_id = ?1 AND role = 'assistant'
                       AND substr(content, 1, length(?2)) = ?2
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![conversation_id, prefix],
                message_from_row,
            )
            .optional()?;
        raw.map(RawMessage::into_row).transpose()
    }

    async fn identity_by_email(&self, email: &str) -> Result<Option<IdentityRow>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT email, external_id FROM webhook_identities WHERE email = ?1",
                params![email],
                |row| {
                    Ok(IdentityRow {
                        email: row.get(0)?,
                        external_id: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    async fn identity_by_external_id(&self, external_id: &str) -> Result<Option<IdentityRow>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT email, external_id FROM webhook_identities
                 WHERE external_id = ?1 ORDER BY id ASC LIMIT 1",
                params![external_id],
                |row| {
                    Ok(IdentityRow {
                        email: row.get(0)?,
                        external_id: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    async fn insert_identity(&self, email: &str, external_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO webhook_identities (email, external_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![email, external_id, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert identity mapping")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_conversation() -> (SqliteStore, i64, i64) {
        let store = SqliteStore::in_memory().unwrap();
        let user = store.ensure_user("alice@example.com", Some("Alice")).await.unwrap();
        let conversation = store.create_conversation(user.id, "New Conversation").await.unwrap();
        (store, user.id, conversation.id)
    }

    #[tokio::test]
    async fn ensure_user_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.ensure_user("a@example.com", Some("A")).await.unwrap();
        let second = store.ensure_user("a@example.com", None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let (store, _, conversation) = store_with_conversation().await;
        store
            .append_message(conversation, Role::User, "first", None)
            .await
            .unwrap();
        store
            .append_message(conversation, Role::Assistant, "second", Some("webhook_session_1"))
            .await
            .unwrap();
        let messages = store.messages(conversation).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].session_id.as_deref(), Some("webhook_session_1"));
    }

    #[tokio::test]
    async fn session_lookup_prefers_most_recent_assistant_row() {
        let (store, _, conversation) = store_with_conversation().await;
        store
            .append_message(conversation, Role::User, "q", Some("webhook_session_7"))
            .await
            .unwrap();
        let older = store
            .append_message(conversation, Role::Assistant, "old", Some("webhook_session_7"))
            .await
            .unwrap();
        let newer = store
            .append_message(conversation, Role::Assistant, "new", Some("webhook_session_7"))
            .await
            .unwrap();
        let found = store
            .latest_assistant_by_session("webhook_session_7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
        assert_ne!(found.id, older.id);
    }

    #[tokio::test]
    async fn pending_lookup_matches_on_prefix_only() {
        let (store, _, conversation) = store_with_conversation().await;
        store
            .append_message(conversation, Role::Assistant, "resolved reply", Some("s1"))
            .await
            .unwrap();
        let pending = store
            .append_message(
                conversation,
                Role::Assistant,
                "Request accepted by webhook. Waiting.",
                Some("s2"),
            )
            .await
            .unwrap();
        let found = store
            .latest_pending_in_conversation(conversation, "Request accepted by webhook.")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, pending.id);

        // A `%` in a hypothetical prefix must not act as a wildcard.
        assert!(store
            .latest_pending_in_conversation(conversation, "%")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_conversation_cascades_to_messages() {
        let (store, user, conversation) = store_with_conversation().await;
        store
            .append_message(conversation, Role::User, "hello", None)
            .await
            .unwrap();
        store.delete_conversation(conversation).await.unwrap();
        assert!(store.conversation(conversation).await.unwrap().is_none());
        assert_eq!(store.message_count(conversation).await.unwrap(), 0);
        assert!(store
            .conversations_for_user(user)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn identity_first_write_wins() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_identity("a@example.com", "u-1").await.unwrap();
        store.insert_identity("a@example.com", "u-2").await.unwrap();
        let row = store
            .identity_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.external_id, "u-1");
        let back = store.identity_by_external_id("u-1").await.unwrap().unwrap();
        assert_eq!(back.email, "a@example.com");
    }

    #[tokio::test]
    async fn on_disk_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist yet; open must create it.
        let path = dir.path().join("data").join("portal.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            let user = store.ensure_user("a@example.com", Some("A")).await.unwrap();
            let conversation = store.create_conversation(user.id, "Persisted").await.unwrap();
            store
                .append_message(conversation.id, Role::User, "hello", None)
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let user = store.user_by_email("a@example.com").await.unwrap().unwrap();
        let listed = store.conversations_for_user(user.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Persisted");
        assert_eq!(store.message_count(listed[0].id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn touch_resorts_conversations() {
        let (store, user, first) = store_with_conversation().await;
        let second = store.create_conversation(user, "Another").await.unwrap();
        store.touch_conversation(first).await.unwrap();
        let listed = store.conversations_for_user(user).await.unwrap();
        assert_eq!(listed[0].id, first);
        assert_eq!(listed[1].id, second.id);
    }
}
