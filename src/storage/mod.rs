//! Conversation, message, user, and identity-mapping persistence.
//!
//! The reconciliation core talks to storage only through the [`Store`] trait;
//! the SQLite backend is the default (and currently only) implementation.
//! Writes are last-write-wins with no version check — a provider double-post
//! racing on the same session overwrites silently, which is accepted.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(anyhow::anyhow!("unknown message role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One-way email → external user id mapping. First write wins.
#[derive(Debug, Clone)]
pub struct IdentityRow {
    pub email: String,
    pub external_id: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert the user if the email is new, otherwise return the existing row.
    async fn ensure_user(&self, email: &str, name: Option<&str>) -> anyhow::Result<UserRow>;
    async fn user_by_email(&self, email: &str) -> anyhow::Result<Option<UserRow>>;

    async fn create_conversation(&self, user_id: i64, title: &str)
        -> anyhow::Result<ConversationRow>;
    async fn conversation(&self, id: i64) -> anyhow::Result<Option<ConversationRow>>;
    /// All conversations for a user, most recently updated first.
    async fn conversations_for_user(&self, user_id: i64) -> anyhow::Result<Vec<ConversationRow>>;
    /// The user's most recently updated conversation, if any.
    async fn latest_conversation_for_user(
        &self,
        user_id: i64,
    ) -> anyhow::Result<Option<ConversationRow>>;
    async fn rename_conversation(&self, id: i64, title: &str) -> anyhow::Result<()>;
    /// Bump `updated_at` so the conversation resorts to the top of the list.
    async fn touch_conversation(&self, id: i64) -> anyhow::Result<()>;
    /// Delete a conversation and, by cascade, its messages.
    async fn delete_conversation(&self, id: i64) -> anyhow::Result<()>;

    async fn append_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        session_id: Option<&str>,
    ) -> anyhow::Result<MessageRow>;
    /// Messages of a conversation in creation order.
    async fn messages(&self, conversation_id: i64) -> anyhow::Result<Vec<MessageRow>>;
    async fn message_count(&self, conversation_id: i64) -> anyhow::Result<u64>;
    async fn update_message_content(&self, id: i64, content: &str) -> anyhow::Result<()>;
    /// Most recent assistant message carrying this exact session id,
    /// regardless of content state.
    async fn latest_assistant_by_session(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Option<MessageRow>>;
    /// Most recent assistant message in the conversation whose content still
    /// starts with the given sentinel prefix.
    async fn latest_pending_in_conversation(
        &self,
        conversation_id: i64,
        prefix: &str,
    ) -> anyhow::Result<Option<MessageRow>>;

    async fn identity_by_email(&self, email: &str) -> anyhow::Result<Option<IdentityRow>>;
    async fn identity_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<IdentityRow>>;
    /// Insert a mapping unless one already exists for the email (first write wins).
    async fn insert_identity(&self, email: &str, external_id: &str) -> anyhow::Result<()>;
}
