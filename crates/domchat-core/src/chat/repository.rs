//! ConversationRepository trait definition.
//!
//! Provides CRUD for conversations and append/read for their messages.
//! Uses the RPITIT pattern (native async fn in traits, Rust 2024 edition).

use domchat_types::chat::{Conversation, ConversationFilter, Message};
use domchat_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for conversation and message persistence.
///
/// Implementations live in domchat-infra (e.g. `SqliteConversationRepository`).
pub trait ConversationRepository: Send + Sync {
    fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    fn get_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// One page of a user's conversations, ordered `is_pinned DESC,
    /// updated_at DESC`, plus the total count matching the filter.
    fn list_conversations(
        &self,
        user_id: &str,
        filter: &ConversationFilter,
    ) -> impl std::future::Future<Output = Result<(Vec<Conversation>, u64), RepositoryError>> + Send;

    /// Persist title/pin/archive flags and `updated_at`.
    fn update_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a conversation and, by cascade, its messages.
    fn delete_conversation(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert a message and bump the conversation's `message_count` and
    /// `updated_at` in one transaction. When `retitle` is set the
    /// conversation title is replaced in the same transaction.
    fn append_message(
        &self,
        message: &Message,
        retitle: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All messages of a conversation in creation order.
    fn get_messages(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// The most recent `limit` messages, returned in creation order.
    fn recent_messages(
        &self,
        conversation_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, RepositoryError>> + Send;
}
