//! Conversation service: the management surface over `ConversationRepository`.
//!
//! Ownership is enforced here: a conversation owned by another user reads as
//! not found.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use domchat_types::chat::{
    Conversation, ConversationDetail, ConversationFilter, ConversationPage, ConversationPatch,
    DEFAULT_CONVERSATION_TITLE, Message, MessageRole,
};
use domchat_types::error::{RepositoryError, ServiceError};

use crate::chat::repository::ConversationRepository;

/// Longest auto-generated title, in characters, before the ellipsis.
pub const TITLE_MAX_CHARS: usize = 30;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Build a title from the first user message: whitespace collapsed,
/// truncated to [`TITLE_MAX_CHARS`] characters plus `...`.
pub fn generate_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{truncated}...")
}

/// Generic over the repository so domchat-core never depends on domchat-infra.
pub struct ConversationService<R: ConversationRepository> {
    repo: R,
}

impl<R: ConversationRepository> ConversationService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub async fn create(
        &self,
        user_id: &str,
        partition: &str,
        title: Option<String>,
    ) -> Result<Conversation, ServiceError> {
        let now = Utc::now();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string());
        let conversation = Conversation {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            partition: partition.to_string(),
            title,
            is_pinned: false,
            is_archived: false,
            message_count: 0,
            created_at: now,
            updated_at: now,
        };
        let created = self.repo.create_conversation(&conversation).await?;
        info!(conversation_id = %created.id, partition, "Conversation created");
        Ok(created)
    }

    /// Fetch a conversation owned by `user_id`.
    pub async fn get_owned(&self, user_id: &str, id: &Uuid) -> Result<Conversation, ServiceError> {
        match self.repo.get_conversation(id).await? {
            Some(conversation) if conversation.user_id == user_id => Ok(conversation),
            _ => Err(ServiceError::NotFound),
        }
    }

    pub async fn list(
        &self,
        user_id: &str,
        filter: ConversationFilter,
    ) -> Result<ConversationPage, ServiceError> {
        let filter = ConversationFilter {
            limit: filter.limit.clamp(1, MAX_PAGE_SIZE),
            ..filter
        };
        let (items, total) = self.repo.list_conversations(user_id, &filter).await?;
        let has_more = u64::from(filter.offset) + (items.len() as u64) < total;
        Ok(ConversationPage {
            items,
            total,
            has_more,
        })
    }

    /// Conversation plus its messages in creation order.
    pub async fn detail(&self, user_id: &str, id: &Uuid) -> Result<ConversationDetail, ServiceError> {
        let conversation = self.get_owned(user_id, id).await?;
        let messages = self.repo.get_messages(id).await?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub async fn update(
        &self,
        user_id: &str,
        id: &Uuid,
        patch: ConversationPatch,
    ) -> Result<Conversation, ServiceError> {
        if patch.is_empty() {
            return Err(ServiceError::Validation("no fields to update".to_string()));
        }

        let mut conversation = self.get_owned(user_id, id).await?;
        if let Some(title) = patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(ServiceError::Validation("title must not be empty".to_string()));
            }
            conversation.title = title.to_string();
        }
        if let Some(pinned) = patch.is_pinned {
            conversation.is_pinned = pinned;
        }
        if let Some(archived) = patch.is_archived {
            conversation.is_archived = archived;
        }
        conversation.updated_at = Utc::now();

        self.repo.update_conversation(&conversation).await?;
        Ok(conversation)
    }

    /// Hard delete; messages go with it.
    pub async fn delete(&self, user_id: &str, id: &Uuid) -> Result<(), ServiceError> {
        self.get_owned(user_id, id).await?;
        self.repo.delete_conversation(id).await.map_err(|e| match e {
            RepositoryError::NotFound => ServiceError::NotFound,
            other => other.into(),
        })?;
        info!(conversation_id = %id, "Conversation deleted");
        Ok(())
    }

    /// Persist a user message. The first user message of a conversation that
    /// still has the default title also renames it.
    pub async fn append_user_message(
        &self,
        conversation: &Conversation,
        content: &str,
    ) -> Result<Message, RepositoryError> {
        let message = new_message(conversation.id, MessageRole::User, content, None);
        let retitle = (conversation.message_count == 0
            && conversation.title == DEFAULT_CONVERSATION_TITLE)
            .then(|| generate_title(content));

        self.repo
            .append_message(&message, retitle.as_deref())
            .await?;
        debug!(conversation_id = %conversation.id, message_id = %message.id, "User message persisted");
        Ok(message)
    }

    pub async fn append_assistant_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Message, RepositoryError> {
        let message = new_message(conversation_id, MessageRole::Assistant, content, metadata);
        self.repo.append_message(&message, None).await?;
        debug!(conversation_id = %conversation_id, message_id = %message.id, "Assistant message persisted");
        Ok(message)
    }

    /// The last `limit` messages, oldest first.
    pub async fn history(&self, conversation_id: &Uuid, limit: u32) -> Result<Vec<Message>, RepositoryError> {
        self.repo.recent_messages(conversation_id, limit).await
    }
}

fn new_message(
    conversation_id: Uuid,
    role: MessageRole,
    content: &str,
    metadata: Option<serde_json::Value>,
) -> Message {
    Message {
        id: Uuid::now_v7(),
        conversation_id,
        role,
        content: content.to_string(),
        metadata,
        created_at: Utc::now(),
    }
}
