//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use domchat_types::chat::ConversationFilter;

/// Query parameters for the conversation list endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct ConversationListQuery {
    /// Only conversations stored in this partition.
    pub partition: Option<String>,
    /// Page size, clamped to 1..=100 by the service.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    #[serde(default)]
    pub include_archived: bool,
}

impl From<ConversationListQuery> for ConversationFilter {
    fn from(query: ConversationListQuery) -> Self {
        let defaults = ConversationFilter::default();
        ConversationFilter {
            partition: query.partition.filter(|p| !p.trim().is_empty()),
            limit: query.limit.unwrap_or(defaults.limit),
            offset: query.offset.unwrap_or(defaults.offset),
            include_archived: query.include_archived,
        }
    }
}
