use thiserror::Error;

/// Errors raised while resolving a configuration bundle.
///
/// All of these are fatal at resolution time: no partial bundle is ever
/// considered valid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration not found: {0}")]
    NotFound(String),

    #[error("malformed configuration in '{document}': {reason}")]
    Malformed { document: String, reason: String },

    #[error("cross-references did not converge: {0}")]
    Cycle(String),

    #[error("configuration I/O error: {0}")]
    Io(String),
}

impl ConfigError {
    pub fn malformed(document: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Malformed {
            document: document.into(),
            reason: reason.into(),
        }
    }
}

/// Errors around capability resolution and invocation.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Recoverable: the capability is dropped with a warning.
    #[error("capability '{name}' is not registered for partition '{partition}'")]
    Unresolved { name: String, partition: String },

    #[error("invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("capability '{name}' failed: {reason}")]
    Execution { name: String, reason: String },

    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// Errors from partition-scoped data access.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// A handle tried to reach a table owned by a partition outside its scope.
    /// This is a programming error and is never downgraded.
    #[error("partition access violation: handle for '{partition}' resolved '{table}' into '{owner}'")]
    AccessViolation {
        partition: String,
        table: String,
        owner: String,
    },

    #[error("table '{table}' does not exist in scope {scope:?}")]
    UnknownTable { table: String, scope: Vec<String> },

    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from repository operations (used by trait definitions in domchat-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from the conversation management service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("conversation not found")]
    NotFound,

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Per-turn failures. Each ends the turn with a single `error` frame and
/// never tears down the channel.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("generation exceeded {0} capability rounds")]
    GenerationLoopExceeded(u32),

    #[error("channel closed during turn")]
    ChannelClosed,

    #[error("a turn is already active for this conversation")]
    Busy,

    #[error("message is empty")]
    EmptyMessage,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("generation failed: {0}")]
    Generation(#[from] crate::llm::LlmError),

    #[error("storage failed: {0}")]
    Storage(#[from] RepositoryError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}

impl TurnError {
    /// Text safe to send to the client. Internal causes stay in the logs.
    pub fn client_message(&self) -> &'static str {
        match self {
            TurnError::GenerationLoopExceeded(_) => {
                "The assistant could not finish this answer. Please try rephrasing."
            }
            TurnError::ChannelClosed => "Connection closed",
            TurnError::Busy => "A response is already in progress",
            TurnError::EmptyMessage => "Message is required",
            TurnError::ConversationNotFound => "Conversation not found",
            TurnError::Generation(_) => "The assistant is unavailable right now",
            TurnError::Storage(_) | TurnError::Partition(_) => "An internal error occurred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::malformed("domains/x/domain.yaml", "missing domain.id");
        assert_eq!(
            err.to_string(),
            "malformed configuration in 'domains/x/domain.yaml': missing domain.id"
        );
    }

    #[test]
    fn test_partition_violation_display() {
        let err = PartitionError::AccessViolation {
            partition: "horse_racing".to_string(),
            table: "orders".to_string(),
            owner: "customer_support".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("horse_racing"));
        assert!(text.contains("customer_support"));
    }

    #[test]
    fn test_capability_error_from_partition() {
        let err: CapabilityError = PartitionError::InvalidIdentifier("a;b".to_string()).into();
        assert_eq!(err.to_string(), "invalid identifier: 'a;b'");
    }

    #[test]
    fn test_turn_error_client_message_hides_cause() {
        let err = TurnError::Storage(RepositoryError::Query("near SELECT: secret".to_string()));
        assert!(!err.client_message().contains("secret"));
        assert_eq!(TurnError::EmptyMessage.client_message(), "Message is required");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
