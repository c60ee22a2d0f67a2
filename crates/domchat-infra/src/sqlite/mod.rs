//! SQLite storage layer.
//!
//! Conversations live in the main database; each partition's tables live in
//! their own database file, attached to a connection only while a handle
//! for that partition holds it.

pub mod conversation;
pub mod partition;
pub mod pool;

pub use conversation::SqliteConversationRepository;
pub use partition::SqlitePartitionAccess;
pub use pool::DatabasePool;
