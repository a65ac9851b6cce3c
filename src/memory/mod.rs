//! 记忆层：对话历史与会话持久化

pub mod conversation;
pub mod store;

pub use conversation::{round_count, Message, Role};
pub use store::{InMemoryStore, MemoryStore, SqliteMemoryStore};
