pub mod store;
pub mod types;

pub use store::{SessionStore, SqliteSessionStore, derive_title};
pub use types::{ChatMessage, MessageRole, Session};
