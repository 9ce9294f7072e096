//! Storage for accounts, linked identities and refresh-token sessions

pub mod session_store;
pub mod sqlite;
pub mod user_store;

pub use session_store::{
    create_memory_session_store, ConsumeOutcome, MemorySessionStore, RevocationReason,
    SessionRecord, SessionStore, SharedSessionStore,
};
pub use sqlite::SqliteStore;
pub use user_store::{MemoryUserStore, SharedUserStore, UserStore};
