//! Session identity: the session model, its backing store seam and the
//! per-session fetch deduplicator that fronts it.
//! Keep the public surface thin and split implementation across sub-modules.

mod dedup;
mod session;
mod storage;

pub use dedup::{FetchOutcome, SessionDeduplicator, SessionFetchError};
pub use session::{new_session_id, session_key, Session, SessionStore, SharedSessionStore, StorageSessionStore};
pub use storage::{InMemoryStorage, KeyValueStorage, StorageHandle, StoreError};
