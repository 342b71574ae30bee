//! Session memory: append-only message logs keyed by an opaque session id.

pub mod error;
pub mod session;
pub mod sqlite;

pub use error::MemoryError;
pub use session::{SessionGuard, SessionId, SessionStore};
pub use sqlite::SqliteStore;
