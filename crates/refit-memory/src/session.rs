use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use refit_llm::Message;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::MemoryError;
use crate::sqlite::SqliteStore;

/// Opaque conversation token supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Default)]
struct SessionLog {
    loaded: bool,
    messages: Vec<Message>,
}

type SharedLog = Arc<AsyncMutex<SessionLog>>;

/// Mapping from session id to its append-only message log.
///
/// Sessions are created on first access and never removed. Access to one
/// session is serialized through [`SessionGuard`]; different sessions never
/// wait on each other.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, SharedLog>>,
    sqlite: Option<SqliteStore>,
}

impl SessionStore {
    /// Sessions that live for the process lifetime only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Sessions written through to `sqlite` and reloaded from it on first access.
    #[must_use]
    pub fn with_sqlite(sqlite: SqliteStore) -> Self {
        Self {
            sessions: Mutex::default(),
            sqlite: Some(sqlite),
        }
    }

    /// Open a persistent store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: &str) -> Result<Self, MemoryError> {
        Ok(Self::with_sqlite(SqliteStore::new(path).await?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.sqlite.is_some()
    }

    fn entry(&self, id: &SessionId) -> SharedLog {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(id.clone()).or_default())
    }

    /// Exclusive access to session `id`, creating it if absent.
    ///
    /// Waits while another caller holds the same session.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted history cannot be loaded.
    pub async fn lock(&self, id: &SessionId) -> Result<SessionGuard, MemoryError> {
        let mut log = self.entry(id).lock_owned().await;
        if !log.loaded {
            if let Some(sqlite) = &self.sqlite {
                log.messages = sqlite.load_history(id.as_str()).await?;
                tracing::debug!(session = %id, messages = log.messages.len(), "session restored");
            }
            log.loaded = true;
        }
        Ok(SessionGuard {
            id: id.clone(),
            log,
            sqlite: self.sqlite.clone(),
        })
    }

    /// Snapshot of the history of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted history cannot be loaded.
    pub async fn history(&self, id: &SessionId) -> Result<Vec<Message>, MemoryError> {
        Ok(self.lock(id).await?.messages().to_vec())
    }

    /// Number of sessions touched in this process.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive handle on one session's log. Dropping it releases the session.
#[derive(Debug)]
pub struct SessionGuard {
    id: SessionId,
    log: OwnedMutexGuard<SessionLog>,
    sqlite: Option<SqliteStore>,
}

impl SessionGuard {
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.log.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.messages.is_empty()
    }

    /// Append `message`. With persistence enabled the write reaches the
    /// database first; on failure the in-memory log is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-through fails.
    pub async fn append(&mut self, message: Message) -> Result<(), MemoryError> {
        if let Some(sqlite) = &self.sqlite {
            sqlite.save_message(self.id.as_str(), &message).await?;
        }
        self.log.messages.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use refit_llm::Role;

    use super::*;

    #[tokio::test]
    async fn sessions_are_created_on_demand_and_append_in_order() {
        let store = SessionStore::in_memory();
        let id = SessionId::from("alpha");
        {
            let mut session = store.lock(&id).await.unwrap();
            assert!(session.is_empty());
            session.append(Message::user("one")).await.unwrap();
            session.append(Message::assistant("two")).await.unwrap();
        }
        {
            let mut session = store.lock(&id).await.unwrap();
            session.append(Message::user("three")).await.unwrap();
        }
        let history = store.history(&id).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::in_memory();
        store
            .lock(&"a".into())
            .await
            .unwrap()
            .append(Message::user("for a"))
            .await
            .unwrap();
        assert!(store.history(&"b".into()).await.unwrap().is_empty());
        assert_eq!(store.session_count(), 2);
    }

    #[tokio::test]
    async fn same_session_is_serialized() {
        let store = SessionStore::in_memory();
        let id = SessionId::from("busy");
        let held = store.lock(&id).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), store.lock(&id)).await;
        assert!(blocked.is_err(), "second lock must wait for the first");
        drop(held);
        assert!(store.lock(&id).await.is_ok());
    }

    #[tokio::test]
    async fn different_sessions_do_not_block() {
        let store = SessionStore::in_memory();
        let _held = store.lock(&"one".into()).await.unwrap();
        let other = tokio::time::timeout(Duration::from_millis(500), store.lock(&"two".into())).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_message() {
        let store = Arc::new(SessionStore::in_memory());
        let id = SessionId::from("shared");
        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                let mut session = store.lock(&id).await.unwrap();
                session.append(Message::user(format!("q{i}"))).await.unwrap();
                tokio::task::yield_now().await;
                session.append(Message::assistant(format!("a{i}"))).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 16);
        // Each question is immediately followed by its own answer.
        for pair in history.chunks(2) {
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn persistent_sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let path = path.to_str().unwrap();
        let id = SessionId::from("durable");

        {
            let store = SessionStore::open(path).await.unwrap();
            assert!(store.is_persistent());
            let mut session = store.lock(&id).await.unwrap();
            session.append(Message::user("remember me")).await.unwrap();
            session.append(Message::assistant("noted")).await.unwrap();
        }

        let reopened = SessionStore::open(path).await.unwrap();
        let mut session = reopened.lock(&id).await.unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0].content, "remember me");
        session.append(Message::user("still here?")).await.unwrap();
        drop(session);
        assert_eq!(reopened.history(&id).await.unwrap().len(), 3);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
