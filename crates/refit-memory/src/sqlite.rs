use std::str::FromStr;

use refit_llm::{Message, MessagePart, Role};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::MemoryError;

/// Durable message log backing [`crate::SessionStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the `SQLite` database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MemoryError::Other(format!("cannot create {}: {e}", parent.display())))?;
            }
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // An in-memory database exists per connection.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append `message` to `session_id`, registering the session if new.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn save_message(&self, session_id: &str, message: &Message) -> Result<i64, MemoryError> {
        let parts_json = serde_json::to_string(&message.parts)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO sessions (id) VALUES (?)")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO messages (session_id, role, content, parts) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(parts_json)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.0)
    }

    /// All messages of `session_id` in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn load_history(&self, session_id: &str) -> Result<Vec<Message>, MemoryError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT role, content, parts FROM messages WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(role, content, parts_json)| {
                let role = Role::from_str(&role)
                    .map_err(|e| MemoryError::Other(format!("stored message has bad role: {e}")))?;
                let parts: Vec<MessagePart> = serde_json::from_str(&parts_json)?;
                Ok(Message {
                    role,
                    content,
                    parts,
                })
            })
            .collect()
    }

    /// Known session ids, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn session_ids(&self) -> Result<Vec<String>, MemoryError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM sessions ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
