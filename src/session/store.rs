use super::types::{ChatMessage, MessageRole, Session};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 48;

/// Async session persistence contract.
pub trait SessionStore: Send + Sync {
    fn create_session<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>>;

    fn get_session<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Session>>> + Send + 'a>>;

    /// Most recently updated first.
    fn list_sessions(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>>;

    /// The latest `limit` messages of a session, oldest first.
    fn get_messages<'a>(
        &'a self,
        session_id: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChatMessage>>> + Send + 'a>>;

    /// Remove a session and its messages. Returns whether the session existed.
    fn delete_session<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Append to a session, creating it first if the id is unknown.
    fn append_message<'a>(
        &'a self,
        session_id: &'a str,
        role: MessageRole,
        content: &'a str,
        image_base64: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ChatMessage>> + Send + 'a>>;

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Title for a session created implicitly by its first message.
pub fn derive_title(first_message: &str) -> String {
    let text = first_message.trim();
    if text.is_empty() {
        return "New Chat".to_string();
    }
    match text.char_indices().nth(TITLE_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed session store.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

const SESSION_SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS session_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const SESSION_SCHEMA_VERSION_KEY: &str = "session_schema_version";
const SESSION_SCHEMA_VERSION: u32 = 1;

async fn ensure_session_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SESSION_SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create session_schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM session_schema_meta WHERE key = $1")
            .bind(SESSION_SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load session schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid session schema version value: {value}"))?;
        anyhow::ensure!(
            parsed == SESSION_SCHEMA_VERSION,
            "incompatible session schema version: stored={parsed}, expected={SESSION_SCHEMA_VERSION}"
        );
        return Ok(());
    }

    sqlx::query("INSERT INTO session_schema_meta (key, value) VALUES ($1, $2)")
        .bind(SESSION_SCHEMA_VERSION_KEY)
        .bind(SESSION_SCHEMA_VERSION.to_string())
        .execute(pool)
        .await
        .context("persist session schema version")?;

    Ok(())
}

impl SqliteSessionStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create session db directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("open session db {}", path.display()))?;

        Self::new(pool).await
    }

    /// Create a store over an existing pool and run migrations.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await?;

        ensure_session_schema_version(&pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                 id TEXT PRIMARY KEY,
                 title TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_messages (
                 id TEXT PRIMARY KEY,
                 session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                 role TEXT NOT NULL,
                 content TEXT NOT NULL,
                 image_base64 TEXT,
                 timestamp TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_session
                 ON chat_messages(session_id, timestamp)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_updated
                 ON sessions(updated_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

fn map_session_row(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_chat_message_row(row: &SqliteRow) -> Result<ChatMessage> {
    let role_raw: String = row.try_get("role")?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: MessageRole::from_str(&role_raw)
            .map_err(|_| anyhow::anyhow!("unknown message role: {role_raw}"))?,
        content: row.try_get("content")?,
        image_base64: row.try_get("image_base64")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl SessionStore for SqliteSessionStore {
    fn create_session<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>> {
        Box::pin(async move {
            let session_id = Uuid::new_v4().to_string();
            let timestamp = now_timestamp();

            sqlx::query(
                "INSERT INTO sessions (id, title, created_at, updated_at)
                 VALUES ($1, $2, $3, $3)",
            )
            .bind(&session_id)
            .bind(title)
            .bind(&timestamp)
            .execute(&self.pool)
            .await
            .context("insert session")?;

            Ok(Session {
                id: session_id,
                title: title.to_string(),
                created_at: timestamp.clone(),
                updated_at: timestamp,
            })
        })
    }

    fn get_session<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Session>>> + Send + 'a>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, title, created_at, updated_at
                 FROM sessions
                 WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            row.as_ref().map(map_session_row).transpose()
        })
    }

    fn list_sessions(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Session>>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, title, created_at, updated_at
                 FROM sessions
                 ORDER BY updated_at DESC, rowid DESC
                 LIMIT $1",
            )
            .bind(to_sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(map_session_row).collect()
        })
    }

    fn get_messages<'a>(
        &'a self,
        session_id: &'a str,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ChatMessage>>> + Send + 'a>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, session_id, role, content, image_base64, timestamp
                 FROM chat_messages
                 WHERE session_id = $1
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT $2",
            )
            .bind(session_id)
            .bind(to_sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

            let mut messages: Vec<ChatMessage> = rows
                .iter()
                .map(map_chat_message_row)
                .collect::<Result<_>>()?;
            messages.reverse();
            Ok(messages)
        })
    }

    fn delete_session<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("delete session messages")?;

            let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("delete session")?;

            tx.commit().await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn append_message<'a>(
        &'a self,
        session_id: &'a str,
        role: MessageRole,
        content: &'a str,
        image_base64: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ChatMessage>> + Send + 'a>> {
        Box::pin(async move {
            let message_id = Uuid::new_v4().to_string();
            let timestamp = now_timestamp();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT OR IGNORE INTO sessions (id, title, created_at, updated_at)
                 VALUES ($1, $2, $3, $3)",
            )
            .bind(session_id)
            .bind(derive_title(content))
            .bind(&timestamp)
            .execute(&mut *tx)
            .await
            .context("create implicit session")?;

            sqlx::query(
                "INSERT INTO chat_messages (id, session_id, role, content, image_base64, timestamp)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&message_id)
            .bind(session_id)
            .bind(role.to_string())
            .bind(content)
            .bind(image_base64)
            .bind(&timestamp)
            .execute(&mut *tx)
            .await
            .context("insert chat message")?;

            sqlx::query(
                "UPDATE sessions
                 SET updated_at = $1
                 WHERE id = $2",
            )
            .bind(&timestamp)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(ChatMessage {
                id: message_id,
                session_id: session_id.to_string(),
                role,
                content: content.to_string(),
                image_base64: image_base64.map(ToOwned::to_owned),
                timestamp,
            })
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .context("session store ping")?;
            Ok(())
        })
    }
}
