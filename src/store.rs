//! Thread persistence behind the relay's HTTP surface.

use crate::types::{CourierError, Message, MessageId, MessageKind, Result, Role, ThreadId};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

pub type DbPool = SqlitePool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Persistence seam for conversation threads. The relay only ever talks
/// to this trait; tests swap in whatever they need.
pub trait ThreadStore: Send + Sync {
    fn list_threads(&self) -> BoxFuture<'_, Result<Vec<ThreadRecord>>>;

    fn create_thread<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ThreadRecord>>;

    fn rename_thread<'a>(&'a self, id: &'a ThreadId, name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn delete_thread<'a>(&'a self, id: &'a ThreadId) -> BoxFuture<'a, Result<()>>;

    fn list_messages<'a>(&'a self, id: &'a ThreadId) -> BoxFuture<'a, Result<Vec<Message>>>;

    fn append_message<'a>(
        &'a self,
        id: &'a ThreadId,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<()>>;
}

pub async fn init_db<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path_str = match path.as_ref().to_str() {
        Some(s) => s,
        None => {
            return Err(CourierError::Internal(
                "Invalid database path: Path contains non-UTF8 characters".to_string(),
                tracing_error::SpanTrace::capture(),
            )
            .into())
        }
    };
    let url = format!("sqlite:{}?mode=rwc", path_str);

    let pool = SqlitePool::connect(&url)
        .await
        .map_err(CourierError::Database)?;

    configure_db(&pool).await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        return Err(CourierError::Internal(
            format!("Migration failed: {}", e),
            tracing_error::SpanTrace::capture(),
        )
        .into());
    }

    tracing::info!("Database initialized at {}", path_str);
    Ok(pool)
}

async fn configure_db(pool: &DbPool) -> Result<()> {
    // WAL mode and performance pragmas
    let pragmas = [
        "PRAGMA journal_mode = WAL",
        "PRAGMA synchronous = NORMAL",
        "PRAGMA busy_timeout = 5000",
    ];

    for pragma in pragmas {
        sqlx::query(pragma)
            .execute(pool)
            .await
            .map_err(CourierError::Database)?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteThreadStore {
    pool: DbPool,
}

impl SqliteThreadStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_thread(row: &sqlx::sqlite::SqliteRow) -> ThreadRecord {
        ThreadRecord {
            id: ThreadId(row.get("id")),
            name: row.get("name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
        let role: String = row.get("role");
        let kind: String = row.get("kind");
        let file_json: Option<String> = row.get("file_json");
        Ok(Message {
            id: MessageId(row.get("id")),
            role: match role.as_str() {
                "system" => Role::System,
                "assistant" => Role::Assistant,
                _ => Role::User,
            },
            content: row.get("content"),
            kind: match kind.as_str() {
                "image" => MessageKind::Image,
                "file" => MessageKind::File,
                _ => MessageKind::Text,
            },
            timestamp: row.get("created_at"),
            file: match file_json {
                Some(json) => Some(serde_json::from_str(&json).map_err(CourierError::from)?),
                None => None,
            },
        })
    }
}

impl ThreadStore for SqliteThreadStore {
    fn list_threads(&self) -> BoxFuture<'_, Result<Vec<ThreadRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, name, created_at, updated_at FROM threads ORDER BY updated_at DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.iter().map(Self::row_to_thread).collect())
        })
    }

    fn create_thread<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<ThreadRecord>> {
        Box::pin(async move {
            let record = ThreadRecord {
                id: ThreadId::new(),
                name: name.to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            sqlx::query(
                "INSERT INTO threads (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&record.id.0)
            .bind(&record.name)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(record)
        })
    }

    fn rename_thread<'a>(&'a self, id: &'a ThreadId, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result =
                sqlx::query("UPDATE threads SET name = ?, updated_at = ? WHERE id = ?")
                    .bind(name)
                    .bind(Utc::now())
                    .bind(&id.0)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(
                    CourierError::InvalidRequest(format!("unknown thread: {}", id)).into(),
                );
            }
            Ok(())
        })
    }

    fn delete_thread<'a>(&'a self, id: &'a ThreadId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM messages WHERE thread_id = ?")
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM threads WHERE id = ?")
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn list_messages<'a>(&'a self, id: &'a ThreadId) -> BoxFuture<'a, Result<Vec<Message>>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, role, content, kind, file_json, created_at FROM messages \
                 WHERE thread_id = ? ORDER BY created_at ASC, rowid ASC",
            )
            .bind(&id.0)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(Self::row_to_message).collect()
        })
    }

    fn append_message<'a>(
        &'a self,
        id: &'a ThreadId,
        message: &'a Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let file_json = match &message.file {
                Some(f) => Some(serde_json::to_string(f).map_err(CourierError::from)?),
                None => None,
            };
            let kind = match message.kind {
                MessageKind::Text => "text",
                MessageKind::Image => "image",
                MessageKind::File => "file",
            };
            sqlx::query(
                "INSERT INTO messages (id, thread_id, role, content, kind, file_json, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&message.id.0)
            .bind(&id.0)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(kind)
            .bind(file_json)
            .bind(message.timestamp)
            .execute(&self.pool)
            .await?;
            sqlx::query("UPDATE threads SET updated_at = ? WHERE id = ?")
                .bind(Utc::now())
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }
}
