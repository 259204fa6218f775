use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::ThreadId;
use backend_protocol::UserId;
use chrono::DateTime;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::Thread;

/// Persistence for `Thread` rows (§3, §4.6 Session Manager).
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn create(&self, thread: ThreadId, user: UserId) -> AppResult<Thread>;
    async fn get(&self, thread: &ThreadId) -> AppResult<Option<Thread>>;
    /// Lists threads for `user`, newest first, `page` 0-indexed. Returns
    /// the page and the total row count for that user.
    async fn list(&self, user: UserId, page: u32, page_size: u32) -> AppResult<(Vec<Thread>, u64)>;
    /// Sets `title` iff it is currently unset. Returns whether this call
    /// won the race (§4.5: "if still null in the store, persist").
    async fn set_title_if_unset(&self, thread: &ThreadId, title: &str) -> AppResult<bool>;
    async fn delete(&self, thread: &ThreadId) -> AppResult<()>;
}

#[derive(Debug, sqlx::FromRow)]
struct ThreadRow {
    thread_id: String,
    user_id: String,
    title: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ThreadRow> for Thread {
    type Error = AppError;

    fn try_from(row: ThreadRow) -> Result<Self, Self::Error> {
        Ok(Thread {
            thread_id: ThreadId(row.thread_id),
            user_id: UserId::from_str(&row.user_id).map_err(|e| AppError::Internal(e.into()))?,
            title: row.title,
            created_at: row.created_at,
        })
    }
}

pub struct SqliteThreadRepository {
    pool: SqlitePool,
}

impl SqliteThreadRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThreadRepository for SqliteThreadRepository {
    async fn create(&self, thread: ThreadId, user: UserId) -> AppResult<Thread> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO threads (thread_id, user_id, title, created_at) VALUES (?, ?, NULL, ?)",
        )
        .bind(thread.as_str())
        .bind(user.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
        Ok(Thread {
            thread_id: thread,
            user_id: user,
            title: None,
            created_at: now,
        })
    }

    async fn get(&self, thread: &ThreadId) -> AppResult<Option<Thread>> {
        let row: Option<ThreadRow> =
            sqlx::query_as("SELECT thread_id, user_id, title, created_at FROM threads WHERE thread_id = ?")
                .bind(thread.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        row.map(Thread::try_from).transpose()
    }

    async fn list(&self, user: UserId, page: u32, page_size: u32) -> AppResult<(Vec<Thread>, u64)> {
        let page_size = page_size.min(100).max(1);
        let offset = i64::from(page) * i64::from(page_size);
        let rows: Vec<ThreadRow> = sqlx::query_as(
            "SELECT thread_id, user_id, title, created_at FROM threads \
             WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(user.to_string())
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE user_id = ?")
            .bind(user.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        let threads = rows
            .into_iter()
            .map(Thread::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((threads, total.max(0) as u64))
    }

    async fn set_title_if_unset(&self, thread: &ThreadId, title: &str) -> AppResult<bool> {
        let result =
            sqlx::query("UPDATE threads SET title = ? WHERE thread_id = ? AND title IS NULL")
                .bind(title)
                .bind(thread.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, thread: &ThreadId) -> AppResult<()> {
        sqlx::query("DELETE FROM threads WHERE thread_id = ?")
            .bind(thread.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        Ok(())
    }
}

/// In-memory repository for tests and for running without a configured
/// database.
#[derive(Default)]
pub struct InMemoryThreadRepository {
    rows: Mutex<Vec<Thread>>,
}

impl InMemoryThreadRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadRepository for InMemoryThreadRepository {
    async fn create(&self, thread: ThreadId, user: UserId) -> AppResult<Thread> {
        let row = Thread {
            thread_id: thread,
            user_id: user,
            title: None,
            created_at: Utc::now(),
        };
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(row.clone());
        Ok(row)
    }

    async fn get(&self, thread: &ThreadId) -> AppResult<Option<Thread>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| &t.thread_id == thread)
            .cloned())
    }

    async fn list(&self, user: UserId, page: u32, page_size: u32) -> AppResult<(Vec<Thread>, u64)> {
        let page_size = page_size.min(100).max(1) as usize;
        let guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<Thread> = guard
            .iter()
            .filter(|t| t.user_id == user)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as u64;
        let start = (page as usize) * page_size;
        let page_rows = matching.into_iter().skip(start).take(page_size).collect();
        Ok((page_rows, total))
    }

    async fn set_title_if_unset(&self, thread: &ThreadId, title: &str) -> AppResult<bool> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let Some(row) = guard.iter_mut().find(|t| &t.thread_id == thread) else {
            return Ok(false);
        };
        if row.title.is_some() {
            return Ok(false);
        }
        row.title = Some(title.to_string());
        Ok(true)
    }

    async fn delete(&self, thread: &ThreadId) -> AppResult<()> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| &t.thread_id != thread);
        Ok(())
    }
}
