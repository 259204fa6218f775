use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::UserId;
use chrono::DateTime;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::User;

/// Persistence for `User` rows (§3). Password hashing and token
/// verification live in the `server` crate; this trait only stores and
/// retrieves the already-hashed credential.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, username: &str, password_hash: &str, is_admin: bool) -> AppResult<User>;
    async fn get(&self, user_id: UserId) -> AppResult<Option<User>>;
    async fn get_by_username(&self, username: &str) -> AppResult<Option<User>>;
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    user_id: String,
    username: String,
    password_hash: String,
    is_admin: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            user_id: UserId::from_str(&row.user_id).map_err(|e| AppError::Internal(e.into()))?,
            username: row.username,
            password_hash: row.password_hash,
            is_admin: row.is_admin,
            created_at: row.created_at,
        })
    }
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, username: &str, password_hash: &str, is_admin: bool) -> AppResult<User> {
        let user_id = UserId::new();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (user_id, username, password_hash, is_admin, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(username)
        .bind(password_hash)
        .bind(is_admin)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db) = e {
                if db.is_unique_violation() {
                    return AppError::Conflict(format!("username `{username}` is already taken"));
                }
            }
            AppError::Internal(e.into())
        })?;
        Ok(User {
            user_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at: now,
        })
    }

    async fn get(&self, user_id: UserId) -> AppResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, username, password_hash, is_admin, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
        row.map(User::try_from).transpose()
    }

    async fn get_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, username, password_hash, is_admin, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
        row.map(User::try_from).transpose()
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    rows: Mutex<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, username: &str, password_hash: &str, is_admin: bool) -> AppResult<User> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if guard.iter().any(|u| u.username == username) {
            return Err(AppError::Conflict(format!(
                "username `{username}` is already taken"
            )));
        }
        let user = User {
            user_id: UserId::new(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin,
            created_at: Utc::now(),
        };
        guard.push(user.clone());
        Ok(user)
    }

    async fn get(&self, user_id: UserId) -> AppResult<Option<User>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned())
    }

    async fn get_by_username(&self, username: &str) -> AppResult<Option<User>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }
}
