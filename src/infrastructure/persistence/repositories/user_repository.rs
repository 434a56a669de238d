use super::rows;
use crate::domain::repositories::UserRepository;
use crate::domain::user::{Role, User, UserStatus};
use crate::infrastructure::core::ttl_cache::TtlCache;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

const READ_CACHE_TTL: Duration = Duration::from_secs(300);
const READ_CACHE_CAPACITY: usize = 4096;

pub struct SqliteUserRepository {
    database: Database,
    // Point-read cache keyed two ways; invalidated on every write.
    cache: TtlCache<User>,
}

impl SqliteUserRepository {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            cache: TtlCache::new(READ_CACHE_CAPACITY),
        }
    }

    fn id_key(user_id: &str) -> String {
        format!("id:{}", user_id)
    }

    fn chat_key(chat_id: &str) -> String {
        format!("chat:{}", chat_id)
    }

    async fn cache_put(&self, user: &User) {
        self.cache
            .insert(Self::id_key(&user.user_id), user.clone(), READ_CACHE_TTL)
            .await;
        self.cache
            .insert(Self::chat_key(&user.chat_id), user.clone(), READ_CACHE_TTL)
            .await;
    }

    async fn cache_drop(&self, user_id: &str) {
        if let Some(user) = self.cache.get(&Self::id_key(user_id)).await {
            self.cache.invalidate(&Self::chat_key(&user.chat_id)).await;
        }
        self.cache.invalidate(&Self::id_key(user_id)).await;
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, chat_id, display_name, role, assigned_manager_id,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.chat_id)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(&user.assigned_manager_id)
        .bind(user.status.as_str())
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&self.database.pool)
        .await
        .context("Failed to create user")?;

        self.cache_put(user).await;
        Ok(())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>> {
        if let Some(user) = self.cache.get(&Self::id_key(user_id)).await {
            return Ok(Some(user));
        }

        let row = sqlx::query("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load user")?;

        match row {
            Some(row) => {
                let user = rows::user_from_row(&row)?;
                self.cache_put(&user).await;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn find_by_chat_id(&self, chat_id: &str) -> Result<Option<User>> {
        if let Some(user) = self.cache.get(&Self::chat_key(chat_id)).await {
            return Ok(Some(user));
        }

        let row = sqlx::query("SELECT * FROM users WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load user by chat id")?;

        match row {
            Some(row) => {
                let user = rows::user_from_row(&row)?;
                self.cache_put(&user).await;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn set_status(&self, user_id: &str, status: UserStatus) -> Result<()> {
        sqlx::query("UPDATE users SET status = $1, updated_at = $2 WHERE user_id = $3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update user status")?;

        self.cache_drop(user_id).await;
        Ok(())
    }

    async fn set_role(&self, user_id: &str, role: Role) -> Result<()> {
        sqlx::query("UPDATE users SET role = $1, updated_at = $2 WHERE user_id = $3")
            .bind(role.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.database.pool)
            .await
            .context("Failed to update user role")?;

        self.cache_drop(user_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_find_roundtrip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteUserRepository::new(db);

        let user = User::new("U123", "analyst-1", Role::Analyst);
        repo.create(&user).await.unwrap();

        let by_id = repo.find_by_id(&user.user_id).await.unwrap().unwrap();
        assert_eq!(by_id.chat_id, "U123");
        assert_eq!(by_id.role, Role::Analyst);

        let by_chat = repo.find_by_chat_id("U123").await.unwrap().unwrap();
        assert_eq!(by_chat.user_id, user.user_id);
    }

    #[tokio::test]
    async fn test_chat_id_is_unique() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteUserRepository::new(db);

        repo.create(&User::new("U1", "first", Role::Trader))
            .await
            .unwrap();
        let duplicate = repo.create(&User::new("U1", "second", Role::Trader)).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_status_update_invalidates_cache() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteUserRepository::new(db);

        let user = User::new("U2", "trader-2", Role::Trader);
        repo.create(&user).await.unwrap();

        repo.set_status(&user.user_id, UserStatus::Suspended)
            .await
            .unwrap();
        let reloaded = repo.find_by_id(&user.user_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, UserStatus::Suspended);
    }
}
