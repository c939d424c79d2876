use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePool, Sqlite};

use crate::{
    error::AppError,
    models::{CreateUser, SocialAccount, User},
};

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, profile_picture, \
                            is_email_verified, date_joined, last_login";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, AppError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            tracing::info!("Creating database {}", database_url);
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        tracing::info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // Emails compare case-insensitively
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower(?)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn create_user(&self, user: CreateUser) -> Result<User, AppError> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_active, profile_picture, is_email_verified, date_joined)
             VALUES (?, ?, ?, 1, NULL, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_email_verified)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let user_id = result.last_insert_rowid();
        tracing::debug!("Created user {} with ID {}", user.username, user_id);

        let created_user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(created_user)
    }

    pub async fn update_last_login(&self, user_id: i64) -> Result<(), AppError> {
        let now = chrono::Utc::now();

        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn mark_email_verified(&self, user_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET is_email_verified = 1 WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // A confirmed address change also counts as verification
    pub async fn update_email(&self, user_id: i64, email: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET email = ?, is_email_verified = 1 WHERE id = ?")
            .bind(email)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_profile_picture(
        &self,
        user_id: i64,
        profile_picture: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET profile_picture = ? WHERE id = ?")
            .bind(profile_picture)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete_user(&self, user_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct SocialAccountRepository {
    pool: SqlitePool,
}

impl SocialAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_user_by_provider_uid(
        &self,
        provider: &str,
        uid: &str,
    ) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.email, u.password_hash, u.is_active, u.profile_picture,
                    u.is_email_verified, u.date_joined, u.last_login
             FROM users u
             JOIN social_accounts s ON s.user_id = u.id
             WHERE s.provider = ? AND s.uid = ?",
        )
        .bind(provider)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn link(&self, user_id: i64, provider: &str, uid: &str) -> Result<SocialAccount, AppError> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            "INSERT INTO social_accounts (user_id, provider, uid, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(provider)
        .bind(uid)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let account = sqlx::query_as::<_, SocialAccount>(
            "SELECT id, user_id, provider, uid, created_at FROM social_accounts WHERE id = ?",
        )
        .bind(result.last_insert_rowid())
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<SocialAccount>, AppError> {
        let accounts = sqlx::query_as::<_, SocialAccount>(
            "SELECT id, user_id, provider, uid, created_at FROM social_accounts
             WHERE user_id = ? ORDER BY provider",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }
}
