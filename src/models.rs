use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub profile_picture: Option<String>,
    pub is_email_verified: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    // Social-only accounts have no usable password
    pub fn has_usable_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for User {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let date_joined_str: String = row.try_get("date_joined")?;
        let last_login_str: Option<String> = row.try_get("last_login")?;

        let date_joined = parse_timestamp("date_joined", &date_joined_str)?;
        let last_login = last_login_str
            .map(|value| parse_timestamp("last_login", &value))
            .transpose()?;

        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            is_active: row.try_get("is_active")?,
            profile_picture: row.try_get("profile_picture")?,
            is_email_verified: row.try_get("is_email_verified")?,
            date_joined,
            last_login,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_email_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialAccount {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub uid: String,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SocialAccount {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let created_at_str: String = row.try_get("created_at")?;

        Ok(SocialAccount {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            provider: row.try_get("provider")?,
            uid: row.try_get("uid")?,
            created_at: parse_timestamp("created_at", &created_at_str)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Info => "info",
            MessageLevel::Success => "success",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        }
    }
}

// One-shot notice carried across a redirect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: MessageLevel,
    pub text: String,
}

impl FlashMessage {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "ramesh".to_string(),
            email: Some("ramesh@example.com".to_string()),
            password_hash: None,
            is_active: true,
            profile_picture: None,
            is_email_verified: false,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    #[test]
    fn test_user_display_is_username() {
        let user = sample_user();
        assert_eq!(user.to_string(), "ramesh");
        assert_eq!(format!("{}", user), user.username);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let mut user = sample_user();
        user.password_hash = Some("$argon2id$secret".to_string());

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("\"is_email_verified\":false"));
    }

    #[test]
    fn test_usable_password() {
        let mut user = sample_user();
        assert!(!user.has_usable_password());
        user.password_hash = Some("hash".to_string());
        assert!(user.has_usable_password());
    }
}
