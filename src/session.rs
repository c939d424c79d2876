use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{de::DeserializeOwned, Serialize};
use tower_sessions::{cookie::SameSite, MemoryStore, Session, SessionManagerLayer};

use crate::{
    error::{AppError, AuthError},
    models::{FlashMessage, MessageLevel, SessionData, User},
};

// Session keys
const USER_SESSION_KEY: &str = "user_session";
const CSRF_TOKEN_KEY: &str = "csrf_token";
const PKCE_VERIFIER_KEY: &str = "pkce_verifier";
const MESSAGES_KEY: &str = "messages";

pub const SESSION_COOKIE_NAME: &str = "portal_session";

#[derive(Debug, Clone)]
pub struct SessionManager {
    store: MemoryStore,
    secure: bool,
}

impl SessionManager {
    pub fn new(secure: bool) -> Self {
        Self {
            store: MemoryStore::default(),
            secure,
        }
    }

    pub fn layer(&self) -> SessionManagerLayer<MemoryStore> {
        SessionManagerLayer::new(self.store.clone())
            .with_secure(self.secure)
            .with_same_site(SameSite::Lax)
            .with_http_only(true)
            .with_name(SESSION_COOKIE_NAME)
    }
}

async fn read<T: DeserializeOwned>(session: &Session, key: &str) -> Result<Option<T>, AppError> {
    session.get::<T>(key).await.map_err(|e| {
        tracing::error!("Failed to read session key {}: {}", key, e);
        AppError::Auth(AuthError::InvalidSession)
    })
}

async fn write<T: Serialize + Send + Sync>(session: &Session, key: &str, value: T) -> Result<(), AppError> {
    session.insert(key, value).await.map_err(|e| {
        tracing::error!("Failed to write session key {}: {}", key, e);
        AppError::Auth(AuthError::InvalidSession)
    })
}

async fn take<T: DeserializeOwned>(session: &Session, key: &str) -> Result<Option<T>, AppError> {
    session.remove::<T>(key).await.map_err(|e| {
        tracing::error!("Failed to remove session key {}: {}", key, e);
        AppError::Auth(AuthError::InvalidSession)
    })
}

// Session extension trait for easier session management
pub trait SessionExt {
    async fn get_user_session(&self) -> Result<Option<SessionData>, AppError>;
    async fn set_user_session(&self, user: &User) -> Result<(), AppError>;
    async fn clear_user_session(&self) -> Result<(), AppError>;
    async fn set_oauth_state(&self, csrf_token: String, pkce_verifier: String) -> Result<(), AppError>;
    async fn take_oauth_state(&self) -> Result<(Option<String>, Option<String>), AppError>;
    async fn push_message(&self, level: MessageLevel, text: &str) -> Result<(), AppError>;
    async fn take_messages(&self) -> Result<Vec<FlashMessage>, AppError>;
}

impl SessionExt for Session {
    async fn get_user_session(&self) -> Result<Option<SessionData>, AppError> {
        read(self, USER_SESSION_KEY).await
    }

    async fn set_user_session(&self, user: &User) -> Result<(), AppError> {
        // New session ID on login to prevent fixation
        self.cycle_id().await.map_err(|e| {
            tracing::error!("Failed to cycle session id: {}", e);
            AppError::Auth(AuthError::InvalidSession)
        })?;

        let session_data = SessionData {
            user_id: user.id,
            username: user.username.clone(),
        };
        write(self, USER_SESSION_KEY, session_data).await?;
        tracing::info!("User session created for user ID: {}", user.id);
        Ok(())
    }

    async fn clear_user_session(&self) -> Result<(), AppError> {
        take::<SessionData>(self, USER_SESSION_KEY).await?;
        take::<String>(self, CSRF_TOKEN_KEY).await?;
        take::<String>(self, PKCE_VERIFIER_KEY).await?;
        tracing::info!("User session cleared");
        Ok(())
    }

    async fn set_oauth_state(&self, csrf_token: String, pkce_verifier: String) -> Result<(), AppError> {
        write(self, CSRF_TOKEN_KEY, csrf_token).await?;
        write(self, PKCE_VERIFIER_KEY, pkce_verifier).await
    }

    // State is single-use: reading it removes it
    async fn take_oauth_state(&self) -> Result<(Option<String>, Option<String>), AppError> {
        let csrf_token = take::<String>(self, CSRF_TOKEN_KEY).await?;
        let pkce_verifier = take::<String>(self, PKCE_VERIFIER_KEY).await?;
        Ok((csrf_token, pkce_verifier))
    }

    async fn push_message(&self, level: MessageLevel, text: &str) -> Result<(), AppError> {
        let mut messages: Vec<FlashMessage> = read(self, MESSAGES_KEY).await?.unwrap_or_default();
        messages.push(FlashMessage::new(level, text));
        write(self, MESSAGES_KEY, messages).await
    }

    async fn take_messages(&self) -> Result<Vec<FlashMessage>, AppError> {
        Ok(take::<Vec<FlashMessage>>(self, MESSAGES_KEY)
            .await?
            .unwrap_or_default())
    }
}

// Authenticated user extractor
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub session_data: SessionData,
    pub session: Session,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Auth(AuthError::InvalidSession))?;

        match session.get_user_session().await? {
            Some(session_data) => Ok(AuthenticatedUser {
                session_data,
                session,
            }),
            None => Err(AppError::Auth(AuthError::NotAuthenticated)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    fn sample_user() -> User {
        User {
            id: 3,
            username: "laxmi".to_string(),
            email: None,
            password_hash: None,
            is_active: true,
            profile_picture: None,
            is_email_verified: false,
            date_joined: chrono::Utc::now(),
            last_login: None,
        }
    }

    #[tokio::test]
    async fn test_session_manager_creation() {
        let session_manager = SessionManager::new(false);
        let _layer = session_manager.layer();
    }

    #[tokio::test]
    async fn test_user_session_roundtrip() {
        let session = test_session();
        assert!(session.get_user_session().await.unwrap().is_none());

        session.set_user_session(&sample_user()).await.unwrap();
        let data = session.get_user_session().await.unwrap().unwrap();
        assert_eq!(data.user_id, 3);
        assert_eq!(data.username, "laxmi");

        session.clear_user_session().await.unwrap();
        assert!(session.get_user_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oauth_state_is_single_use() {
        let session = test_session();
        session
            .set_oauth_state("csrf".to_string(), "verifier".to_string())
            .await
            .unwrap();

        let (csrf, verifier) = session.take_oauth_state().await.unwrap();
        assert_eq!(csrf.as_deref(), Some("csrf"));
        assert_eq!(verifier.as_deref(), Some("verifier"));

        let (csrf, verifier) = session.take_oauth_state().await.unwrap();
        assert!(csrf.is_none());
        assert!(verifier.is_none());
    }

    #[tokio::test]
    async fn test_flash_messages_drain() {
        let session = test_session();
        session
            .push_message(MessageLevel::Info, "first")
            .await
            .unwrap();
        session
            .push_message(MessageLevel::Error, "second")
            .await
            .unwrap();

        let messages = session.take_messages().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "first");
        assert_eq!(messages[1].level, MessageLevel::Error);
        assert!(session.take_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_data_serialization() {
        let session_data = SessionData {
            user_id: 1,
            username: "testuser".to_string(),
        };

        let serialized = serde_json::to_string(&session_data).unwrap();
        let deserialized: SessionData = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.user_id, 1);
        assert_eq!(deserialized.username, "testuser");
    }
}
