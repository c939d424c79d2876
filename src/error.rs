use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;

use crate::config::LOGIN_URL;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] std::env::VarError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] oauth2::url::ParseError),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Upload rejected: {0}")]
    Upload(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Not found")]
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OAuth2 state mismatch")]
    StateMismatch,

    #[error("Failed to exchange code for token: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch user profile: {0}")]
    ProfileFetch(String),

    #[error("User not authenticated")]
    NotAuthenticated,

    #[error("Invalid OAuth2 provider: {0}")]
    InvalidProvider(String),

    #[error("Missing OAuth2 authorization code")]
    MissingAuthCode,

    #[error("Invalid session")]
    InvalidSession,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Account is inactive")]
    InactiveAccount,

    #[error("Invalid or expired link")]
    InvalidLink,

    #[error("CAPTCHA verification failed")]
    CaptchaFailed,
}

impl AuthError {
    // Message shown to the visitor on the login page
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::StateMismatch => "Security error during login. Please try again.",
            AuthError::TokenExchange(_) => "Failed to complete login. Please try again.",
            AuthError::ProfileFetch(_) => "Failed to retrieve your profile. Please try again.",
            AuthError::InvalidProvider(_) => "Invalid login provider selected.",
            AuthError::MissingAuthCode => "Login was incomplete. Please try again.",
            AuthError::InvalidCredentials => {
                "Please enter a correct username and password. Note that both fields may be case-sensitive."
            }
            AuthError::InactiveAccount => "This account is inactive.",
            AuthError::InvalidLink => "The link is invalid or has expired.",
            AuthError::CaptchaFailed => "CAPTCHA verification failed. Please try again.",
            _ => "Authentication failed. Please try again.",
        }
    }
}

fn json_error(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "message": message
        })),
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            // Authentication errors that should redirect to login
            AppError::Auth(AuthError::NotAuthenticated)
            | AppError::Auth(AuthError::InvalidSession) => {
                tracing::warn!("Authentication required, redirecting to login: {}", self);
                Redirect::to(LOGIN_URL).into_response()
            }

            // Everything else auth-related lands on the login page with a message
            AppError::Auth(auth_error) => {
                tracing::error!("Authentication error: {}", auth_error);
                let redirect_url = format!(
                    "{}?error={}",
                    LOGIN_URL,
                    urlencoding::encode(auth_error.user_message())
                );
                Redirect::to(&redirect_url).into_response()
            }

            AppError::Database(ref db_error) => {
                tracing::error!("Database error: {}", db_error);
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error",
                    "A database error occurred. Please try again later.",
                )
            }

            AppError::Template(ref template_error) => {
                tracing::error!("Template error: {}", template_error);
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Template error",
                    "A page rendering error occurred.",
                )
            }

            AppError::Http(ref http_error) => {
                tracing::error!("HTTP client error: {}", http_error);
                json_error(
                    StatusCode::BAD_GATEWAY,
                    "External service error",
                    "Failed to communicate with external service. Please try again later.",
                )
            }

            AppError::Mail(ref mail_error) => {
                tracing::error!("Mail error: {}", mail_error);
                json_error(
                    StatusCode::BAD_GATEWAY,
                    "Mail delivery error",
                    "We could not send the email. Please try again later.",
                )
            }

            AppError::Upload(ref reason) => {
                tracing::warn!("Upload rejected: {}", reason);
                json_error(StatusCode::BAD_REQUEST, "Invalid upload", reason)
            }

            AppError::NotFound => json_error(StatusCode::NOT_FOUND, "Not found", "Page not found."),

            AppError::Config(_)
            | AppError::InvalidUrl(_)
            | AppError::Migration(_)
            | AppError::Storage(_)
            | AppError::PasswordHash(_)
            | AppError::Token(_) => {
                tracing::error!("Internal error: {}", self);
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                    "An internal server error occurred.",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_auth_error_not_authenticated_redirects() {
        let error = AppError::Auth(AuthError::NotAuthenticated);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = response.headers().get("location").unwrap();
        assert_eq!(location, LOGIN_URL);
    }

    #[tokio::test]
    async fn test_auth_error_state_mismatch_redirects_with_error() {
        let error = AppError::Auth(AuthError::StateMismatch);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = response.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.starts_with("/accounts/login/?error="));
        assert!(location.contains("Security%20error"));
    }

    #[tokio::test]
    async fn test_invalid_link_redirects_with_error() {
        let error = AppError::Auth(AuthError::InvalidLink);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.contains("invalid%20or%20has%20expired"));
    }

    #[tokio::test]
    async fn test_auth_error_invalid_provider() {
        let error = AppError::Auth(AuthError::InvalidProvider("myspace".to_string()));
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = response.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.contains("Invalid%20login%20provider"));
    }

    #[tokio::test]
    async fn test_database_error_returns_500() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_template_error_returns_500() {
        let error = AppError::Template(askama::Error::Fmt(std::fmt::Error));
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_mail_error_returns_502() {
        let error = AppError::Mail("connection refused".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_upload_error_returns_400() {
        let error = AppError::Upload("unsupported file type".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_found_returns_404() {
        let response = AppError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_error_returns_500() {
        let error = AppError::Config(std::env::VarError::NotPresent);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_auth_error_display() {
        let error = AuthError::StateMismatch;
        assert_eq!(error.to_string(), "OAuth2 state mismatch");

        let error = AuthError::TokenExchange("server error".to_string());
        assert_eq!(error.to_string(), "Failed to exchange code for token: server error");

        let error = AuthError::InvalidCredentials;
        assert_eq!(error.to_string(), "Invalid username or password");
    }

    #[test]
    fn test_app_error_from_conversions() {
        let app_error: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(app_error, AppError::Database(_)));

        let app_error: AppError = AuthError::NotAuthenticated.into();
        assert!(matches!(app_error, AppError::Auth(_)));

        let app_error: AppError = std::env::VarError::NotPresent.into();
        assert!(matches!(app_error, AppError::Config(_)));
    }
}
