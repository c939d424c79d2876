pub mod accounts;
pub mod auth;
pub mod captcha;
pub mod config;
pub mod database;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod mail;
pub mod media;
pub mod models;
pub mod password;
pub mod routes;
pub mod session;
pub mod templates;
pub mod tokens;

pub use accounts::{AccountService, FormOutcome};
pub use auth::{AuthService, OAuth2Config, Provider, ProviderEndpoints};
pub use captcha::RecaptchaVerifier;
pub use config::{Config, EmailBackend, LOGIN_URL};
pub use database::{Database, SocialAccountRepository, UserRepository};
pub use error::{AppError, AuthError};
pub use handlers::AppState;
pub use mail::{mailer_from_config, Mailer, MemoryMailer};
pub use media::MediaStorage;
pub use models::User;
pub use routes::build_router;
pub use session::{AuthenticatedUser, SessionExt, SessionManager};
pub use tokens::TokenGenerator;
