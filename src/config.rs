use std::{env, path::PathBuf};

pub const LOGIN_URL: &str = "/accounts/login/";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub base_url: String,
    pub bind_address: String,
    pub secret_key: String,
    pub debug: bool,
    pub static_url: String,
    pub static_dir: PathBuf,
    pub media_url: String,
    pub media_root: PathBuf,
    pub login_redirect_url: String,
    pub logout_redirect_url: String,
    pub password_reset_timeout_secs: i64,
    pub email: EmailConfig,
    pub social: SocialAuthConfig,
    pub recaptcha_secret_key: Option<String>,
    pub recaptcha_site_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailBackend {
    Smtp,
    Console,
    Memory,
}

impl EmailBackend {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => EmailBackend::Console,
            "memory" | "locmem" => EmailBackend::Memory,
            _ => EmailBackend::Smtp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub backend: EmailBackend,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub host_user: Option<String>,
    pub host_password: Option<String>,
    pub from_address: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            backend: EmailBackend::Console,
            host: "smtp.gmail.com".to_string(),
            port: 587,
            use_tls: true,
            host_user: None,
            host_password: None,
            from_address: "noreply@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ProviderCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SocialAuthConfig {
    pub facebook: Option<ProviderCredentials>,
    pub twitter: Option<ProviderCredentials>,
    pub github: Option<ProviderCredentials>,
    pub google: Option<ProviderCredentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:account_portal.db".to_string(),
            base_url: "http://localhost:3000".to_string(),
            bind_address: "127.0.0.1:3000".to_string(),
            secret_key: "insecure-development-secret-key".to_string(),
            debug: true,
            static_url: "/staticfiles/".to_string(),
            static_dir: PathBuf::from("staticfiles"),
            media_url: "/mediafiles/".to_string(),
            media_root: PathBuf::from("staticfiles/mediafiles"),
            login_redirect_url: "/".to_string(),
            logout_redirect_url: "/".to_string(),
            password_reset_timeout_secs: 259_200,
            email: EmailConfig::default(),
            social: SocialAuthConfig::default(),
            recaptcha_secret_key: None,
            recaptcha_site_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        Ok(Config {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            base_url: env::var("BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            secret_key: env::var("SECRET_KEY")?,
            debug: env_flag("DEBUG").unwrap_or(false),
            static_url: env::var("STATIC_URL").unwrap_or(defaults.static_url),
            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            media_url: env::var("MEDIA_URL").unwrap_or(defaults.media_url),
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            login_redirect_url: env::var("LOGIN_REDIRECT_URL")
                .unwrap_or(defaults.login_redirect_url),
            logout_redirect_url: env::var("LOGOUT_REDIRECT_URL")
                .unwrap_or(defaults.logout_redirect_url),
            password_reset_timeout_secs: env::var("PASSWORD_RESET_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.password_reset_timeout_secs),
            email: EmailConfig {
                backend: env::var("EMAIL_BACKEND")
                    .map(|v| EmailBackend::parse(&v))
                    .unwrap_or(EmailBackend::Smtp),
                host: env::var("EMAIL_HOST").unwrap_or(defaults.email.host),
                port: env::var("EMAIL_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.email.port),
                use_tls: env_flag("EMAIL_USE_TLS").unwrap_or(defaults.email.use_tls),
                host_user: non_empty_var("EMAIL_HOST_USER"),
                host_password: non_empty_var("EMAIL_HOST_PASSWORD"),
                from_address: non_empty_var("DEFAULT_FROM_EMAIL")
                    .or_else(|| non_empty_var("EMAIL_HOST_USER"))
                    .unwrap_or(defaults.email.from_address),
            },
            social: SocialAuthConfig {
                facebook: provider_credentials("FACEBOOK"),
                twitter: provider_credentials("TWITTER"),
                github: provider_credentials("GITHUB"),
                google: provider_credentials("GOOGLE"),
            },
            recaptcha_secret_key: non_empty_var("RECAPTCHA_SECRET_KEY"),
            recaptcha_site_key: non_empty_var("RECAPTCHA_SITE_KEY"),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

// Both halves must be present for a provider to be enabled
fn provider_credentials(prefix: &str) -> Option<ProviderCredentials> {
    let client_id = non_empty_var(&format!("{prefix}_CLIENT_ID"))?;
    let client_secret = non_empty_var(&format!("{prefix}_CLIENT_SECRET"))?;
    Some(ProviderCredentials::new(client_id, client_secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_development_settings() {
        let config = Config::default();
        assert_eq!(config.static_url, "/staticfiles/");
        assert_eq!(config.media_url, "/mediafiles/");
        assert_eq!(config.email.port, 587);
        assert!(config.email.use_tls);
        assert_eq!(config.password_reset_timeout_secs, 259_200);
        assert!(config.social.github.is_none());
        assert!(config.recaptcha_secret_key.is_none());
    }

    #[test]
    fn test_email_backend_parse() {
        assert_eq!(EmailBackend::parse("console"), EmailBackend::Console);
        assert_eq!(EmailBackend::parse("LocMem"), EmailBackend::Memory);
        assert_eq!(EmailBackend::parse("smtp"), EmailBackend::Smtp);
        assert_eq!(EmailBackend::parse("anything-else"), EmailBackend::Smtp);
    }
}
