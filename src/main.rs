use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use account_portal::{
    build_router, mailer_from_config, AccountService, AppState, AuthService, Config, Database,
    MediaStorage, OAuth2Config, RecaptchaVerifier, SessionManager, SocialAccountRepository,
    TokenGenerator, UserRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "account_portal=debug,tower_http=debug,tower_sessions=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("SECRET_KEY must be set")?;
    if config.debug {
        tracing::warn!("DEBUG is enabled, do not run this configuration in production");
    }
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection and run migrations
    let database = Database::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    tracing::info!("Database initialized and migrations completed");

    let user_repository = UserRepository::new(database.pool().clone());
    let social_accounts = SocialAccountRepository::new(database.pool().clone());

    // Initialize OAuth2 clients
    let oauth2_config = OAuth2Config::new(&config)?;
    tracing::info!(
        "OAuth2 clients configured for: {:?}",
        oauth2_config.enabled_providers()
    );
    let auth_service = AuthService::new(oauth2_config, user_repository.clone(), social_accounts);

    // Account workflows
    let mailer = mailer_from_config(&config.email)?;
    let tokens = TokenGenerator::new(
        &config.secret_key,
        chrono::Duration::seconds(config.password_reset_timeout_secs),
    );
    let media = MediaStorage::new(&config.media_root, &config.media_url);
    tokio::fs::create_dir_all(media.root())
        .await
        .with_context(|| format!("failed to create media root {}", media.root().display()))?;
    let account_service = AccountService::new(
        user_repository,
        tokens,
        mailer,
        media,
        config.base_url.clone(),
    );

    let captcha = config.recaptcha_secret_key.clone().map(RecaptchaVerifier::new);
    if captcha.is_none() {
        tracing::warn!("RECAPTCHA_SECRET_KEY not set, CAPTCHA checks are disabled");
    }

    // Set up session management
    let session_manager = SessionManager::new(config.base_url.starts_with("https://"));
    let session_layer = session_manager.layer();
    tracing::info!("Session management configured");

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid BIND_ADDRESS {}", config.bind_address))?;

    // Create application state
    let app_state = AppState {
        auth_service,
        account_service,
        config: Arc::new(config),
        captcha,
    };
    let app = build_router(app_state, session_layer);

    // Run the server
    tracing::info!("Account portal starting on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server is ready to accept connections");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down gracefully...");
        },
    }
}
