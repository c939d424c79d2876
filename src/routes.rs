use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tower_sessions::{MemoryStore, SessionManagerLayer};

use crate::{
    handlers::{
        activate_handler, change_email_handler, change_email_page_handler,
        confirm_email_change_handler, delete_account_handler, home_handler, login_handler,
        login_page_handler, logout_handler, profile_handler, profile_picture_handler,
        register_handler, register_page_handler, request_reset_handler,
        request_reset_page_handler, set_new_password_handler, set_new_password_page_handler,
        social_auth_handler, social_callback_handler, AppState,
    },
    media::MAX_UPLOAD_BYTES,
};

// Room for multipart framing around the largest accepted image
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

fn mount_point(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

pub fn build_router(state: AppState, session_layer: SessionManagerLayer<MemoryStore>) -> Router {
    let static_mount = mount_point(&state.config.static_url);
    let media_mount = mount_point(&state.config.media_url);
    let static_files = ServeDir::new(&state.config.static_dir);
    let media_files = ServeDir::new(&state.config.media_root);

    Router::new()
        // Root route
        .route("/", get(home_handler))

        // Account routes (public)
        .route(
            "/accounts/register/",
            get(register_page_handler).post(register_handler),
        )
        .route("/accounts/login/", get(login_page_handler).post(login_handler))
        .route("/accounts/logout/", post(logout_handler))
        .route("/activate/:uidb64/:token/", get(activate_handler))
        .route(
            "/request-reset-password/",
            get(request_reset_page_handler).post(request_reset_handler),
        )
        .route(
            "/set-new-password/:uidb64/:token/",
            get(set_new_password_page_handler).post(set_new_password_handler),
        )
        .route(
            "/confirm-email-change/:uidb64/:token/",
            get(confirm_email_change_handler),
        )

        // Social login routes (public)
        .route("/auth/:provider", get(social_auth_handler))
        .route("/auth/callback/:provider", get(social_callback_handler))

        // Protected routes (require authentication)
        .route(
            "/change-email/",
            get(change_email_page_handler).post(change_email_handler),
        )
        .route("/profile/", get(profile_handler))
        .route(
            "/profile/picture/",
            post(profile_picture_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/profile/delete/", post(delete_account_handler))

        // File serving
        .nest_service(&static_mount, static_files)
        .nest_service(&media_mount, media_files)

        // Add application state and middleware
        .with_state(state)
        .layer(session_layer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("same-origin"),
                )),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_point_normalization() {
        assert_eq!(mount_point("/staticfiles/"), "/staticfiles");
        assert_eq!(mount_point("mediafiles/"), "/mediafiles");
        assert_eq!(mount_point("/media"), "/media");
    }
}
