use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use askama::Template;
use oauth2::{CsrfToken, PkceCodeVerifier};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{
    accounts::{AccountService, FormOutcome},
    auth::{AuthService, Provider},
    captcha::RecaptchaVerifier,
    config::{Config, LOGIN_URL},
    error::{AppError, AuthError},
    forms::{EmailChangeForm, LogInForm, PasswordResetRequestForm, SetPasswordForm, SignUpForm},
    models::{MessageLevel, User},
    session::{AuthenticatedUser, SessionExt},
    templates::{
        ChangeEmailTemplate, HomeTemplate, LoginTemplate, PageContext, ProfileTemplate,
        ProviderLink, RegisterTemplate, RequestResetPasswordTemplate, SetNewPasswordTemplate,
        UserView,
    },
};

const PROFILE_URL: &str = "/profile/";

// Application state
#[derive(Debug, Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub account_service: AccountService,
    pub config: Arc<Config>,
    pub captcha: Option<RecaptchaVerifier>,
}

impl AppState {
    fn providers(&self) -> Vec<ProviderLink> {
        self.auth_service
            .enabled_providers()
            .into_iter()
            .map(ProviderLink::from)
            .collect()
    }

    fn recaptcha_site_key(&self) -> Option<String> {
        self.captcha
            .as_ref()
            .and(self.config.recaptcha_site_key.clone())
    }

    // Form-level CAPTCHA failures come back as a message for the form
    async fn check_captcha(&self, response: Option<&str>) -> Result<Option<String>, AppError> {
        let Some(verifier) = &self.captcha else {
            return Ok(None);
        };
        match verifier.verify(response, None).await {
            Ok(()) => Ok(None),
            Err(AppError::Auth(error @ AuthError::CaptchaFailed)) => {
                Ok(Some(error.user_message().to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

// Query parameters for OAuth2 callbacks
#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// Query parameters for login page
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

async fn page_context(state: &AppState, session: &Session) -> Result<PageContext, AppError> {
    Ok(PageContext {
        current_user: session
            .get_user_session()
            .await?
            .map(|session_data| session_data.username),
        messages: session.take_messages().await?,
        static_url: state.config.static_url.clone(),
    })
}

fn render<T: Template>(template: T) -> Result<Response, AppError> {
    Ok(Html(template.render()?).into_response())
}

// Loads the logged-in user, dropping sessions whose account no longer exists
async fn current_user(state: &AppState, authenticated_user: &AuthenticatedUser) -> Result<User, AppError> {
    match state
        .account_service
        .find_user(authenticated_user.session_data.user_id)
        .await?
    {
        Some(user) => Ok(user),
        None => {
            authenticated_user.session.clear_user_session().await?;
            Err(AuthError::NotAuthenticated.into())
        }
    }
}

// Root route handler
pub async fn home_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    let user = match session.get_user_session().await? {
        Some(session_data) => state
            .account_service
            .find_user(session_data.user_id)
            .await?
            .map(|user| UserView::new(&user, state.account_service.media())),
        None => None,
    };

    render(HomeTemplate {
        page: page_context(&state, &session).await?,
        user,
    })
}

// Registration
pub async fn register_page_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    render(RegisterTemplate {
        page: page_context(&state, &session).await?,
        errors: Vec::new(),
        username: String::new(),
        email: String::new(),
        providers: state.providers(),
        recaptcha_site_key: state.recaptcha_site_key(),
    })
}

pub async fn register_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<SignUpForm>,
) -> Result<Response, AppError> {
    let outcome = match state.check_captcha(form.captcha_response.as_deref()).await? {
        Some(message) => FormOutcome::Invalid(vec![message]),
        None => state.account_service.register(&form).await?,
    };

    match outcome {
        FormOutcome::Done(user) => {
            session
                .push_message(
                    MessageLevel::Success,
                    "Please confirm your email address to complete the registration.",
                )
                .await?;
            tracing::info!("Sign-up completed for {}", user);
            Ok(Redirect::to(LOGIN_URL).into_response())
        }
        FormOutcome::Invalid(errors) => render(RegisterTemplate {
            page: page_context(&state, &session).await?,
            errors,
            username: form.username,
            email: form.email,
            providers: state.providers(),
            recaptcha_site_key: state.recaptcha_site_key(),
        }),
    }
}

// Authentication route handlers
pub async fn login_page_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    render(LoginTemplate {
        page: page_context(&state, &session).await?,
        error: query.error,
        errors: Vec::new(),
        username: String::new(),
        providers: state.providers(),
        recaptcha_site_key: state.recaptcha_site_key(),
    })
}

pub async fn login_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LogInForm>,
) -> Result<Response, AppError> {
    let mut errors = form.clean();
    if errors.is_empty() {
        if let Some(message) = state.check_captcha(form.captcha_response.as_deref()).await? {
            errors.push(message);
        }
    }

    if errors.is_empty() {
        match state
            .account_service
            .authenticate(&form.username, &form.password)
            .await
        {
            Ok(user) => {
                session.set_user_session(&user).await?;
                tracing::info!("User {} logged in", user);
                return Ok(Redirect::to(&state.config.login_redirect_url).into_response());
            }
            Err(AppError::Auth(
                error @ (AuthError::InvalidCredentials | AuthError::InactiveAccount),
            )) => errors.push(error.user_message().to_string()),
            Err(e) => return Err(e),
        }
    }

    render(LoginTemplate {
        page: page_context(&state, &session).await?,
        error: None,
        errors,
        username: form.username,
        providers: state.providers(),
        recaptcha_site_key: state.recaptcha_site_key(),
    })
}

pub async fn logout_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    session.clear_user_session().await?;
    session
        .push_message(MessageLevel::Info, "You have been logged out.")
        .await?;

    tracing::info!("User logged out successfully");
    Ok(Redirect::to(&state.config.logout_redirect_url).into_response())
}

// Emailed links
pub async fn activate_handler(
    State(state): State<AppState>,
    session: Session,
    Path((uidb64, token)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let user = state.account_service.activate(&uidb64, &token).await?;
    session
        .push_message(
            MessageLevel::Success,
            "Thank you for your email confirmation. Now you can log in to your account.",
        )
        .await?;

    tracing::info!("Email verified for {}", user);
    Ok(Redirect::to(LOGIN_URL).into_response())
}

pub async fn request_reset_page_handler(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    render(RequestResetPasswordTemplate {
        page: page_context(&state, &session).await?,
        errors: Vec::new(),
        email: String::new(),
        sent: false,
    })
}

pub async fn request_reset_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<PasswordResetRequestForm>,
) -> Result<Response, AppError> {
    let errors = form.clean();
    let sent = errors.is_empty();
    if sent {
        state
            .account_service
            .request_password_reset(&form.email)
            .await?;
    }

    render(RequestResetPasswordTemplate {
        page: page_context(&state, &session).await?,
        errors,
        email: form.email,
        sent,
    })
}

pub async fn set_new_password_page_handler(
    State(state): State<AppState>,
    session: Session,
    Path((uidb64, token)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let user = state
        .account_service
        .check_password_reset_link(&uidb64, &token)
        .await?;

    render(SetNewPasswordTemplate {
        page: page_context(&state, &session).await?,
        errors: Vec::new(),
        username: user.username,
    })
}

pub async fn set_new_password_handler(
    State(state): State<AppState>,
    session: Session,
    Path((uidb64, token)): Path<(String, String)>,
    Form(form): Form<SetPasswordForm>,
) -> Result<Response, AppError> {
    match state
        .account_service
        .set_new_password(&uidb64, &token, &form)
        .await?
    {
        FormOutcome::Done(_) => {
            session
                .push_message(
                    MessageLevel::Success,
                    "Your password has been set. You may go ahead and log in now.",
                )
                .await?;
            Ok(Redirect::to(LOGIN_URL).into_response())
        }
        FormOutcome::Invalid(errors) => {
            let user = state
                .account_service
                .check_password_reset_link(&uidb64, &token)
                .await?;
            render(SetNewPasswordTemplate {
                page: page_context(&state, &session).await?,
                errors,
                username: user.username,
            })
        }
    }
}

pub async fn change_email_page_handler(
    authenticated_user: AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user = current_user(&state, &authenticated_user).await?;

    render(ChangeEmailTemplate {
        page: page_context(&state, &authenticated_user.session).await?,
        errors: Vec::new(),
        current_email: user.email,
        new_email: String::new(),
    })
}

pub async fn change_email_handler(
    authenticated_user: AuthenticatedUser,
    State(state): State<AppState>,
    Form(form): Form<EmailChangeForm>,
) -> Result<Response, AppError> {
    let user = current_user(&state, &authenticated_user).await?;
    let session = &authenticated_user.session;

    match state
        .account_service
        .request_email_change(&user, &form)
        .await?
    {
        FormOutcome::Done(new_email) => {
            session
                .push_message(
                    MessageLevel::Info,
                    &format!("A confirmation link has been sent to {}.", new_email),
                )
                .await?;
            Ok(Redirect::to(PROFILE_URL).into_response())
        }
        FormOutcome::Invalid(errors) => render(ChangeEmailTemplate {
            page: page_context(&state, session).await?,
            errors,
            current_email: user.email,
            new_email: form.new_email,
        }),
    }
}

pub async fn confirm_email_change_handler(
    State(state): State<AppState>,
    session: Session,
    Path((uidb64, token)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let user = state
        .account_service
        .confirm_email_change(&uidb64, &token)
        .await?;
    session
        .push_message(MessageLevel::Success, "Your email address has been updated.")
        .await?;

    tracing::info!("Email change confirmed for {}", user);
    Ok(Redirect::to(PROFILE_URL).into_response())
}

// Protected route handlers
pub async fn profile_handler(
    authenticated_user: AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user = current_user(&state, &authenticated_user).await?;
    let linked_providers = state
        .auth_service
        .linked_providers(user.id)
        .await?
        .into_iter()
        .map(|provider| provider.display_name().to_string())
        .collect();

    render(ProfileTemplate {
        page: page_context(&state, &authenticated_user.session).await?,
        user: UserView::new(&user, state.account_service.media()),
        linked_providers,
    })
}

async fn read_profile_picture(
    multipart: &mut Multipart,
) -> Result<(String, Option<String>, Vec<u8>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Upload(e.body_text()))?
    {
        if field.name() != Some("profile_picture") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Upload(e.body_text()))?;
        return Ok((file_name, content_type, bytes.to_vec()));
    }

    Err(AppError::Upload("No file was submitted.".to_string()))
}

pub async fn profile_picture_handler(
    authenticated_user: AuthenticatedUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let user = current_user(&state, &authenticated_user).await?;
    let session = &authenticated_user.session;

    let stored = match read_profile_picture(&mut multipart).await {
        Ok((file_name, content_type, bytes)) => {
            state
                .account_service
                .set_profile_picture(&user, &file_name, content_type.as_deref(), &bytes)
                .await
        }
        Err(e) => Err(e),
    };

    match stored {
        Ok(_) => {
            session
                .push_message(MessageLevel::Success, "Your profile picture has been updated.")
                .await?
        }
        Err(AppError::Upload(reason)) => session.push_message(MessageLevel::Error, &reason).await?,
        Err(e) => return Err(e),
    }

    Ok(Redirect::to(PROFILE_URL).into_response())
}

pub async fn delete_account_handler(
    authenticated_user: AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let user = current_user(&state, &authenticated_user).await?;
    state.account_service.delete_account(&user).await?;

    let session = &authenticated_user.session;
    session.clear_user_session().await?;
    session
        .push_message(MessageLevel::Info, "Your account has been deleted.")
        .await?;

    Ok(Redirect::to("/").into_response())
}

// Social login
pub async fn social_auth_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    session: Session,
) -> Result<Response, AppError> {
    let provider: Provider = provider.parse()?;
    let request = state.auth_service.initiate_auth(provider)?;

    // Store CSRF token and PKCE verifier in session
    session
        .set_oauth_state(
            request.csrf_token.secret().clone(),
            request.pkce_verifier.secret().clone(),
        )
        .await?;

    Ok(Redirect::to(&request.url).into_response())
}

pub async fn social_callback_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<AuthCallbackQuery>,
    session: Session,
) -> Result<Response, AppError> {
    let provider: Provider = provider.parse()?;

    // Check for OAuth2 error
    if let Some(error) = query.error {
        tracing::error!("{} OAuth2 error: {}", provider, error);
        let message = format!(
            "{} authentication failed. Please try again.",
            provider.display_name()
        );
        return Ok(Redirect::to(&format!(
            "{}?error={}",
            LOGIN_URL,
            urlencoding::encode(&message)
        ))
        .into_response());
    }

    // Get authorization code
    let code = query.code.ok_or(AuthError::MissingAuthCode)?;
    let state_param = query.state.ok_or(AuthError::StateMismatch)?;

    // The callback is only valid for a flow this session started
    let (stored_csrf_token, pkce_verifier) = session.take_oauth_state().await?;
    let csrf_token = CsrfToken::new(stored_csrf_token.ok_or(AuthError::StateMismatch)?);

    let user = state
        .auth_service
        .handle_callback(
            provider,
            code,
            state_param,
            csrf_token,
            pkce_verifier.map(PkceCodeVerifier::new),
        )
        .await?;

    session.set_user_session(&user).await?;

    tracing::info!("User {} successfully authenticated via {}", user.username, provider);
    Ok(Redirect::to(&state.config.login_redirect_url).into_response())
}
