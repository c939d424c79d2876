use askama::Template;

use crate::{
    auth::Provider,
    media::MediaStorage,
    models::{FlashMessage, User},
};

// Values every page layout needs
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub current_user: Option<String>,
    pub messages: Vec<FlashMessage>,
    pub static_url: String,
}

#[derive(Debug, Clone)]
pub struct ProviderLink {
    pub slug: &'static str,
    pub name: &'static str,
}

impl From<Provider> for ProviderLink {
    fn from(provider: Provider) -> Self {
        Self {
            slug: provider.as_str(),
            name: provider.display_name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserView {
    pub username: String,
    pub email: Option<String>,
    pub is_email_verified: bool,
    pub profile_picture_url: Option<String>,
    pub date_joined: String,
}

impl UserView {
    pub fn new(user: &User, media: &MediaStorage) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            is_email_verified: user.is_email_verified,
            profile_picture_url: user.profile_picture.as_deref().map(|path| media.url(path)),
            date_joined: user.date_joined.format("%B %-d, %Y").to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub page: PageContext,
    pub user: Option<UserView>,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub page: PageContext,
    pub error: Option<String>,
    pub errors: Vec<String>,
    pub username: String,
    pub providers: Vec<ProviderLink>,
    pub recaptcha_site_key: Option<String>,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub username: String,
    pub email: String,
    pub providers: Vec<ProviderLink>,
    pub recaptcha_site_key: Option<String>,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub page: PageContext,
    pub user: UserView,
    pub linked_providers: Vec<String>,
}

#[derive(Template)]
#[template(path = "request_reset_password.html")]
pub struct RequestResetPasswordTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub email: String,
    pub sent: bool,
}

#[derive(Template)]
#[template(path = "set_new_password.html")]
pub struct SetNewPasswordTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub username: String,
}

#[derive(Template)]
#[template(path = "change_email.html")]
pub struct ChangeEmailTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub current_email: Option<String>,
    pub new_email: String,
}

#[derive(Template)]
#[template(path = "emails/activation.html")]
pub struct ActivationEmailTemplate {
    pub username: String,
    pub link: String,
}

#[derive(Template)]
#[template(path = "emails/password_reset.html")]
pub struct PasswordResetEmailTemplate {
    pub username: String,
    pub link: String,
}

#[derive(Template)]
#[template(path = "emails/email_change.html")]
pub struct EmailChangeEmailTemplate {
    pub username: String,
    pub new_email: String,
    pub link: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageLevel;

    fn page() -> PageContext {
        PageContext {
            static_url: "/staticfiles/".to_string(),
            ..PageContext::default()
        }
    }

    #[test]
    fn test_login_template_lists_providers_and_escapes_error() {
        let html = LoginTemplate {
            page: page(),
            error: Some("<script>alert(1)</script>".to_string()),
            errors: vec![],
            username: String::new(),
            providers: vec![Provider::Github.into(), Provider::Google.into()],
            recaptcha_site_key: None,
        }
        .render()
        .unwrap();

        assert!(html.contains("Sign in with GitHub"));
        assert!(html.contains("/auth/google"));
        assert!(!html.contains("<script>alert(1)"));
        assert!(!html.contains("g-recaptcha"));
    }

    #[test]
    fn test_base_layout_shows_messages_and_user() {
        let mut context = page();
        context.current_user = Some("hari".to_string());
        context.messages = vec![FlashMessage::new(MessageLevel::Success, "Saved!")];

        let html = HomeTemplate {
            page: context,
            user: None,
        }
        .render()
        .unwrap();

        assert!(html.contains("Saved!"));
        assert!(html.contains("message-success"));
        assert!(html.contains("hari"));
    }

    #[test]
    fn test_activation_email_contains_raw_link() {
        let html = ActivationEmailTemplate {
            username: "hari".to_string(),
            link: "http://localhost:3000/activate/MQ/a.b.c/".to_string(),
        }
        .render()
        .unwrap();

        assert!(html.contains("href=\"http://localhost:3000/activate/MQ/a.b.c/\""));
        assert!(html.contains("hari"));
    }
}
