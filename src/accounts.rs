use std::sync::Arc;

use askama::Template;

use crate::{
    database::UserRepository,
    error::{AppError, AuthError},
    forms::{normalize_email, EmailChangeForm, SetPasswordForm, SignUpForm},
    mail::{Mailer, OutgoingEmail},
    media::MediaStorage,
    models::{CreateUser, User},
    password::{hash_password, verify_password},
    templates::{ActivationEmailTemplate, EmailChangeEmailTemplate, PasswordResetEmailTemplate},
    tokens::{decode_uid, encode_uid, TokenGenerator, TokenPurpose},
};

/// Outcome of a form-driven workflow: either done, or the messages to show
/// back on the form.
#[derive(Debug)]
pub enum FormOutcome<T> {
    Done(T),
    Invalid(Vec<String>),
}

impl<T> FormOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, FormOutcome::Done(_))
    }
}

#[derive(Clone)]
pub struct AccountService {
    users: UserRepository,
    tokens: TokenGenerator,
    mailer: Arc<dyn Mailer>,
    media: MediaStorage,
    base_url: String,
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AccountService {
    pub fn new(
        users: UserRepository,
        tokens: TokenGenerator,
        mailer: Arc<dyn Mailer>,
        media: MediaStorage,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            tokens,
            mailer,
            media,
            base_url: base_url.into(),
        }
    }

    pub fn media(&self) -> &MediaStorage {
        &self.media
    }

    pub async fn find_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        self.users.find_by_id(user_id).await
    }

    fn link(&self, route: &str, user: &User, token: &str) -> String {
        format!("{}/{}/{}/{}/", self.base_url, route, encode_uid(user.id), token)
    }

    async fn user_from_uid(&self, uidb64: &str) -> Result<User, AppError> {
        let user_id = decode_uid(uidb64).ok_or(AuthError::InvalidLink)?;
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::InvalidLink.into())
    }

    pub async fn register(&self, form: &SignUpForm) -> Result<FormOutcome<User>, AppError> {
        let mut errors = form.clean();
        let username = form.username.trim();
        let email = normalize_email(&form.email);

        if self.users.find_by_username(username).await?.is_some() {
            errors.push("A user with that username already exists.".to_string());
        }
        if self.users.find_by_email(&email).await?.is_some() {
            errors.push("This email is already taken by another user.".to_string());
        }
        if !errors.is_empty() {
            return Ok(FormOutcome::Invalid(errors));
        }

        let user = self
            .users
            .create_user(CreateUser {
                username: username.to_string(),
                email: Some(email),
                password_hash: Some(hash_password(&form.password1)?),
                is_email_verified: false,
            })
            .await?;

        tracing::info!("Registered user {}", user);

        // Without the activation mail the account could never be verified
        if let Err(e) = self.send_activation_email(&user).await {
            tracing::error!("Activation mail for {} failed, removing the account: {}", user, e);
            self.users.delete_user(user.id).await?;
            return Err(e);
        }
        Ok(FormOutcome::Done(user))
    }

    pub async fn send_activation_email(&self, user: &User) -> Result<(), AppError> {
        let Some(email) = user.email.as_deref() else {
            return Ok(());
        };

        let token = self.tokens.make_token(user, TokenPurpose::Activation, None)?;
        let body = ActivationEmailTemplate {
            username: user.username.clone(),
            link: self.link("activate", user, &token),
        }
        .render()?;

        self.mailer
            .send(OutgoingEmail::new(email, "Activate your account", body))
            .await
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AppError> {
        let user = self
            .users
            .find_by_username(username.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let valid = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash));
        if !valid {
            tracing::warn!("Failed login attempt for {}", username);
            return Err(AuthError::InvalidCredentials.into());
        }
        if !user.is_active {
            return Err(AuthError::InactiveAccount.into());
        }

        self.users.update_last_login(user.id).await?;
        Ok(user)
    }

    pub async fn activate(&self, uidb64: &str, token: &str) -> Result<User, AppError> {
        let user = self.user_from_uid(uidb64).await?;
        self.tokens.check_token(&user, token, TokenPurpose::Activation)?;

        self.users.mark_email_verified(user.id).await?;
        tracing::info!("Email verified for user {}", user);
        Ok(User {
            is_email_verified: true,
            ..user
        })
    }

    // Unknown addresses are ignored so the response does not reveal accounts
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AppError> {
        let Some(user) = self.users.find_by_email(&normalize_email(email)).await? else {
            tracing::info!("Password reset requested for unknown address");
            return Ok(());
        };
        if !user.is_active {
            return Ok(());
        }
        let Some(address) = user.email.clone() else {
            return Ok(());
        };

        let token = self.tokens.make_token(&user, TokenPurpose::PasswordReset, None)?;
        let body = PasswordResetEmailTemplate {
            username: user.username.clone(),
            link: self.link("set-new-password", &user, &token),
        }
        .render()?;

        self.mailer
            .send(OutgoingEmail::new(address, "Reset your password", body))
            .await
    }

    pub async fn check_password_reset_link(&self, uidb64: &str, token: &str) -> Result<User, AppError> {
        let user = self.user_from_uid(uidb64).await?;
        self.tokens.check_token(&user, token, TokenPurpose::PasswordReset)?;
        Ok(user)
    }

    pub async fn set_new_password(
        &self,
        uidb64: &str,
        token: &str,
        form: &SetPasswordForm,
    ) -> Result<FormOutcome<User>, AppError> {
        let user = self.check_password_reset_link(uidb64, token).await?;

        let errors = form.clean(&user.username, user.email.as_deref().unwrap_or_default());
        if !errors.is_empty() {
            return Ok(FormOutcome::Invalid(errors));
        }

        let password_hash = hash_password(&form.new_password1)?;
        self.users.update_password(user.id, &password_hash).await?;
        tracing::info!("Password reset completed for user {}", user);

        Ok(FormOutcome::Done(User {
            password_hash: Some(password_hash),
            ..user
        }))
    }

    pub async fn request_email_change(
        &self,
        user: &User,
        form: &EmailChangeForm,
    ) -> Result<FormOutcome<String>, AppError> {
        let mut errors = form.clean();
        let new_email = normalize_email(&form.new_email);

        if errors.is_empty() {
            if let Some(owner) = self.users.find_by_email(&new_email).await? {
                if owner.id == user.id {
                    errors.push("This is already your email address.".to_string());
                } else {
                    errors.push("This email is already taken by another user.".to_string());
                }
            }
        }
        if !errors.is_empty() {
            return Ok(FormOutcome::Invalid(errors));
        }

        let token = self
            .tokens
            .make_token(user, TokenPurpose::EmailChange, Some(&new_email))?;
        let body = EmailChangeEmailTemplate {
            username: user.username.clone(),
            new_email: new_email.clone(),
            link: self.link("confirm-email-change", user, &token),
        }
        .render()?;

        self.mailer
            .send(OutgoingEmail::new(new_email.clone(), "Confirm your new email address", body))
            .await?;
        Ok(FormOutcome::Done(new_email))
    }

    pub async fn confirm_email_change(&self, uidb64: &str, token: &str) -> Result<User, AppError> {
        let user = self.user_from_uid(uidb64).await?;
        let claims = self.tokens.check_token(&user, token, TokenPurpose::EmailChange)?;
        let new_email = claims.new_email.ok_or(AuthError::InvalidLink)?;

        // The address may have been claimed while the link was in flight
        if let Some(owner) = self.users.find_by_email(&new_email).await? {
            if owner.id != user.id {
                return Err(AuthError::InvalidLink.into());
            }
        }

        self.users.update_email(user.id, &new_email).await?;
        tracing::info!("Email changed for user {}", user);
        Ok(User {
            email: Some(new_email),
            is_email_verified: true,
            ..user
        })
    }

    pub async fn set_profile_picture(
        &self,
        user: &User,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<String, AppError> {
        let relative = self
            .media
            .save_profile_picture(file_name, content_type, bytes)
            .await?;
        self.users.set_profile_picture(user.id, Some(&relative)).await?;

        if let Some(previous) = user.profile_picture.as_deref() {
            if let Err(e) = self.media.delete(previous).await {
                tracing::warn!("Could not remove old profile picture {}: {}", previous, e);
            }
        }

        Ok(relative)
    }

    pub async fn delete_account(&self, user: &User) -> Result<(), AppError> {
        if !self.users.delete_user(user.id).await? {
            return Err(AppError::NotFound);
        }
        if let Some(picture) = user.profile_picture.as_deref() {
            if let Err(e) = self.media.delete(picture).await {
                tracing::warn!("Could not remove profile picture {}: {}", picture, e);
            }
        }

        tracing::info!("Deleted account {}", user);
        Ok(())
    }
}
