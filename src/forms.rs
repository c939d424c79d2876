use serde::Deserialize;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::password::validate_password;

pub const MAX_USERNAME_LENGTH: usize = 150;
const MIN_USERNAME_LENGTH: usize = 4;

// Messages for invalid fields, grouped in field-name order

fn validation_messages(result: Result<(), ValidationErrors>) -> Vec<String> {
    let Err(errors) = result else {
        return Vec::new();
    };

    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(_, field_errors)| field_errors.iter())
        .map(|error| {
            error
                .message
                .as_ref()
                .map(|msg| msg.to_string())
                .unwrap_or_else(|| format!("Invalid value ({})", error.code))
        })
        .collect()
}

// Lowercases the domain part, leaving the mailbox as typed
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

// Usernames are stored trimmed, so the length rule applies to the trimmed value
fn username_long_enough(username: &str) -> Result<(), ValidationError> {
    if username.trim().chars().count() < MIN_USERNAME_LENGTH {
        let mut error = ValidationError::new("length");
        error.message = Some("Name is too Short".into());
        return Err(error);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct SignUpForm {
    #[validate(custom(function = "username_long_enough"))]
    pub username: String,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    pub password1: String,
    pub password2: String,
    #[serde(rename = "g-recaptcha-response")]
    pub captcha_response: Option<String>,
}

impl SignUpForm {
    pub fn clean(&self) -> Vec<String> {
        let mut errors = validation_messages(self.validate());

        let username = self.username.trim();
        if username.chars().count() > MAX_USERNAME_LENGTH {
            errors.push(format!(
                "Ensure this value has at most {MAX_USERNAME_LENGTH} characters."
            ));
        }
        if !username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        {
            errors.push(
                "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                    .to_string(),
            );
        }

        if self.password1 != self.password2 {
            errors.push("The two password fields didn't match.".to_string());
        } else {
            errors.extend(validate_password(&self.password1, username, &self.email));
        }

        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct LogInForm {
    #[validate(length(min = 1, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
    #[serde(rename = "g-recaptcha-response")]
    pub captcha_response: Option<String>,
}

impl LogInForm {
    pub fn clean(&self) -> Vec<String> {
        validation_messages(self.validate())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct EmailChangeForm {
    #[validate(email(message = "Enter a valid new email address."))]
    pub new_email: String,
    #[validate(email(message = "Enter a valid confirmation email address."))]
    pub confirm_email: String,
}

impl EmailChangeForm {
    pub fn clean(&self) -> Vec<String> {
        let mut errors = validation_messages(self.validate());
        if normalize_email(&self.new_email) != normalize_email(&self.confirm_email) {
            errors.push("The new email addresses do not match.".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct PasswordResetRequestForm {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
}

impl PasswordResetRequestForm {
    pub fn clean(&self) -> Vec<String> {
        validation_messages(self.validate())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetPasswordForm {
    pub new_password1: String,
    pub new_password2: String,
}

impl SetPasswordForm {
    pub fn clean(&self, username: &str, email: &str) -> Vec<String> {
        if self.new_password1 != self.new_password2 {
            return vec!["The two password fields didn't match.".to_string()];
        }
        validate_password(&self.new_password1, username, email)
    }
}
