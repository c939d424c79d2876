use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::AppError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "123456", "12345678", "123456789", "1234567890", "password", "password1", "password123",
    "qwerty", "qwerty123", "qwertyuiop", "abc123", "111111", "123123", "iloveyou", "admin",
    "admin123", "welcome", "welcome1", "letmein", "monkey", "dragon", "football", "baseball",
    "sunshine", "princess", "master", "shadow", "superman", "trustno1", "passw0rd", "starwars",
    "whatever", "freedom", "michael", "jennifer", "hello123", "changeme", "1q2w3e4r",
    "zaq12wsx", "asdfghjkl", "computer", "internet", "secret", "login", "google",
];

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::PasswordHash(e.to_string()))
}

// Malformed hashes verify as false rather than erroring
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash could not be parsed: {}", e);
            false
        }
    }
}

/// Runs the password policy and returns every violated rule.
///
/// `username` and `email` feed the similarity check; either may be empty.
pub fn validate_password(password: &str, username: &str, email: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if let Some(attribute) = too_similar(password, username, email) {
        errors.push(format!("The password is too similar to the {attribute}."));
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }

    let lowered = password.trim().to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        errors.push("This password is too common.".to_string());
    }

    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        errors.push("This password is entirely numeric.".to_string());
    }

    errors
}

fn too_similar(password: &str, username: &str, email: &str) -> Option<&'static str> {
    let password = password.to_lowercase();
    let email_local = email.split('@').next().unwrap_or_default();

    let candidates = [("username", username), ("email address", email_local)];
    candidates.into_iter().find_map(|(label, value)| {
        let value = value.to_lowercase();
        if value.chars().count() < 3 {
            return None;
        }
        if password.contains(&value) || value.contains(&password) {
            Some(label)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("Correct-Horse-7").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Correct-Horse-7", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn test_same_password_different_salts() {
        let first = hash_password("SamePassword123").unwrap();
        let second = hash_password("SamePassword123").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_verify_with_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_strong_password_passes() {
        let errors = validate_password("Tr1cky-Lantern", "sita", "sita@example.com");
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_short_password_rejected() {
        let errors = validate_password("Ab3$", "sita", "sita@example.com");
        assert!(errors.iter().any(|e| e.contains("too short")));
    }

    #[test]
    fn test_numeric_password_rejected() {
        let errors = validate_password("90817263544", "sita", "");
        assert!(errors.iter().any(|e| e.contains("entirely numeric")));
    }

    #[test]
    fn test_common_password_rejected() {
        let errors = validate_password("Password123", "sita", "");
        assert!(errors.iter().any(|e| e.contains("too common")));
    }

    #[test]
    fn test_similar_to_username_rejected() {
        let errors = validate_password("kathmandu2024!", "Kathmandu", "");
        assert_eq!(errors, vec!["The password is too similar to the username.".to_string()]);
    }

    #[test]
    fn test_similar_to_email_rejected() {
        let errors = validate_password("xy-hari.prasad-zz", "someone", "hari.prasad@example.com");
        assert!(errors.iter().any(|e| e.contains("email address")));
    }
}
