use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{AppError, AuthError},
    models::User,
};

pub fn encode_uid(user_id: i64) -> String {
    URL_SAFE_NO_PAD.encode(user_id.to_string())
}

pub fn decode_uid(uidb64: &str) -> Option<i64> {
    let bytes = URL_SAFE_NO_PAD.decode(uidb64).ok()?;
    String::from_utf8(bytes).ok()?.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Activation,
    PasswordReset,
    EmailChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkClaims {
    pub sub: i64,
    pub purpose: TokenPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
    // Digest of the user's mutable state at issue time
    pub fp: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and checks the signed tokens embedded in emailed links.
///
/// Tokens are bound to a fingerprint of the account state, so any change the
/// link itself causes (verifying, resetting the password, changing the
/// address) invalidates it.
#[derive(Clone)]
pub struct TokenGenerator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGenerator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenGenerator {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn make_token(
        &self,
        user: &User,
        purpose: TokenPurpose,
        new_email: Option<&str>,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = LinkClaims {
            sub: user.id,
            purpose,
            new_email: new_email.map(str::to_string),
            fp: fingerprint(user),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn check_token(
        &self,
        user: &User,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<LinkClaims, AuthError> {
        let data = decode::<LinkClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| {
                tracing::debug!("Rejected link token: {}", e);
                AuthError::InvalidLink
            })?;

        let claims = data.claims;
        if claims.sub != user.id || claims.purpose != purpose || claims.fp != fingerprint(user) {
            return Err(AuthError::InvalidLink);
        }

        Ok(claims)
    }
}

fn fingerprint(user: &User) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.id.to_le_bytes());
    hasher.update(user.password_hash.as_deref().unwrap_or_default());
    hasher.update([0u8]);
    hasher.update(user.email.as_deref().unwrap_or_default());
    hasher.update([0u8]);
    hasher.update([user.is_email_verified as u8, user.is_active as u8]);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 12,
            username: "anita".to_string(),
            email: Some("anita@example.com".to_string()),
            password_hash: Some("$argon2id$v=19$placeholder".to_string()),
            is_active: true,
            profile_picture: None,
            is_email_verified: false,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    fn generator() -> TokenGenerator {
        TokenGenerator::new("test-secret", Duration::days(3))
    }

    #[test]
    fn test_uid_encoding() {
        assert_eq!(encode_uid(12), "MTI");
        assert_eq!(decode_uid("MTI"), Some(12));
        assert_eq!(decode_uid("not base64!"), None);
        assert_eq!(decode_uid(&URL_SAFE_NO_PAD.encode("abc")), None);
    }

    #[test]
    fn test_valid_token_accepted() {
        let user = sample_user();
        let tokens = generator();

        let token = tokens
            .make_token(&user, TokenPurpose::Activation, None)
            .unwrap();
        let claims = tokens
            .check_token(&user, &token, TokenPurpose::Activation)
            .unwrap();
        assert_eq!(claims.sub, 12);
        assert!(claims.new_email.is_none());
    }

    #[test]
    fn test_token_rejected_for_other_purpose() {
        let user = sample_user();
        let tokens = generator();

        let token = tokens
            .make_token(&user, TokenPurpose::Activation, None)
            .unwrap();
        assert!(matches!(
            tokens.check_token(&user, &token, TokenPurpose::PasswordReset),
            Err(AuthError::InvalidLink)
        ));
    }

    #[test]
    fn test_token_rejected_after_state_change() {
        let mut user = sample_user();
        let tokens = generator();

        let token = tokens
            .make_token(&user, TokenPurpose::Activation, None)
            .unwrap();
        user.is_email_verified = true;
        assert!(tokens
            .check_token(&user, &token, TokenPurpose::Activation)
            .is_err());

        let mut user = sample_user();
        let token = tokens
            .make_token(&user, TokenPurpose::PasswordReset, None)
            .unwrap();
        user.password_hash = Some("$argon2id$v=19$changed".to_string());
        assert!(tokens
            .check_token(&user, &token, TokenPurpose::PasswordReset)
            .is_err());
    }

    #[test]
    fn test_token_rejected_for_other_user() {
        let user = sample_user();
        let mut other = sample_user();
        other.id = 13;
        let tokens = generator();

        let token = tokens
            .make_token(&user, TokenPurpose::PasswordReset, None)
            .unwrap();
        assert!(tokens
            .check_token(&other, &token, TokenPurpose::PasswordReset)
            .is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let user = sample_user();
        let tokens = TokenGenerator::new("test-secret", Duration::minutes(-5));

        let token = tokens
            .make_token(&user, TokenPurpose::Activation, None)
            .unwrap();
        assert!(tokens
            .check_token(&user, &token, TokenPurpose::Activation)
            .is_err());
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let user = sample_user();
        let token = TokenGenerator::new("another-secret", Duration::days(1))
            .make_token(&user, TokenPurpose::Activation, None)
            .unwrap();

        assert!(generator()
            .check_token(&user, &token, TokenPurpose::Activation)
            .is_err());
    }

    #[test]
    fn test_email_change_token_carries_new_address() {
        let user = sample_user();
        let tokens = generator();

        let token = tokens
            .make_token(&user, TokenPurpose::EmailChange, Some("new@example.com"))
            .unwrap();
        let claims = tokens
            .check_token(&user, &token, TokenPurpose::EmailChange)
            .unwrap();
        assert_eq!(claims.new_email.as_deref(), Some("new@example.com"));
    }
}
