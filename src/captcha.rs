use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::error::{AppError, AuthError};

pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Deserialize)]
pub struct SiteVerifyResponse {
    pub success: bool,
    #[serde(rename = "error-codes", default)]
    pub error_codes: Vec<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecaptchaVerifier {
    secret_key: String,
    verify_url: String,
    http_client: HttpClient,
}

impl RecaptchaVerifier {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self::with_verify_url(secret_key, RECAPTCHA_VERIFY_URL)
    }

    pub fn with_verify_url(secret_key: impl Into<String>, verify_url: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            verify_url: verify_url.into(),
            http_client: HttpClient::new(),
        }
    }

    pub async fn verify(&self, response: Option<&str>, remote_ip: Option<&str>) -> Result<(), AppError> {
        let response = match response.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Err(AuthError::CaptchaFailed.into()),
        };

        let mut params = vec![("secret", self.secret_key.as_str()), ("response", response)];
        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip));
        }

        let verify_response = self
            .http_client
            .post(&self.verify_url)
            .form(&params)
            .send()
            .await?;

        if !verify_response.status().is_success() {
            tracing::error!("CAPTCHA verification returned HTTP {}", verify_response.status());
            return Err(AuthError::CaptchaFailed.into());
        }

        let result: SiteVerifyResponse = verify_response.json().await?;
        if result.success {
            Ok(())
        } else {
            tracing::warn!("CAPTCHA rejected: {:?}", result.error_codes);
            Err(AuthError::CaptchaFailed.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn verifier_for(server: &MockServer) -> RecaptchaVerifier {
        RecaptchaVerifier::with_verify_url("test-secret", format!("{}/siteverify", server.uri()))
    }

    #[tokio::test]
    async fn test_successful_verification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .and(body_string_contains("secret=test-secret"))
            .and(body_string_contains("response=good-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "hostname": "localhost"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = verifier_for(&server).await;
        assert!(verifier.verify(Some("good-token"), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_verification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/siteverify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error-codes": ["invalid-input-response"]
            })))
            .mount(&server)
            .await;

        let verifier = verifier_for(&server).await;
        let result = verifier.verify(Some("bad-token"), Some("127.0.0.1")).await;
        assert!(matches!(result, Err(AppError::Auth(AuthError::CaptchaFailed))));
    }

    #[tokio::test]
    async fn test_missing_response_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let verifier = verifier_for(&server).await;
        assert!(verifier.verify(None, None).await.is_err());
        assert!(verifier.verify(Some("   "), None).await.is_err());
    }

    #[test]
    fn test_site_verify_response_deserialization() {
        let json = r#"{"success": false, "error-codes": ["missing-input-secret"]}"#;
        let parsed: SiteVerifyResponse = serde_json::from_str(json).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_codes, vec!["missing-input-secret".to_string()]);
        assert!(parsed.hostname.is_none());
    }
}
