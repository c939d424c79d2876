use std::{collections::HashMap, fmt, str::FromStr};

use oauth2::{
    basic::BasicClient, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::Client as HttpClient;
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    config::{Config, ProviderCredentials},
    database::{SocialAccountRepository, UserRepository},
    error::{AppError, AuthError},
    forms::{normalize_email, MAX_USERNAME_LENGTH},
    models::{CreateUser, User},
};

const USER_AGENT: &str = "account-portal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Facebook,
    Twitter,
    Github,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Facebook,
        Provider::Twitter,
        Provider::Github,
        Provider::Google,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Facebook => "facebook",
            Provider::Twitter => "twitter",
            Provider::Github => "github",
            Provider::Google => "google",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Facebook => "Facebook",
            Provider::Twitter => "X (Twitter)",
            Provider::Github => "GitHub",
            Provider::Google => "Google",
        }
    }

    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            Provider::Facebook => &["email", "public_profile"],
            Provider::Twitter => &["users.read", "tweet.read"],
            Provider::Github => &["user:email"],
            Provider::Google => &["openid", "email", "profile"],
        }
    }

    pub fn default_endpoints(self) -> ProviderEndpoints {
        match self {
            Provider::Facebook => ProviderEndpoints {
                auth_url: "https://www.facebook.com/v18.0/dialog/oauth".to_string(),
                token_url: "https://graph.facebook.com/v18.0/oauth/access_token".to_string(),
                profile_url: "https://graph.facebook.com/me?fields=id,name,email".to_string(),
                emails_url: None,
            },
            Provider::Twitter => ProviderEndpoints {
                auth_url: "https://twitter.com/i/oauth2/authorize".to_string(),
                token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
                profile_url: "https://api.twitter.com/2/users/me".to_string(),
                emails_url: None,
            },
            Provider::Github => ProviderEndpoints {
                auth_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                profile_url: "https://api.github.com/user".to_string(),
                emails_url: Some("https://api.github.com/user/emails".to_string()),
            },
            Provider::Google => ProviderEndpoints {
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                profile_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
                emails_url: None,
            },
        }
    }

    fn credentials(self, config: &Config) -> Option<&ProviderCredentials> {
        match self {
            Provider::Facebook => config.social.facebook.as_ref(),
            Provider::Twitter => config.social.twitter.as_ref(),
            Provider::Github => config.social.github.as_ref(),
            Provider::Google => config.social.google.as_ref(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AuthError::InvalidProvider(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub emails_url: Option<String>,
}

#[derive(Debug, Clone)]
struct ProviderClient {
    client: BasicClient,
    endpoints: ProviderEndpoints,
}

#[derive(Debug, Clone)]
pub struct OAuth2Config {
    clients: HashMap<Provider, ProviderClient>,
    http_client: HttpClient,
}

impl OAuth2Config {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        Self::with_endpoints(config, Provider::default_endpoints)
    }

    pub fn with_endpoints(
        config: &Config,
        endpoints_for: impl Fn(Provider) -> ProviderEndpoints,
    ) -> Result<Self, AppError> {
        let mut clients = HashMap::new();

        for provider in Provider::ALL {
            let Some(credentials) = provider.credentials(config) else {
                continue;
            };
            let endpoints = endpoints_for(provider);

            let mut client = BasicClient::new(
                ClientId::new(credentials.client_id.clone()),
                Some(ClientSecret::new(credentials.client_secret.clone())),
                AuthUrl::new(endpoints.auth_url.clone())?,
                Some(TokenUrl::new(endpoints.token_url.clone())?),
            )
            .set_redirect_uri(RedirectUrl::new(format!(
                "{}/auth/callback/{}",
                config.base_url, provider
            ))?);

            // Facebook only reads client credentials from the request body
            if provider == Provider::Facebook {
                client = client.set_auth_type(AuthType::RequestBody);
            }

            tracing::debug!("OAuth2 client configured for {}", provider);
            clients.insert(provider, ProviderClient { client, endpoints });
        }

        Ok(OAuth2Config {
            clients,
            http_client: HttpClient::new(),
        })
    }

    pub fn enabled_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|provider| self.clients.contains_key(provider))
            .collect()
    }

    fn client(&self, provider: Provider) -> Result<&ProviderClient, AuthError> {
        self.clients
            .get(&provider)
            .ok_or_else(|| AuthError::InvalidProvider(provider.to_string()))
    }
}

pub struct AuthorizationRequest {
    pub url: String,
    pub csrf_token: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

// Provider profile reduced to what account creation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub uid: String,
    pub username: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct FacebookUserProfile {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TwitterUserResponse {
    pub data: TwitterUser,
}

#[derive(Debug, Deserialize)]
pub struct TwitterUser {
    pub id: String,
    pub name: Option<String>,
    pub username: String,
}

// GitHub API user profile response
#[derive(Debug, Deserialize)]
pub struct GitHubUserProfile {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

// GitHub API email response
#[derive(Debug, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl From<FacebookUserProfile> for SocialProfile {
    fn from(profile: FacebookUserProfile) -> Self {
        // Facebook only exposes confirmed addresses
        let email_verified = profile.email.is_some();
        SocialProfile {
            username: profile.name.unwrap_or_else(|| format!("facebook_{}", profile.id)),
            uid: profile.id,
            email: profile.email,
            email_verified,
        }
    }
}

impl From<TwitterUserResponse> for SocialProfile {
    fn from(response: TwitterUserResponse) -> Self {
        SocialProfile {
            uid: response.data.id,
            username: response.data.username,
            email: None,
            email_verified: false,
        }
    }
}

impl From<GoogleUserInfo> for SocialProfile {
    fn from(info: GoogleUserInfo) -> Self {
        let username = info
            .email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .map(str::to_string)
            .or(info.name)
            .unwrap_or_else(|| format!("google_{}", info.sub));

        SocialProfile {
            uid: info.sub,
            username,
            email: info.email,
            email_verified: info.email_verified,
        }
    }
}

/// Reduces a display name to the username alphabet, padding names too short
/// to satisfy the sign-up rules.
pub fn sanitize_username(candidate: &str, provider: Provider) -> String {
    let mut username: String = candidate
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        .take(MAX_USERNAME_LENGTH - 8)
        .collect();

    if username.chars().count() < 4 {
        username = format!("{}_{}", provider, username).trim_end_matches('_').to_string();
        if username.chars().count() < 4 {
            username.push_str("_user");
        }
    }
    username
}

#[derive(Debug, Clone)]
pub struct AuthService {
    oauth2_config: OAuth2Config,
    user_repository: UserRepository,
    social_accounts: SocialAccountRepository,
}

impl AuthService {
    pub fn new(
        oauth2_config: OAuth2Config,
        user_repository: UserRepository,
        social_accounts: SocialAccountRepository,
    ) -> Self {
        Self {
            oauth2_config,
            user_repository,
            social_accounts,
        }
    }

    pub fn enabled_providers(&self) -> Vec<Provider> {
        self.oauth2_config.enabled_providers()
    }

    pub async fn linked_providers(&self, user_id: i64) -> Result<Vec<Provider>, AppError> {
        let accounts = self.social_accounts.list_for_user(user_id).await?;
        Ok(accounts
            .iter()
            .filter_map(|account| account.provider.parse().ok())
            .collect())
    }

    pub fn initiate_auth(&self, provider: Provider) -> Result<AuthorizationRequest, AuthError> {
        let provider_client = self.oauth2_config.client(provider)?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_token) = provider_client
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(
                provider
                    .scopes()
                    .iter()
                    .map(|scope| Scope::new(scope.to_string())),
            )
            .set_pkce_challenge(pkce_challenge)
            .url();

        Ok(AuthorizationRequest {
            url: auth_url.to_string(),
            csrf_token,
            pkce_verifier,
        })
    }

    pub async fn handle_callback(
        &self,
        provider: Provider,
        code: String,
        state: String,
        expected_csrf_token: CsrfToken,
        pkce_verifier: Option<PkceCodeVerifier>,
    ) -> Result<User, AppError> {
        // Verify CSRF token
        if state != *expected_csrf_token.secret() {
            return Err(AuthError::StateMismatch.into());
        }

        let provider_client = self.oauth2_config.client(provider)?;

        let mut exchange = provider_client
            .client
            .exchange_code(AuthorizationCode::new(code));
        if let Some(verifier) = pkce_verifier {
            exchange = exchange.set_pkce_verifier(verifier);
        }

        let token_result = exchange
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;
        let access_token = token_result.access_token().secret();

        let profile = self
            .fetch_profile(provider, &provider_client.endpoints, access_token)
            .await?;

        self.find_or_create_user(provider, profile).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, access_token: &str) -> Result<T, AuthError> {
        let response = self
            .oauth2_config
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::ProfileFetch(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::ProfileFetch(e.to_string()))
    }

    async fn fetch_profile(
        &self,
        provider: Provider,
        endpoints: &ProviderEndpoints,
        access_token: &str,
    ) -> Result<SocialProfile, AuthError> {
        match provider {
            Provider::Facebook => {
                let profile: FacebookUserProfile =
                    self.get_json(&endpoints.profile_url, access_token).await?;
                Ok(profile.into())
            }
            Provider::Twitter => {
                let response: TwitterUserResponse =
                    self.get_json(&endpoints.profile_url, access_token).await?;
                Ok(response.into())
            }
            Provider::Google => {
                let info: GoogleUserInfo = self.get_json(&endpoints.profile_url, access_token).await?;
                Ok(info.into())
            }
            Provider::Github => {
                let profile: GitHubUserProfile =
                    self.get_json(&endpoints.profile_url, access_token).await?;

                // Public GitHub addresses are always verified
                let mut email = profile.email.clone();
                let mut email_verified = email.is_some();

                // If email is not public, fetch it from the emails endpoint
                if email.is_none() {
                    if let Some(emails_url) = &endpoints.emails_url {
                        match self.get_json::<Vec<GitHubEmail>>(emails_url, access_token).await {
                            Ok(emails) => {
                                email = emails
                                    .into_iter()
                                    .find(|entry| entry.primary && entry.verified)
                                    .map(|entry| entry.email);
                                email_verified = email.is_some();
                            }
                            Err(e) => tracing::warn!("Could not fetch GitHub emails: {}", e),
                        }
                    }
                }

                Ok(SocialProfile {
                    uid: profile.id.to_string(),
                    username: profile.login,
                    email,
                    email_verified,
                })
            }
        }
    }

    async fn find_or_create_user(
        &self,
        provider: Provider,
        profile: SocialProfile,
    ) -> Result<User, AppError> {
        if let Some(existing_user) = self
            .social_accounts
            .find_user_by_provider_uid(provider.as_str(), &profile.uid)
            .await?
        {
            if !existing_user.is_active {
                return Err(AuthError::InactiveAccount.into());
            }
            tracing::debug!("Existing {} account linked to user {}", provider, existing_user.id);
            return self.record_login(existing_user.id).await;
        }

        let username = self
            .unique_username(&sanitize_username(&profile.username, provider))
            .await?;

        // Addresses already owned by another account are not copied over
        let mut email = profile.email.as_deref().map(normalize_email);
        if let Some(address) = &email {
            if self.user_repository.find_by_email(address).await?.is_some() {
                tracing::warn!("{} email {} already belongs to another account", provider, address);
                email = None;
            }
        }

        let user = self
            .user_repository
            .create_user(CreateUser {
                username,
                is_email_verified: email.is_some() && profile.email_verified,
                email,
                password_hash: None,
            })
            .await?;

        self.social_accounts
            .link(user.id, provider.as_str(), &profile.uid)
            .await?;

        tracing::info!("Created user {} from {} login", user.username, provider);
        self.record_login(user.id).await
    }

    // Returns the user as stored after the login timestamp is written
    async fn record_login(&self, user_id: i64) -> Result<User, AppError> {
        self.user_repository.update_last_login(user_id).await?;
        self.user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn unique_username(&self, base: &str) -> Result<String, AppError> {
        if self.user_repository.find_by_username(base).await?.is_none() {
            return Ok(base.to_string());
        }

        let mut suffix = 1u32;
        loop {
            let candidate = format!("{base}{suffix}");
            if self.user_repository.find_by_username(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }
}
