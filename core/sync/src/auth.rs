//! Access credentials for provider APIs.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::{basic::BasicClient, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use airweave_common::{Error, Result};

/// Supplies bearer tokens to the fetch client.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token.
    async fn get_access_token(&self) -> Result<String>;

    /// New access token after the provider rejected the current one.
    async fn refresh_on_unauthorized(&self) -> Result<String>;
}

/// A fixed token that cannot be refreshed.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_access_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    async fn refresh_on_unauthorized(&self) -> Result<String> {
        Err(Error::Authentication(
            "Static access token was rejected and cannot be refreshed".to_string(),
        ))
    }
}

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Refresh-token grant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub token_url: String,
}

/// Caches an access token and refreshes it through the OAuth2 token endpoint.
pub struct OAuthTokenManager {
    config: OAuthConfig,
    tokens: RwLock<Tokens>,
}

impl OAuthTokenManager {
    pub fn new(config: OAuthConfig, tokens: Tokens) -> Self {
        Self {
            config,
            tokens: RwLock::new(tokens),
        }
    }

    /// Manager holding only a refresh token; the first call refreshes.
    pub fn from_refresh_token(config: OAuthConfig, refresh_token: impl Into<String>) -> Self {
        Self::new(
            config,
            Tokens {
                access_token: String::new(),
                refresh_token: refresh_token.into(),
                expires_at: DateTime::<Utc>::MIN_UTC,
            },
        )
    }

    /// Get the current tokens.
    pub async fn get_tokens(&self) -> Tokens {
        self.tokens.read().await.clone()
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let token_url = TokenUrl::new(self.config.token_url.clone())
            .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?;

        let mut client = BasicClient::new(ClientId::new(self.config.client_id.clone()));
        if let Some(secret) = &self.config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        let client = client.set_token_uri(token_url);

        let http = oauth2::reqwest::Client::builder()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to build token client: {}", e)))?;

        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        let access_token = token_result.access_token().secret().clone();

        // Refresh tokens may or may not be returned in refresh response
        let new_refresh_token = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());

        let expires_in = token_result
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));

        let expires_at = Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        Ok(Tokens {
            access_token,
            refresh_token: new_refresh_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenManager {
    async fn get_access_token(&self) -> Result<String> {
        let tokens = self.tokens.read().await;

        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        drop(tokens);

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        info!("Refreshing expired access token");
        let new_tokens = self.refresh(&tokens.refresh_token).await?;
        *tokens = new_tokens;

        Ok(tokens.access_token.clone())
    }

    async fn refresh_on_unauthorized(&self) -> Result<String> {
        let mut tokens = self.tokens.write().await;

        info!("Refreshing rejected access token");
        let new_tokens = self.refresh(&tokens.refresh_token).await?;
        *tokens = new_tokens;

        Ok(tokens.access_token.clone())
    }
}
