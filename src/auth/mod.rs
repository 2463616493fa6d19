//! Token acquisition for the recognize endpoint.
//!
//! The session never mutates a token; it asks its [`TokenProvider`] for the
//! current token before connecting and for a refresh after an
//! authentication-classified rejection.

use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

/// IBM IAM authentication endpoint.
pub const IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Legacy Watson authorization endpoint (Cloud Foundry era credentials).
pub const AUTHORIZATION_TOKEN_URL: &str =
    "https://stream.watsonplatform.net/authorization/api/v1/token";

/// Safety margin subtracted from a token's advertised lifetime.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(300);

/// An opaque bearer token with an implicit expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where the token is carried on the WebSocket upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPlacement {
    /// `X-Watson-Authorization-Token` request header.
    Header,
    /// `access_token` query parameter.
    Query,
}

/// Supplies and refreshes bearer tokens for the streaming session.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current token, fetching one if none is cached.
    async fn token(&self) -> Result<AuthToken>;

    /// Discard any cached token and fetch a fresh one.
    async fn refresh(&self) -> Result<AuthToken>;

    /// How the token is attached to the connect request.
    fn placement(&self) -> TokenPlacement;
}

// =============================================================================
// IAM provider
// =============================================================================

#[derive(Debug, Clone)]
struct CachedToken {
    token: AuthToken,
    expires_at: Instant,
}

impl CachedToken {
    /// Expired, or about to expire within the next minute.
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now() + Duration::from_secs(60)
    }
}

#[derive(Debug, serde::Deserialize)]
struct IamTokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: u64,
}

/// Token provider backed by the IBM IAM apikey grant.
///
/// Tokens are cached until shortly before their advertised expiry;
/// `refresh()` always re-fetches.
pub struct IamTokenProvider {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl IamTokenProvider {
    /// Create a provider against the public IAM endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(api_key, IAM_TOKEN_URL)
    }

    /// Create a provider against a custom endpoint (used in tests).
    pub fn with_endpoint(api_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Authentication("IAM api key is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Authentication(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            api_key,
            endpoint: endpoint.into(),
            client,
            cached: RwLock::new(None),
        })
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let encoded_api_key: String =
            url::form_urlencoded::byte_serialize(self.api_key.as_bytes()).collect();

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(format!(
                "grant_type=urn:ibm:params:oauth:grant-type:apikey&apikey={encoded_api_key}"
            ))
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("IAM token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::Authentication(format!(
                "IAM token request failed ({status}): {body}"
            )));
        }

        let token_response: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("failed to parse IAM token: {e}")))?;

        let lifetime = Duration::from_secs(
            token_response
                .expires_in
                .saturating_sub(EXPIRY_SAFETY_MARGIN.as_secs())
                .max(60),
        );
        debug!(expires_in = token_response.expires_in, "fetched IAM token");

        Ok(CachedToken {
            token: AuthToken::new(token_response.access_token),
            expires_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait::async_trait]
impl TokenProvider for IamTokenProvider {
    async fn token(&self) -> Result<AuthToken> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if !entry.is_expired() {
                    return Ok(entry.token.clone());
                }
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<AuthToken> {
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *self.cached.write().await = Some(fresh);
        Ok(token)
    }

    fn placement(&self) -> TokenPlacement {
        TokenPlacement::Query
    }
}

// =============================================================================
// Legacy authorization provider
// =============================================================================

/// Token provider backed by the legacy Watson authorization endpoint, which
/// exchanges service credentials for a raw token over basic auth.
///
/// The endpoint does not advertise an expiry, so the token is cached until a
/// `refresh()` discards it.
pub struct BasicAuthTokenProvider {
    username: String,
    password: String,
    endpoint: String,
    client: reqwest::Client,
    cached: RwLock<Option<AuthToken>>,
}

impl BasicAuthTokenProvider {
    /// Create a provider against the public authorization endpoint.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(username, password, AUTHORIZATION_TOKEN_URL)
    }

    /// Create a provider against a custom endpoint (used in tests).
    pub fn with_endpoint(
        username: impl Into<String>,
        password: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self> {
        let username = username.into();
        if username.is_empty() {
            return Err(Error::Authentication(
                "service username is required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Authentication(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            username,
            password: password.into(),
            endpoint: endpoint.into(),
            client,
            cached: RwLock::new(None),
        })
    }
}

#[async_trait::async_trait]
impl TokenProvider for BasicAuthTokenProvider {
    async fn token(&self) -> Result<AuthToken> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<AuthToken> {
        let response = self
            .client
            .get(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Authentication(format!(
                "token request rejected ({})",
                response.status()
            )));
        }

        let token = AuthToken::new(
            response
                .text()
                .await
                .map_err(|e| Error::Authentication(format!("failed to read token: {e}")))?,
        );
        *self.cached.write().await = Some(token.clone());
        Ok(token)
    }

    fn placement(&self) -> TokenPlacement {
        TokenPlacement::Header
    }
}

// =============================================================================
// Static provider
// =============================================================================

/// Fixed-token provider for tests and pre-fetched tokens.
pub struct StaticTokenProvider {
    token: AuthToken,
    placement: TokenPlacement,
}

impl StaticTokenProvider {
    /// Wrap a fixed token.
    pub fn new(token: impl Into<String>, placement: TokenPlacement) -> Self {
        Self {
            token: AuthToken::new(token),
            placement,
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<AuthToken> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<AuthToken> {
        Ok(self.token.clone())
    }

    fn placement(&self) -> TokenPlacement {
        self.placement
    }
}

// =============================================================================
// Tests
// =============================================================================
