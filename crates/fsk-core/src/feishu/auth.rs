//! Tenant token lifecycle.
//!
//! A [`TokenSession`] owns one tenant's credentials and hands out a bearer
//! token, exchanging the app id/secret only when no unexpired token is
//! cached. The cache check and the exchange run under one async mutex, so
//! concurrent callers that find the token expired wait for a single
//! exchange instead of racing their own.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::credentials::Credentials;
use crate::{CoreError, Result};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current UTC timestamp.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Result of a successful token exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Opaque bearer token.
    pub token: String,
    /// Lifetime reported by the platform.
    pub ttl: Duration,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Exchanges app credentials for a bearer token.
#[async_trait]
pub trait TokenExchanger: Send + Sync + fmt::Debug {
    /// Perform one exchange. Never retried by the caller.
    async fn exchange(&self, credentials: &Credentials) -> Result<TokenGrant>;
}

/// Token exchange against the open platform's internal-app endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenExchanger {
    http: Client,
    url: String,
    default_ttl: Duration,
}

impl HttpTokenExchanger {
    /// Path of the tenant token endpoint below the API root.
    pub const TOKEN_PATH: &str = "/auth/v3/tenant_access_token/internal";

    /// Create an exchanger for the API rooted at `base_url`.
    #[must_use]
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}{}", base_url.trim_end_matches('/'), Self::TOKEN_PATH),
            default_ttl: Duration::from_secs(7200),
        }
    }

    /// Lifetime assumed when the response does not report one.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(&self, credentials: &Credentials) -> Result<TokenGrant> {
        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({
                "app_id": credentials.client_id,
                "app_secret": credentials.client_secret,
            }))
            .send()
            .await
            .map_err(|e| CoreError::RemoteAuth(format!("token request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::RemoteAuth(format!("reading token response: {e}")))?;

        parse_token_response(status, &body, self.default_ttl)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default = "missing_code")]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<u64>,
}

const fn missing_code() -> i64 {
    -1
}

fn parse_token_response(status: u16, body: &str, default_ttl: Duration) -> Result<TokenGrant> {
    let parsed: TokenResponse = serde_json::from_str(body).map_err(|e| {
        CoreError::RemoteAuth(format!("HTTP {status}: unexpected token response: {e}"))
    })?;

    if parsed.code != 0 {
        return Err(CoreError::RemoteAuth(format!(
            "code {}: {}",
            parsed.code, parsed.msg
        )));
    }
    if !(200..300).contains(&status) {
        return Err(CoreError::RemoteAuth(format!("HTTP {status}: {}", parsed.msg)));
    }

    let token = parsed
        .tenant_access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CoreError::RemoteAuth("response carries no token".to_string()))?;

    Ok(TokenGrant {
        token,
        ttl: parsed.expire.map_or(default_ttl, Duration::from_secs),
    })
}

/// A cached bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// The bearer value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the session stops reusing this token (margin already applied).
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token may still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credentials plus a lazily fetched, cached bearer token.
#[derive(Debug)]
pub struct TokenSession {
    credentials: Option<Credentials>,
    exchanger: Arc<dyn TokenExchanger>,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    cached: Mutex<Option<SessionToken>>,
}

impl TokenSession {
    /// Margin subtracted from every reported lifetime unless overridden.
    pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

    /// Create a session. `None` credentials make every token request fail
    /// with a configuration error.
    #[must_use]
    pub fn new(credentials: Option<Credentials>, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self {
            credentials,
            exchanger,
            clock: Arc::new(SystemClock),
            safety_margin: Self::DEFAULT_SAFETY_MARGIN,
            cached: Mutex::new(None),
        }
    }

    /// Use a different time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different safety margin.
    #[must_use]
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// The loaded credentials.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` when the session has none.
    pub fn credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or_else(|| {
            CoreError::Config("no credentials loaded - run 'fsk init' first".to_string())
        })
    }

    /// Whether credentials were loaded.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// The cached token, if any, without fetching.
    pub async fn cached_token(&self) -> Option<SessionToken> {
        self.cached.lock().await.clone()
    }

    /// Return a valid token, exchanging credentials only when the cache is
    /// empty or expired.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` without credentials and
    /// `CoreError::RemoteAuth` when the exchange fails.
    pub async fn get_token(&self) -> Result<SessionToken> {
        let credentials = self.credentials()?;
        let mut cached = self.cached.lock().await;

        let now = self.clock.now();
        if let Some(token) = &*cached
            && token.is_valid_at(now)
        {
            return Ok(token.clone());
        }

        log::debug!("requesting tenant token for app {}", credentials.client_id);
        let grant = self.exchanger.exchange(credentials).await?;

        let lifetime = grant.ttl.saturating_sub(self.safety_margin);
        let token = SessionToken {
            value: grant.token,
            expires_at: now + TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::zero()),
        };
        log::debug!("tenant token valid until {}", token.expires_at);

        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next request exchanges again.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Drop the cached token only if it is still `stale`. A token another
    /// caller already replaced is kept.
    async fn invalidate_stale(&self, stale: &SessionToken) {
        let mut cached = self.cached.lock().await;
        if (*cached).as_ref() == Some(stale) {
            *cached = None;
        }
    }

    /// Run `op` with a bearer token. If `op` fails with
    /// `CoreError::DownstreamAuth`, the token is invalidated, a new one is
    /// fetched and `op` runs once more; that second outcome is returned.
    ///
    /// # Errors
    ///
    /// Returns token errors from [`Self::get_token`] or the error from `op`.
    pub async fn authorized<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.get_token().await?;
        match op(token.value().to_string()).await {
            Err(e) if e.is_auth_rejection() => {
                log::info!("token rejected ({e}), refreshing and retrying once");
                self.invalidate_stale(&token).await;
                let fresh = self.get_token().await?;
                op(fresh.value().to_string()).await
            }
            other => other,
        }
    }
}
