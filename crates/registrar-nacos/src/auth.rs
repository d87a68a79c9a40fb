//! Nacos username/password login
//!
//! `POST /nacos/v1/auth/login` trades credentials for an access token that
//! is valid for `tokenTtl` seconds. The token is cached and refreshed once
//! 90% of its lifetime has passed.

use registrar_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Login path relative to the server address
pub(crate) const LOGIN_PATH: &str = "/nacos/v1/auth/login";

/// Nacos user credentials
///
/// # Security
///
/// The Debug implementation does NOT expose the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    /// ⚠️ NEVER log this value
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    token_ttl: u64,
}

fn default_token_ttl() -> u64 {
    18000
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Access token cache; a no-op when no credentials are configured
pub(crate) struct TokenCache {
    credentials: Option<Credentials>,
    token: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub(crate) fn new(credentials: Option<Credentials>) -> Self {
        Self {
            credentials,
            token: Mutex::new(None),
        }
    }

    pub(crate) fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Current access token, logging in first if needed
    ///
    /// # Returns
    ///
    /// - `Ok(None)`: Auth disabled
    /// - `Ok(Some(token))`: Token to append as `accessToken`
    /// - `Err(Error::Authentication)`: Login rejected
    pub(crate) async fn token(&self, http: &reqwest::Client, server_addr: &str) -> Result<Option<String>> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(Some(token.value.clone()));
            }
        }

        let login = login(http, server_addr, credentials).await?;
        let ttl = Duration::from_secs(login.token_ttl);
        tracing::debug!("Nacos login succeeded, token valid for {:?}", ttl);

        *cached = Some(CachedToken {
            value: login.access_token.clone(),
            refresh_at: Instant::now() + ttl.mul_f64(0.9),
        });
        Ok(Some(login.access_token))
    }

    /// Drop the cached token so the next call logs in again
    pub(crate) async fn invalidate(&self) {
        self.token.lock().await.take();
    }
}

async fn login(http: &reqwest::Client, server_addr: &str, credentials: &Credentials) -> Result<LoginResponse> {
    let url = format!("{}{}", server_addr, LOGIN_PATH);
    let response = http
        .post(&url)
        .form(&[
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::http(format!("Nacos login request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        // Body may echo the request; never include it
        return Err(Error::auth(format!(
            "Nacos login rejected for user {}: {}",
            credentials.username, status
        )));
    }

    response
        .json::<LoginResponse>()
        .await
        .map_err(|e| Error::auth(format!("Invalid Nacos login response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::new("nacos", "s3cr3t");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("nacos"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn login_response_defaults_ttl() {
        let parsed: LoginResponse = serde_json::from_str(r#"{"accessToken":"abc"}"#).unwrap();
        assert_eq!(parsed.access_token, "abc");
        assert_eq!(parsed.token_ttl, 18000);
    }

    #[tokio::test]
    async fn disabled_cache_yields_no_token() {
        let cache = TokenCache::new(None);
        let http = reqwest::Client::new();
        assert_eq!(cache.token(&http, "http://127.0.0.1:1").await.unwrap(), None);
    }
}
