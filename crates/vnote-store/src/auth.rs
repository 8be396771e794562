//! Password authentication against PocketBase.
//!
//! The token is obtained once at startup. When a request comes back 401 the
//! client invalidates it and logs in again with the same credentials. Login
//! is single-flight: concurrent callers wait on the write lock and reuse the
//! token the first caller fetched.

use std::fmt;

use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::types::AuthResponse;

/// Collection name that selects the pre-0.23 admin endpoint.
pub const LEGACY_ADMINS: &str = "admins";

/// Login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub password: String,
    /// Auth collection, `_superusers` on current PocketBase
    pub auth_collection: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("password", &"<redacted>")
            .field("auth_collection", &self.auth_collection)
            .finish()
    }
}

impl Credentials {
    /// Path of the password login endpoint.
    pub fn auth_path(&self) -> String {
        if self.auth_collection == LEGACY_ADMINS {
            "/api/admins/auth-with-password".to_string()
        } else {
            format!(
                "/api/collections/{}/auth-with-password",
                urlencoding::encode(&self.auth_collection)
            )
        }
    }
}

/// Cached bearer token.
pub struct AuthSession {
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl AuthSession {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token: RwLock::new(None),
        }
    }

    /// Drop the cached token so the next call logs in again.
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    /// Current token, logging in if there is none.
    pub async fn token(&self, http: &Client, base_url: &str) -> StoreResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                return Ok(token.clone());
            }
        }

        let mut cached = self.token.write().await;

        // Another task may have logged in while we waited
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let token = self.login(http, base_url).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn login(&self, http: &Client, base_url: &str) -> StoreResult<String> {
        let url = format!("{}{}", base_url, self.credentials.auth_path());
        debug!(identity = %self.credentials.identity, "Authenticating against record store");

        let response = http
            .post(&url)
            .json(&json!({
                "identity": self.credentials.identity,
                "password": self.credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status != StatusCode::OK {
            return Err(StoreError::auth_error(format!(
                "login failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let auth: AuthResponse = serde_json::from_str(&body).map_err(|e| {
            StoreError::auth_error(format!("could not read token from login response: {}", e))
        })?;

        if auth.token.is_empty() {
            return Err(StoreError::auth_error("login response carried an empty token"));
        }

        info!(identity = %self.credentials.identity, "Authenticated against record store");
        Ok(auth.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(collection: &str) -> Credentials {
        Credentials {
            identity: "worker@example.com".into(),
            password: "hunter2".into(),
            auth_collection: collection.into(),
        }
    }

    #[test]
    fn test_auth_path() {
        assert_eq!(
            creds("_superusers").auth_path(),
            "/api/collections/_superusers/auth-with-password"
        );
        assert_eq!(creds("admins").auth_path(), "/api/admins/auth-with-password");
    }

    #[test]
    fn test_debug_redacts_password() {
        let printed = format!("{:?}", creds("_superusers"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("redacted"));
    }
}
