//! Silent reauthorization around persistence calls.
//!
//! [`AuthGate::call`] runs a backend operation with the session's access
//! token. If the result is unauthorized, it reads the persisted refresh
//! token, exchanges it for a fresh access token, re-checks authorization,
//! and retries the operation exactly once. At most one refresh attempt and
//! one retry happen per original call, no matter how the nested steps
//! fail, so there are no retry storms.

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{AuthApi, BackendError};
use crate::session::Session;

/// Failures surfaced by the auth gate.
///
/// Callers treat these as "unavailable" and degrade to empty results;
/// they are never fatal to the engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The call stayed unauthorized after the single refresh attempt, or
    /// no refresh token was on record.
    #[error("unauthorized")]
    Unauthorized,

    /// The backend failed for a reason other than authorization.
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),
}

/// Persisted key-value slot holding the refresh token.
pub trait TokenStore: Send + Sync {
    /// Reads the refresh token, if one has been persisted.
    fn refresh_token(&self) -> Option<String>;
}

/// [`TokenStore`] backed by a single file.
///
/// A missing or empty file means no refresh token is on record.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store reading the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The default token location under the user config directory
    /// (`~/.config/chatsync/refresh-token`).
    #[must_use]
    pub fn default_location() -> Option<Self> {
        let dir = dirs::config_dir()?;
        Some(Self::new(dir.join("chatsync").join("refresh-token")))
    }
}

impl TokenStore for FileTokenStore {
    fn refresh_token(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let token = contents.trim();
        if token.is_empty() {
            return None;
        }
        Some(token.to_string())
    }
}

/// Wraps backend calls with refresh-and-retry-once semantics.
pub struct AuthGate<A: AuthApi, T: TokenStore> {
    auth: Arc<A>,
    tokens: T,
    session: Arc<Session>,
}

impl<A: AuthApi, T: TokenStore> AuthGate<A, T> {
    /// Creates a gate over the given auth endpoints, token slot, and
    /// session.
    pub fn new(auth: Arc<A>, tokens: T, session: Arc<Session>) -> Self {
        Self {
            auth,
            tokens,
            session,
        }
    }

    /// Runs `op` with the current access token, refreshing credentials
    /// and retrying exactly once on an unauthorized result.
    ///
    /// `op` receives the token to use and is invoked at most twice.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthorized`] when no refresh token exists, the
    ///   refresh or re-check is rejected, or the retried call is still
    ///   unauthorized.
    /// - [`AuthError::Backend`] for non-authorization backend failures.
    pub async fn call<R, F, Fut>(&self, op: F) -> Result<R, AuthError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<R, BackendError>>,
    {
        match op(self.session.token()).await {
            Ok(value) => return Ok(value),
            Err(BackendError::Unauthorized) => {}
            Err(other) => return Err(AuthError::Backend(other)),
        }

        let Some(refresh) = self.tokens.refresh_token() else {
            tracing::warn!("unauthorized and no refresh token on record");
            return Err(AuthError::Unauthorized);
        };

        let fresh = match self.auth.refresh_session(&refresh).await {
            Ok(token) => token,
            Err(BackendError::Unauthorized) => return Err(AuthError::Unauthorized),
            Err(other) => return Err(AuthError::Backend(other)),
        };

        match self.auth.verify_token(&fresh, self.session.id()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("refreshed token failed verification");
                return Err(AuthError::Unauthorized);
            }
            Err(BackendError::Unauthorized) => return Err(AuthError::Unauthorized),
            Err(other) => return Err(AuthError::Backend(other)),
        }

        self.session.set_token(fresh.clone());
        tracing::debug!("access token refreshed, retrying once");

        match op(fresh).await {
            Ok(value) => Ok(value),
            Err(BackendError::Unauthorized) => Err(AuthError::Unauthorized),
            Err(other) => Err(AuthError::Backend(other)),
        }
    }
}
