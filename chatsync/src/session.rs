//! User session identity supplied to the engine at construction.

use parking_lot::RwLock;

/// The signed-in user's identity and access token.
///
/// `id` and `display_name` are fixed for the session's lifetime. The
/// access token is replaced only by the auth gate after a successful
/// silent refresh; everything else treats the session as read-only.
#[derive(Debug)]
pub struct Session {
    id: String,
    display_name: String,
    token: RwLock<String>,
}

impl Session {
    /// Creates a session from externally supplied credentials.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            token: RwLock::new(token.into()),
        }
    }

    /// Stable identifier of the signed-in user.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name of the signed-in user.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Current access token.
    #[must_use]
    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    /// Replaces the access token after a successful refresh.
    pub(crate) fn set_token(&self, token: String) {
        *self.token.write() = token;
    }
}
