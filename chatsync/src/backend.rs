//! REST persistence collaborator for chat, member, and history state.
//!
//! Defines the [`ChatBackend`] and [`AuthApi`] traits the engine consumes,
//! plus [`HttpBackend`], the reqwest implementation against the chat
//! service's REST API. Every call takes the access token explicitly so the
//! auth gate can retry a call with a refreshed token.

use serde::{Deserialize, Serialize};

use chatsync_proto::frame::{ChatFrame, Member, deserialize_id};

/// Errors returned by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Credentials were rejected. This is the sentinel the auth gate
    /// consumes; it should not normally reach intent handlers.
    #[error("unauthorized")]
    Unauthorized,

    /// The service answered with an unexpected status code.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The request never completed (DNS, connect, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("response decoding failed: {0}")]
    Decode(String),
}

/// A server-side chat row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    /// Server-assigned chat identifier.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Chat display name.
    pub name: String,
    /// Member descriptors, when the endpoint includes them.
    #[serde(default)]
    pub members: Vec<Member>,
}

/// REST operations for loading and persisting chat state.
///
/// Implementations: [`HttpBackend`] in production, hand-written in-memory
/// fakes in tests. Any operation may return
/// [`BackendError::Unauthorized`], which the auth gate handles
/// transparently.
pub trait ChatBackend: Send + Sync {
    /// Loads every chat the user belongs to.
    fn load_all_chats(
        &self,
        user_id: &str,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatRecord>, BackendError>> + Send;

    /// Loads the message history of one chat.
    fn load_chat_history(
        &self,
        chat_id: &str,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatFrame>, BackendError>> + Send;

    /// Loads the member list of one chat.
    fn load_chat_members(
        &self,
        chat_id: &str,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Member>, BackendError>> + Send;

    /// Persists a newly named chat and returns the server-side row,
    /// including the real chat id.
    fn save_chat(
        &self,
        name: &str,
        members: &[Member],
        token: &str,
    ) -> impl std::future::Future<Output = Result<ChatRecord, BackendError>> + Send;
}

/// Auth endpoints of the same service, used only by the auth gate.
pub trait AuthApi: Send + Sync {
    /// Exchanges a refresh token for a fresh access token.
    fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> impl std::future::Future<Output = Result<String, BackendError>> + Send;

    /// Re-checks that a token is accepted for the given user.
    fn verify_token(
        &self,
        token: &str,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, BackendError>> + Send;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveChatRequest<'a> {
    name: &'a str,
    members: &'a [Member],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// [`ChatBackend`] + [`AuthApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Creates a backend for the given service base URL
    /// (e.g. `http://chat.example.net:8080/api`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        match response.status().as_u16() {
            200..=299 => response
                .json()
                .await
                .map_err(|e| BackendError::Decode(e.to_string())),
            401 | 403 => Err(BackendError::Unauthorized),
            status => Err(BackendError::Status(status)),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }
}

impl ChatBackend for HttpBackend {
    async fn load_all_chats(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<Vec<ChatRecord>, BackendError> {
        self.get_json("/chats", token, &[("userId", user_id)]).await
    }

    async fn load_chat_history(
        &self,
        chat_id: &str,
        token: &str,
    ) -> Result<Vec<ChatFrame>, BackendError> {
        self.get_json(&format!("/chats/{chat_id}/history"), token, &[])
            .await
    }

    async fn load_chat_members(
        &self,
        chat_id: &str,
        token: &str,
    ) -> Result<Vec<Member>, BackendError> {
        self.get_json(&format!("/chats/{chat_id}/members"), token, &[])
            .await
    }

    async fn save_chat(
        &self,
        name: &str,
        members: &[Member],
        token: &str,
    ) -> Result<ChatRecord, BackendError> {
        self.post_json("/chats", token, &SaveChatRequest { name, members })
            .await
    }
}

impl AuthApi for HttpBackend {
    async fn refresh_session(&self, refresh_token: &str) -> Result<String, BackendError> {
        let response: RefreshResponse = self
            .post_json("/account/refresh", "", &RefreshRequest { refresh_token })
            .await?;
        Ok(response.token)
    }

    async fn verify_token(&self, token: &str, user_id: &str) -> Result<bool, BackendError> {
        self.post_json(
            &format!("/account/verifyJwt?id={user_id}"),
            token,
            &serde_json::json!({}),
        )
        .await
    }
}
