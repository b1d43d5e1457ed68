use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClientError, ClientResult};
use crate::serde_utils::string_or_number;

/// Access/refresh token pair issued by the API.
///
/// Both halves are always present; a pair missing either one is never valid
/// session state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived token sent as the bearer credential
    pub access_token: String,
    /// Longer-lived token exchanged for a new pair
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a new token pair
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Reject pairs with an empty half
    pub fn validate(&self) -> ClientResult<()> {
        if self.access_token.trim().is_empty() {
            return Err(ClientError::InvalidTokenPair(
                "access token is empty".to_string(),
            ));
        }
        if self.refresh_token.trim().is_empty() {
            return Err(ClientError::InvalidTokenPair(
                "refresh token is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        bearer(&self.access_token)
    }
}

// Tokens are credentials; keep them out of logs and panic messages
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &token_preview(&self.access_token))
            .field("refresh_token", &token_preview(&self.refresh_token))
            .finish()
    }
}

/// Format a bearer credential
pub fn bearer(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

/// Loggable stand-in for a token
pub(crate) fn token_preview(token: &str) -> String {
    format!("<{} chars>", token.len())
}

/// The logged-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "string_or_number::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
}

impl Identity {
    /// Create a new identity
    pub fn new(username: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            username: username.into(),
            user_id,
        }
    }
}

/// Login credentials. Only ever sent in the login request body.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Create credentials, rejecting empty fields
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> ClientResult<Self> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() {
            return Err(ClientError::validation("username is required"));
        }
        if password.is_empty() {
            return Err(ClientError::validation("password is required"));
        }
        Ok(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of a successful `login/` response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(
        rename = "userId",
        default,
        deserialize_with = "string_or_number::deserialize_option"
    )]
    pub user_id: Option<String>,
}

impl LoginResponse {
    /// Token pair carried by the response
    pub fn token_pair(&self) -> TokenPair {
        TokenPair::new(self.access.clone(), self.refresh.clone())
    }
}

/// Body of a successful `token/refresh/` response.
///
/// Servers without refresh-token rotation only return `access`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

impl RefreshResponse {
    /// Build the new pair, keeping `previous_refresh` when none was issued
    pub fn into_token_pair(self, previous_refresh: &str) -> TokenPair {
        let refresh = self
            .refresh
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| previous_refresh.to_string());
        TokenPair::new(self.access, refresh)
    }
}

/// Session state visible to the rest of the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    /// No session
    LoggedOut,
    /// Authenticated as the given user
    LoggedIn(Identity),
}

impl AuthState {
    /// The identity, when logged in
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::LoggedIn(identity) => Some(identity),
            AuthState::LoggedOut => None,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Explicit logout
    UserRequested,
    /// The session could not be renewed
    SessionExpired,
}

/// Events published by the session core
#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// A user logged in
    LoggedIn {
        identity: Identity,
        at: DateTime<Utc>,
    },
    /// The session ended
    LoggedOut {
        reason: LogoutReason,
        at: DateTime<Utc>,
    },
    /// A new token pair was stored
    TokenRefreshed { at: DateTime<Utc> },
    /// A refresh attempt failed
    RefreshFailed {
        error: ClientError,
        at: DateTime<Utc>,
    },
}

impl AuthEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::LoggedIn { .. } => "logged_in",
            AuthEvent::LoggedOut { .. } => "logged_out",
            AuthEvent::TokenRefreshed { .. } => "token_refreshed",
            AuthEvent::RefreshFailed { .. } => "refresh_failed",
        }
    }
}
