use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Session errors
    NoRefreshToken,
    RefreshFailed,
    AuthenticationFailed,
    NotAuthenticated,
    InvalidTokenPair,

    // Transport and API errors
    ApiRequestFailed,
    NetworkError,
    DecodeFailed,

    // Local errors
    StorageFailed,
    ConfigInvalid,
    ValidationFailed,
}

/// Error category used to decide how callers should react
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Session-level failures (token refresh, authentication)
    Authentication,
    /// Connection problems, timeouts
    Network,
    /// The API answered with an error status
    Api,
    /// Local persistence failures
    Storage,
    /// Invalid configuration
    Configuration,
    /// Invalid user input
    Validation,
}

impl ErrorCategory {
    /// Whether an operation failing in this category may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }
}

/// Errors surfaced by the Quill client library.
///
/// The type is `Clone` because a single refresh outcome is handed to every
/// caller that joined the in-flight refresh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// No refresh token is stored, so the session cannot be renewed
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The refresh endpoint rejected the token or could not be reached
    #[error("Token refresh failed: {reason}")]
    RefreshFailed {
        /// What went wrong
        reason: String,
        /// Whether the stored tokens were discarded because of this failure
        terminal: bool,
    },

    /// The request was still unauthorized after refreshing the token once
    #[error("Request unauthorized after token refresh (HTTP {status})")]
    AuthenticationFailed {
        /// Status of the retried response
        status: u16,
    },

    /// The operation requires a logged-in session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// A token pair missing one of its halves
    #[error("Invalid token pair: {0}")]
    InvalidTokenPair(String),

    /// The API answered with a non-success status
    #[error("API request failed with HTTP {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Connection failure, timeout or other transport problem
    #[error("Network error: {0}")]
    Network(String),

    /// A response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Reading or writing the durable store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A configuration value is missing or malformed
    #[error("Invalid configuration for '{key}': {reason}")]
    Config {
        /// Configuration key
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// User input rejected before any request was made
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl ClientError {
    /// Create an API error from a status and body
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a configuration error
    pub fn config(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoRefreshToken => ErrorCode::NoRefreshToken,
            Self::RefreshFailed { .. } => ErrorCode::RefreshFailed,
            Self::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::InvalidTokenPair(_) => ErrorCode::InvalidTokenPair,
            Self::Api { .. } => ErrorCode::ApiRequestFailed,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Decode(_) => ErrorCode::DecodeFailed,
            Self::Storage(_) => ErrorCode::StorageFailed,
            Self::Config { .. } => ErrorCode::ConfigInvalid,
            Self::Validation(_) => ErrorCode::ValidationFailed,
        }
    }

    /// Get the category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoRefreshToken
            | Self::RefreshFailed { .. }
            | Self::AuthenticationFailed { .. }
            | Self::NotAuthenticated
            | Self::InvalidTokenPair(_) => ErrorCategory::Authentication,
            Self::Network(_) => ErrorCategory::Network,
            Self::Api { .. } | Self::Decode(_) => ErrorCategory::Api,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Config { .. } => ErrorCategory::Configuration,
            Self::Validation(_) => ErrorCategory::Validation,
        }
    }

    /// Whether this error ends the session.
    ///
    /// A refresh failure that kept the tokens (transient, by policy) does not.
    pub fn forces_logout(&self) -> bool {
        match self {
            Self::NoRefreshToken => true,
            Self::RefreshFailed { terminal, .. } => *terminal,
            _ => false,
        }
    }

    /// HTTP status attached to this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::AuthenticationFailed { status } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoRefreshToken => "no_refresh_token",
            ErrorCode::RefreshFailed => "refresh_failed",
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::NotAuthenticated => "not_authenticated",
            ErrorCode::InvalidTokenPair => "invalid_token_pair",
            ErrorCode::ApiRequestFailed => "api_request_failed",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::DecodeFailed => "decode_failed",
            ErrorCode::StorageFailed => "storage_failed",
            ErrorCode::ConfigInvalid => "config_invalid",
            ErrorCode::ValidationFailed => "validation_failed",
        };
        f.write_str(name)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
