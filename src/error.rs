//! Error taxonomy shared by every network-facing operation.
//!
//! Remote-reported failures (`Auth`, `Streaming`, `Handshake`) are kept apart
//! from transport failures so callers can tell "the service said no" from
//! "the request never completed".

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

pub(crate) const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// VK account error code for "too many requests per second".
const AUTH_TOO_MANY_REQUESTS: i64 = 6;
/// VK account error code for "internal server error".
const AUTH_INTERNAL_ERROR: i64 = 10;

/// Remote-reported error descriptor with a numeric code and message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

/// Error body returned by the rules and stream endpoints.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub(crate) struct StreamingErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_code: i64,
}

/// Error body returned by the account (bootstrap) API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub(crate) struct AccountErrorBody {
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub error_code: i64,
}

impl From<StreamingErrorBody> for ApiError {
    fn from(body: StreamingErrorBody) -> Self {
        Self {
            code: body.error_code,
            message: body.message,
        }
    }
}

impl From<AccountErrorBody> for ApiError {
    fn from(body: AccountErrorBody) -> Self {
        Self {
            code: body.error_code,
            message: body.error_msg,
        }
    }
}

#[derive(Debug, Error)]
pub enum VkError {
    /// The bootstrap API rejected the access token.
    #[error("auth error {code}: {message}")]
    Auth { code: i64, message: String },

    /// A rule operation was rejected by the streaming service.
    #[error("streaming error {code}: {message}")]
    Streaming { code: i64, message: String },

    /// The websocket upgrade was rejected.
    #[error("handshake failed with status {status}: {message}")]
    Handshake { status: u16, message: String },

    /// HTTP request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    /// Websocket dial or transport failure.
    #[error("websocket error: {0}")]
    WebSocket(WsError),

    #[error("stream connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Non-success HTTP status with a body that did not match the expected shape.
    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// Response body did not match the expected shape.
    #[error("{target} response decode failed: {source}. body={body}")]
    Protocol {
        target: &'static str,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// Bootstrap succeeded but returned an empty endpoint or key.
    #[error("bootstrap response is missing the endpoint or key")]
    IncompleteCredentials,

    #[error("session is already listening")]
    AlreadyListening,

    #[error("session is not listening")]
    NotListening,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl VkError {
    pub(crate) fn auth(api: ApiError) -> Self {
        Self::Auth {
            code: api.code,
            message: api.message,
        }
    }

    pub(crate) fn streaming(api: ApiError) -> Self {
        Self::Streaming {
            code: api.code,
            message: api.message,
        }
    }

    /// Returns the remote-reported code and message, if this error carries one.
    pub fn api_error(&self) -> Option<ApiError> {
        match self {
            Self::Auth { code, message } | Self::Streaming { code, message } => Some(ApiError {
                code: *code,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    /// Whether a caller-side retry has a reasonable chance of succeeding.
    ///
    /// The SDK itself never retries; see [`crate::retry::retry_async`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::WebSocket(WsError::Io(_)) | Self::ConnectTimeout(_) => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Handshake { status, .. } => *status >= 500 || *status == 429,
            Self::Auth { code, .. } => {
                *code == AUTH_TOO_MANY_REQUESTS || *code == AUTH_INTERNAL_ERROR
            }
            Self::Streaming { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

pub(crate) fn summarize_error_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
