//! Unified error type.
//!
//! Every fallible operation in azura returns [`Error`]: registration-time
//! failures (bad method names, plugin cycles, configuration) and request-time
//! failures raised by hooks, middleware and handlers alike. Request-time
//! errors funnel into one place, the error responder, which turns them into a
//! JSON envelope via [`Error::status_code`] and [`Error::payload`].

use std::time::Duration;

use http::StatusCode;
use serde_json::{Value, json};

/// An error deliberately raised with an explicit status and JSON payload.
///
/// The payload is written to the client verbatim.
#[derive(Clone, Debug)]
pub struct HttpError {
    status: StatusCode,
    payload: Value,
}

impl HttpError {
    pub fn new(status: StatusCode, payload: Value) -> Self {
        Self { status, payload }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn payload(&self) -> &Value { &self.payload }
}

/// The error type returned by azura's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Explicit status + payload, propagated as-is to the client.
    #[error("http error {}", .0.status)]
    Http(HttpError),

    #[error("Route not found")]
    RouteNotFound,

    #[error("request exceeded its {0:?} deadline")]
    Timeout(Duration),

    /// A terminal response method was called twice.
    #[error("response already sent")]
    AlreadySent,

    #[error("{0}")]
    Internal(String),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("plugin dependency cycle: {0}")]
    PluginCycle(String),

    #[error("a value of type `{0}` is already decorated")]
    AlreadyDecorated(&'static str),

    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),

    #[error("unknown lifecycle phase `{0}`")]
    UnknownPhase(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl Error {
    /// An [`Error::Http`] with an arbitrary JSON payload.
    pub fn http(status: StatusCode, payload: Value) -> Self {
        Self::Http(HttpError::new(status, payload))
    }

    /// An [`Error::Http`] with a `{ "error": message }` payload.
    ///
    /// ```rust
    /// use azura::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::status(StatusCode::UNAUTHORIZED, "missing token");
    /// assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    /// ```
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::http(status, json!({ "error": message.into() }))
    }

    /// An unhandled error carrying only a message. Maps to 500.
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Self::Internal(message.to_string())
    }

    /// Status code the error responder writes for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Http(e) => e.status,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body the error responder writes for this error.
    pub fn payload(&self) -> Value {
        match self {
            Self::Http(e) => e.payload.clone(),
            Self::RouteNotFound => json!({ "message": self.to_string() }),
            // Panic text stays in the logs.
            Self::Panic(_) => json!({ "error": "Internal Server Error" }),
            _ => json!({ "error": self.to_string() }),
        }
    }

    /// `true` for errors that were raised on purpose and need no server-side
    /// error log.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Http(_) | Self::RouteNotFound)
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}
