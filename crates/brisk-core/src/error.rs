//! The error taxonomy shared across the engine.
//!
//! Every variant that corresponds to a renderable HTTP failure carries
//! a status code via [`Error::status`]; the rest are programming or
//! transport errors that never reach a client directly.

use crate::request::Method;
use crate::response::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not Found: {0}")]
    NotFound(String),

    /// No route matched the request. Rendered by the dispatcher, not
    /// the exception handler, so it can honour debug mode.
    #[error("Method[{method}] and Route[{path}] does not exist")]
    RouteNotFound { method: Method, path: String },

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Invalid Usage: {0}")]
    InvalidUsage(String),

    #[error("Server Error: {0}")]
    ServerError(String),

    #[error("Request Timeout")]
    RequestTimeout,

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Method {method} not allowed for {path}")]
    InvalidMethod { method: Method, path: String },

    /// A route with the same method and path is already registered.
    #[error("Route[{method}:{path}] already exists")]
    RouteConflict { method: Method, path: String },

    /// A response was built without a content-type header.
    #[error("missing required header: {0}")]
    MissingRequiredHeader(String),

    #[error("handler failed: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The HTTP status this error renders as, when it has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::NotFound(_) => Some(StatusCode::NOT_FOUND),
            Error::BadRequest(_) | Error::InvalidUsage(_) => Some(StatusCode::BAD_REQUEST),
            Error::ServerError(_) | Error::RouteNotFound { .. } => {
                Some(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::RequestTimeout => Some(StatusCode::REQUEST_TIMEOUT),
            Error::PayloadTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Error::InvalidMethod { .. } => Some(StatusCode::METHOD_NOT_ALLOWED),
            Error::RouteConflict { .. }
            | Error::MissingRequiredHeader(_)
            | Error::Internal(_)
            | Error::Io(_) => None,
        }
    }
}
