//! Error types shared by the HTTP backend implementation.

use reqwest::StatusCode;
use thiserror::Error;
use validator::ValidationError;

/// Convenient result alias returning [`BackendError`] failures.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures that can occur while talking to the draw-control backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No URL is configured for the endpoint.
    #[error("no URL configured for the `{endpoint}` endpoint")]
    MissingEndpoint { endpoint: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build backend HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent (network error, timeout).
    #[error("failed to send backend request to `{url}`")]
    RequestSend {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The backend answered with a non-2xx status.
    #[error("unexpected backend response status {status} for `{url}`")]
    RequestStatus { url: String, status: StatusCode },
    /// The response body was not the expected JSON.
    #[error("failed to decode backend response for `{url}`")]
    DecodeResponse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The backend reported a non-success `status`.
    #[error("backend `{url}` reported status `{status}`")]
    Rejected {
        url: String,
        status: String,
        message: Option<String>,
    },
    /// The payload decoded but carries an impossible value.
    #[error("invalid payload from `{url}`")]
    InvalidPayload {
        url: String,
        #[source]
        source: ValidationError,
    },
}
