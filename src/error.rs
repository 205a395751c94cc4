use thiserror::Error;

/// Errors produced by the HTTP clients.
///
/// Cloneable so the deduplication layer can hand the same failure to every
/// waiter of a shared in-flight request.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApiError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, ...).
    #[error("network error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    /// `detail` carries the backend's `{"detail": ...}` message when present.
    #[error("http {status}: {detail}")]
    Status { status: u16, detail: String },

    /// The response body could not be deserialized into the expected type.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// A bug on our side (e.g. a deduplication key reused across types).
    #[error("internal client error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether this is an authentication failure (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }

    pub(crate) fn status(status: u16, detail: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            detail: detail.into(),
        }
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }
}

/// Errors surfaced by the state stores.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    /// The operation was refused before any network call was made
    /// (e.g. paging past the end of a feed, or paging while a load is running).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Client-side input validation rejected the request before any network call.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl StoreError {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        StoreError::Precondition(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }
}
