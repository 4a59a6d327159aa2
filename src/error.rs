use std::sync::Arc;

use crate::Str;

/// Represents a result type for operations in the Beacon SDK.
///
/// This type alias is used throughout the SDK to indicate the result of operations that may return
/// errors specific to the Beacon SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// beacon-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Beacon SDK.
///
/// The SDK never raises these as panics. Validation errors reject the single offending call and
/// leave the rest of the runtime untouched; network errors only mean the affected records stay
/// queued for the next flush cycle.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A purchase was logged with a currency code the service does not support. The purchase never
    /// enters the request queue.
    #[error("unsupported currency code {0:?}")]
    UnsupportedCurrency(Str),

    /// An event was logged with an empty name.
    #[error("event name must not be empty")]
    EmptyEventName,

    /// `change_user` was called with an empty id.
    #[error("user id must not be empty")]
    EmptyUserId,

    /// A feedback post was logged with an empty message.
    #[error("feedback message must not be empty")]
    EmptyFeedbackMessage,

    /// Invalid base_url configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The submission was aborted by `shutdown_server_communication`. Its records remain queued.
    #[error("server communication has been shut down")]
    Cancelled,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
