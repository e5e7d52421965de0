use crate::transport::TransportError;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
///
/// Every variant displays as the exact message that was logged for it, so
/// a caller converting into its own error type through `From<Error>` keeps
/// the full failure text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A request could not be built from the supplied fields.
    #[error("{0}")]
    Construction(String),
    /// The request body could not be converted to its declared format.
    #[error("Failed to serialize request body. {message}")]
    Serialization {
        message: String,
        #[source]
        source: Cause,
    },
    /// The response body could not be parsed per its declared format.
    #[error("Failed to parse response body. {message}")]
    Deserialization {
        message: String,
        #[source]
        source: Cause,
    },
    /// Connection-level failure reported by the transport driver.
    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        source: TransportError,
    },
    /// A retryable status was still returned after the last retry.
    #[error("{message}")]
    RetriesExhausted { status: u16, message: String },
    /// Non-success HTTP status surfaced by [`Response::raise_on_failure`](crate::Response::raise_on_failure).
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        body: Option<String>,
    },
    /// Invalid or missing configuration value.
    #[error("{0}")]
    Configuration(String),
}

impl Error {
    /// Wraps a failure to encode a request body.
    pub(crate) fn serialization(source: impl Into<Cause>) -> Self {
        let source = source.into();
        Self::Serialization {
            message: describe(source.as_ref()),
            source,
        }
    }

    /// Wraps a failure to decode a response body.
    pub(crate) fn deserialization(source: impl Into<Cause>) -> Self {
        let source = source.into();
        Self::Deserialization {
            message: describe(source.as_ref()),
            source,
        }
    }

    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { status, .. } | Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Formats a cause as `"{kind}: {message}"` with a short name for the
/// cause's error type.
fn describe(cause: &(dyn std::error::Error + Send + Sync + 'static)) -> String {
    let kind = error_kind_name(cause);
    format!("{kind}: {cause}")
}

fn error_kind_name(cause: &(dyn std::error::Error + Send + Sync + 'static)) -> &'static str {
    if cause.is::<serde_json::Error>() {
        "JsonError"
    } else if cause.is::<std::string::FromUtf8Error>() || cause.is::<std::str::Utf8Error>() {
        "Utf8Error"
    } else {
        "Error"
    }
}
