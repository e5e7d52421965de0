use std::fmt;
use std::str::FromStr;

use reqwest::Method;

use crate::Error;

/// HTTP verbs supported by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    /// Upper-case method name, as used in log and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a request with this verb may carry a body.
    pub fn request_body_permitted(self) -> bool {
        matches!(self, Self::Post | Self::Patch)
    }

    /// Whether a response to this verb may carry a body.
    ///
    /// Every supported verb allows one; HEAD, the verb that does not, is
    /// not offered. Query parameters are therefore accepted on all verbs.
    pub fn response_body_permitted(self) -> bool {
        match self {
            Self::Get | Self::Post | Self::Patch | Self::Delete => true,
        }
    }

    /// Matching `reqwest` method.
    pub fn method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Patch => Method::PATCH,
            Self::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared body encoding for a request and its response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    /// Bodies are passed through unchanged.
    #[default]
    Raw,
    /// Request bodies are serialized to JSON and response bodies parsed.
    Json,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            other => Err(Error::Configuration(format!("Unknown format: {other:?}"))),
        }
    }
}

/// Response body after decoding by [`Format`].
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedBody {
    /// The response status does not permit a body.
    Empty,
    Raw(Vec<u8>),
    Json(serde_json::Value),
}

impl DecodedBody {
    /// Raw body as UTF-8 text, if it is raw and valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Raw(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Parsed JSON, if the body was decoded as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` when the status did not permit a body.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Text rendering used in failure payloads.
    pub(crate) fn to_log_text(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Raw(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Self::Json(value) => Some(value.to_string()),
        }
    }
}
