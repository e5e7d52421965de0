use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::transport::TransportRequest;
use crate::{Error, Format, Params, Result, Verb};

/// Request body as supplied by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Bytes sent as-is under [`Format::Raw`]; encoded as a JSON string
    /// under [`Format::Json`].
    Raw(Vec<u8>),
    /// Structured data; requires [`Format::Json`].
    Structured(serde_json::Value),
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Raw(value.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Raw(value.into_bytes())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Raw(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Description of one outbound call.
///
/// The action names the call in logs and metrics and supplies the default
/// path `/{action}`.
#[derive(Clone, PartialEq)]
pub struct Request {
    action: String,
    verb: Option<Verb>,
    path: String,
    format: Option<Format>,
    headers: Vec<(String, String)>,
    body: Option<Payload>,
    form_data: Option<Params>,
    parameters: Option<Params>,
    username: Option<String>,
    password: Option<String>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("action", &self.action)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("format", &self.format)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("form_data", &self.form_data)
            .field("parameters", &self.parameters)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Request {
    /// Creates a request named `action` with path `/{action}`.
    pub fn new(action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            path: normalize_path(&action),
            action,
            verb: None,
            format: None,
            headers: Vec::new(),
            body: None,
            form_data: None,
            parameters: None,
            username: None,
            password: None,
        }
    }

    /// Sets the verb; the client verb methods do this for you.
    pub fn with_verb(mut self, verb: Verb) -> Self {
        self.verb = Some(verb);
        self
    }

    /// Sets the path; a missing leading `/` is added.
    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        self.path = normalize_path(path.as_ref());
        self
    }

    /// Sets the body format, overriding the client's default.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Adds one header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds several headers.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(
            headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Payload>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets form fields, sent as `application/x-www-form-urlencoded`.
    pub fn with_form_data(mut self, form_data: impl Into<Params>) -> Self {
        self.form_data = Some(form_data.into());
        self
    }

    /// Sets query parameters appended to the path.
    pub fn with_parameters(mut self, parameters: impl Into<Params>) -> Self {
        self.parameters = Some(parameters.into());
        self
    }

    /// Sends `Authorization: Basic` with these credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Action name used in logs and metrics.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Verb, once set.
    pub fn verb(&self) -> Option<Verb> {
        self.verb
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Declared body format, if any.
    pub fn format(&self) -> Option<Format> {
        self.format
    }

    /// Request body, if any.
    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    /// Returns `true` when a body was supplied.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub(crate) fn set_verb(&mut self, verb: Verb) {
        self.verb = Some(verb);
    }

    pub(crate) fn set_format_if_unset(&mut self, format: Format) {
        self.format.get_or_insert(format);
    }

    /// Path with the encoded query string, e.g. `/lookup?zip=12345`.
    pub fn path_with_query(&self) -> String {
        match &self.parameters {
            Some(parameters) if !parameters.is_empty() => {
                format!("{}?{}", self.path, parameters.encode())
            }
            _ => self.path.clone(),
        }
    }

    /// Derives the request handed to the transport.
    ///
    /// Fails with [`Error::Construction`] when the fields conflict, and with
    /// [`Error::Serialization`] when the body cannot be encoded in the
    /// declared format.
    pub fn build_transport_request(&self) -> Result<TransportRequest> {
        let verb = self.verb.ok_or_else(|| {
            Error::Construction(format!(
                "No verb set for request {:?}; use a client verb method",
                self.action
            ))
        })?;

        if self.form_data.is_some() && self.has_content_type_header() {
            return Err(Error::Construction(
                "Setting form data will overwrite supplied content-type".to_owned(),
            ));
        }
        if self.body.is_some() && self.form_data.is_some() {
            return Err(Error::Construction(
                "Cannot supply both form_data and a body".to_owned(),
            ));
        }
        if (self.body.is_some() || self.form_data.is_some()) && !verb.request_body_permitted() {
            return Err(Error::Construction(format!(
                "{verb} does not support a request body"
            )));
        }
        if self.parameters.is_some() && !verb.response_body_permitted() {
            return Err(Error::Construction(format!(
                "parameters cannot be supplied for {verb}"
            )));
        }

        let mut headers = HeaderMap::with_capacity(self.headers.len() + 2);
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::Construction(format!("Invalid header name: {name:?}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| Error::Construction(format!("Invalid value for header {name:?}")))?;
            headers.insert(header_name, header_value);
        }

        let format = self.format.unwrap_or_default();
        let mut body = self
            .body
            .as_ref()
            .map(|payload| encode_payload(payload, format))
            .transpose()?;

        if body.is_some() && format == Format::Json {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            headers
                .entry(header::ACCEPT)
                .or_insert(HeaderValue::from_static("application/json"));
        }

        if let Some(form_data) = &self.form_data {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            body = Some(form_data.encode().into_bytes());
        }

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            let credentials = STANDARD.encode(format!("{username}:{password}"));
            let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))
                .map_err(|_| Error::Construction("Invalid basic auth credentials".to_owned()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        Ok(TransportRequest {
            verb,
            path: self.path_with_query(),
            headers,
            body,
        })
    }

    fn has_content_type_header(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    }
}

impl From<&str> for Request {
    fn from(action: &str) -> Self {
        Self::new(action)
    }
}

impl From<String> for Request {
    fn from(action: String) -> Self {
        Self::new(action)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

fn encode_payload(payload: &Payload, format: Format) -> Result<Vec<u8>> {
    match (format, payload) {
        (Format::Raw, Payload::Raw(bytes)) => Ok(bytes.clone()),
        (Format::Raw, Payload::Structured(_)) => Err(Error::serialization(
            "structured body requires the json format",
        )),
        (Format::Json, Payload::Structured(value)) => {
            serde_json::to_vec(value).map_err(Error::serialization)
        }
        (Format::Json, Payload::Raw(bytes)) => {
            let text = String::from_utf8(bytes.clone()).map_err(Error::serialization)?;
            serde_json::to_vec(&serde_json::Value::String(text)).map_err(Error::serialization)
        }
    }
}
