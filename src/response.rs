use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock};

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::json;

use crate::logger::{Event, Logger};
use crate::transport::{lock_unpoisoned, TransportResponse};
use crate::{DecodedBody, Error, Format, Request, Verb};

/// Final response of a call, paired with the request that produced it.
///
/// A non-success status is not an error by itself; call
/// [`Response::raise_on_failure`] to turn one into `E`.
pub struct Response<E = Error> {
    http_response: TransportResponse,
    request: Request,
    verb: Verb,
    format: Format,
    logger: Arc<dyn Logger>,
    metric_prefix: Arc<str>,
    decoded: OnceLock<DecodedBody>,
    /// Held while the body is decoded so concurrent first reads decode once.
    decoding: Mutex<()>,
    _error: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for Response<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("verb", &self.verb)
            .field("action", &self.request.action())
            .field("status", &self.http_response.status)
            .field("message", &self.http_response.message)
            .finish()
    }
}

impl<E: From<Error>> Response<E> {
    pub(crate) fn new(
        http_response: TransportResponse,
        request: Request,
        verb: Verb,
        logger: Arc<dyn Logger>,
        metric_prefix: Arc<str>,
    ) -> Self {
        let format = request.format().unwrap_or_default();
        Self {
            http_response,
            request,
            verb,
            format,
            logger,
            metric_prefix,
            decoded: OnceLock::new(),
            decoding: Mutex::new(()),
            _error: PhantomData,
        }
    }

    /// True for 2xx statuses.
    pub fn success(&self) -> bool {
        self.http_response.status.is_success()
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.http_response.status
    }

    /// Numeric HTTP status code.
    pub fn code(&self) -> u16 {
        self.http_response.status.as_u16()
    }

    /// Status message, e.g. `"Forbidden"`.
    pub fn message(&self) -> &str {
        &self.http_response.message
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.http_response.headers
    }

    /// Undecoded response body.
    pub fn raw_body(&self) -> &[u8] {
        &self.http_response.body
    }

    /// Verb the request was sent with.
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Action of the originating request.
    pub fn action(&self) -> &str {
        self.request.action()
    }

    /// Path of the originating request.
    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Format used to decode the body.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Request that produced this response.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Body decoded per the request format, computed on first use and cached.
    ///
    /// A successful decode runs at most once, even when several threads
    /// ask at the same time. A failed decode is logged and retried on the
    /// next call.
    pub fn decoded_body(&self) -> Result<&DecodedBody, E> {
        self.decode_once().map_err(|err| {
            let message = err.to_string();
            let metric = self.metric("exception");
            let mut event = Event::new(&message).metric(&metric);
            if let Error::Deserialization { source, .. } = &err {
                event = event.error(source.as_ref());
            }
            self.logger.error(&event);
            E::from(err)
        })
    }

    /// Decoded body when the status is a success, otherwise the failure as `E`.
    pub fn raise_on_failure(&self) -> Result<&DecodedBody, E> {
        if self.success() {
            return self.decoded_body();
        }
        Err(self.exception())
    }

    /// Logs this response as a failure and returns it as `E`.
    pub fn exception(&self) -> E {
        let message = format!(
            "HTTP {}: {} Failure: ({}) {}",
            self.verb,
            self.action(),
            self.code(),
            self.message()
        );
        let body = self.body_for_log();
        let payload = json!({ "body": body });
        let metric = self.metric("exception");
        self.logger
            .error(&Event::new(&message).metric(&metric).payload(&payload));

        E::from(Error::Status {
            status: self.code(),
            message,
            body,
        })
    }

    fn decode(&self) -> Result<DecodedBody, Error> {
        if !body_permitted(self.http_response.status) {
            return Ok(DecodedBody::Empty);
        }

        match self.format {
            Format::Raw => Ok(DecodedBody::Raw(self.http_response.body.clone())),
            Format::Json => serde_json::from_slice(&self.http_response.body)
                .map(DecodedBody::Json)
                .map_err(Error::deserialization),
        }
    }

    fn decode_once(&self) -> Result<&DecodedBody, Error> {
        if let Some(body) = self.decoded.get() {
            return Ok(body);
        }

        let _decoding = lock_unpoisoned(&self.decoding);
        if let Some(body) = self.decoded.get() {
            return Ok(body);
        }
        let body = self.decode()?;
        Ok(self.decoded.get_or_init(|| body))
    }

    fn body_for_log(&self) -> Option<String> {
        let text = match self.decode_once() {
            Ok(body) => body.to_log_text(),
            Err(_) => Some(String::from_utf8_lossy(&self.http_response.body).into_owned()),
        };
        text.filter(|text| !text.is_empty())
    }

    fn metric(&self, name: &str) -> String {
        format!("{}/{name}", self.metric_prefix)
    }
}

/// Informational, 204 No Content, 205 Reset Content and 304 Not Modified
/// responses carry no body.
fn body_permitted(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::RESET_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
