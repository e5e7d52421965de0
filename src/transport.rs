use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::config::Configuration;
use crate::logger::{Event, Logger};
use crate::options::ProxyPolicy;
use crate::{Error, Verb};

/// Request ready to hand to a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub verb: Verb,
    /// Path including the encoded query string. Always starts with `/`.
    pub path: String,
    pub headers: HeaderMap,
    /// Encoded body, absent for bodiless requests.
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    /// Header value as text, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Raw result of one exchange with the server.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    /// Status message; the canonical reason phrase when the driver has none.
    pub message: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Creates a response with the canonical reason phrase and no headers.
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            message: status.canonical_reason().unwrap_or_default().to_owned(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Replaces the status message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Classification of connection-level failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be opened.
    Connect,
    /// Connect or read timeout elapsed.
    Timeout,
    /// No pooled connection became available within the pool timeout.
    PoolTimeout,
    /// Malformed exchange, bad body or redirect loop.
    Protocol,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "ConnectError",
            Self::Timeout => "TimeoutError",
            Self::PoolTimeout => "PoolTimeoutError",
            Self::Protocol => "ProtocolError",
            Self::Other => "TransportError",
        })
    }
}

/// Failure reported by a [`Transport`] before any HTTP response was read.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Creates an error of `kind`.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches the underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Failure classification.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_request() || err.is_body() || err.is_decode() || err.is_redirect() {
            TransportErrorKind::Protocol
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

/// Driver that performs the network exchange.
///
/// Implementations own connection pooling, TLS and redirects and must be
/// safe to share between threads.
pub trait Transport: Send + Sync {
    /// Performs one exchange; a non-success status is still `Ok`.
    fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Default [`Transport`] backed by a pooled blocking `reqwest` client.
pub struct ReqwestTransport {
    http: reqwest::blocking::Client,
    base_url: String,
    gate: Arc<PoolGate>,
    pool_timeout: Duration,
    warn_timeout: Duration,
    logger: Arc<dyn Logger>,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .field("pool_timeout", &self.pool_timeout)
            .field("warn_timeout", &self.warn_timeout)
            .finish()
    }
}

impl ReqwestTransport {
    /// Builds the driver from resolved client configuration.
    ///
    /// `logger` receives the driver's own diagnostics.
    pub fn new(config: &Configuration, logger: Arc<dyn Logger>) -> Result<Self, Error> {
        let mut builder = reqwest::blocking::Client::builder()
            .pool_max_idle_per_host(config.pool_size)
            .connect_timeout(config.open_timeout)
            .timeout(config.read_timeout)
            .pool_idle_timeout(config.idle_timeout)
            .tcp_keepalive(config.keep_alive)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(!config.verify_peer)
            .default_headers(config.default_headers.clone());

        builder = match &config.proxy {
            ProxyPolicy::Env => builder,
            ProxyPolicy::None => builder.no_proxy(),
            ProxyPolicy::Url(url) => {
                let proxy = reqwest::Proxy::all(url.as_str()).map_err(|err| {
                    Error::Configuration(format!("Invalid proxy {url:?}: {err}"))
                })?;
                builder.proxy(proxy)
            }
        };

        match (&config.certificate, &config.private_key) {
            (Some(certificate), Some(private_key)) => {
                let pem = format!("{}\n{}", certificate.trim_end(), private_key.trim_end());
                let identity = reqwest::Identity::from_pem(pem.as_bytes()).map_err(|err| {
                    Error::Configuration(format!("Invalid client certificate or key: {err}"))
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(Error::Configuration(
                    "certificate and private_key must be supplied together".to_owned(),
                ))
            }
        }

        let http = builder
            .build()
            .map_err(|err| Error::Configuration(format!("Failed to build HTTP driver: {err}")))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_owned(),
            gate: Arc::new(PoolGate::new(config.pool_size)),
            pool_timeout: config.pool_timeout,
            warn_timeout: config.warn_timeout,
            logger,
        })
    }

    /// Base URL with any trailing `/` removed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for a free pooled connection.
    ///
    /// A wait longer than `warn_timeout` is logged at warn.
    fn checkout(&self) -> Result<PoolPermit, TransportError> {
        let started = Instant::now();
        let permit = self.gate.acquire(self.pool_timeout);
        let waited = started.elapsed();

        if waited > self.warn_timeout {
            self.logger.warn(
                &Event::new(&format!(
                    "Waited {} ms for a pooled connection to {}; consider raising pool_size",
                    waited.as_millis(),
                    self.base_url
                ))
                .duration(waited),
            );
        }

        permit.ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::PoolTimeout,
                format!(
                    "no connection available within {} ms",
                    self.pool_timeout.as_millis()
                ),
            )
        })
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let _permit = self.checkout()?;

        let mut builder = self
            .http
            .request(request.verb.method(), url.as_str())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder.send().map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(TransportError::from_reqwest)?
            .to_vec();
        let elapsed = started.elapsed();

        if self.logger.is_trace() {
            self.logger.trace(
                &Event::new(&format!("{} {url} -> {}", request.verb, status.as_u16()))
                    .duration(elapsed),
            );
        }
        Ok(TransportResponse {
            status,
            message: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            body,
        })
    }
}

/// Counting gate bounding the number of concurrent exchanges to the pool size.
#[derive(Debug)]
struct PoolGate {
    available: Mutex<usize>,
    condvar: Condvar,
}

#[derive(Debug)]
struct PoolPermit {
    gate: Arc<PoolGate>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl PoolGate {
    fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits.max(1)),
            condvar: Condvar::new(),
        }
    }

    fn acquire(self: &Arc<Self>, timeout: Duration) -> Option<PoolPermit> {
        let deadline = Instant::now() + timeout;
        let mut available = lock_unpoisoned(&self.available);
        loop {
            if *available > 0 {
                *available -= 1;
                return Some(PoolPermit {
                    gate: Arc::clone(self),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            available = match self.condvar.wait_timeout(available, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn release(&self) {
        let mut available = lock_unpoisoned(&self.available);
        *available = available.saturating_add(1);
        self.condvar.notify_one();
    }
}

/// Locks `mutex`, recovering the guard if a holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
