use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Format};

/// 502 Bad Gateway, 503 Service Unavailable, 504 Gateway Timeout.
///
/// 500 is left out: it signals an application fault, not a transient one.
pub const DEFAULT_RETRY_CODES: [u16; 3] = [502, 503, 504];

/// Built-in client settings.
///
/// Each field is the default for the matching configuration key and is
/// overridden by a value found in the client's [`ConfigSource`](crate::ConfigSource).
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Base URL. Required here or in the config source (`url`).
    pub url: Option<String>,
    /// Body format for requests that do not declare one.
    pub format: Format,
    /// Maximum number of retries after the initial attempt.
    pub retry_count: u32,
    /// Delay before the second retry; later retries grow by `retry_multiplier`.
    pub retry_interval: Duration,
    /// Growth factor between consecutive retry delays.
    pub retry_multiplier: f64,
    /// Status codes that trigger a retry.
    pub http_retry_codes: BTreeSet<u16>,
    /// Redirects followed before giving up.
    pub max_redirects: usize,
    /// Connections kept per host and concurrent exchanges allowed.
    pub pool_size: usize,
    /// Connect timeout.
    pub open_timeout: Duration,
    /// Timeout for a whole exchange.
    pub read_timeout: Duration,
    /// How long an idle pooled connection is kept.
    pub idle_timeout: Duration,
    /// TCP keep-alive interval.
    pub keep_alive: Duration,
    /// Longest wait for a free pooled connection.
    pub pool_timeout: Duration,
    /// A pool checkout waiting longer than this is logged at warn.
    pub warn_timeout: Duration,
    /// Outbound proxy selection.
    pub proxy: ProxyPolicy,
    /// Verify the server's TLS certificate.
    pub verify_peer: bool,
    /// PEM client certificate.
    pub certificate: Option<String>,
    /// PEM private key for `certificate`.
    pub private_key: Option<String>,
    /// Headers sent with every request unless the request sets them.
    pub default_headers: Vec<(String, String)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: None,
            format: Format::Raw,
            retry_count: 11,
            retry_interval: Duration::from_millis(10),
            retry_multiplier: 1.8,
            http_retry_codes: DEFAULT_RETRY_CODES.into_iter().collect(),
            max_redirects: 10,
            pool_size: 100,
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            keep_alive: Duration::from_secs(300),
            pool_timeout: Duration::from_secs(5),
            warn_timeout: Duration::from_millis(250),
            proxy: ProxyPolicy::Env,
            verify_peer: false,
            certificate: None,
            private_key: None,
            default_headers: Vec::new(),
        }
    }
}

impl ClientOptions {
    /// Sets the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the default body format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Sets the maximum number of retries.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Adds a header sent with every request.
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}

/// How the transport chooses an outbound proxy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ProxyPolicy {
    /// Honor the standard proxy environment variables.
    #[default]
    Env,
    /// Never use a proxy.
    None,
    /// Send everything through this proxy URL.
    Url(String),
}

impl FromStr for ProxyPolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("env") {
            Ok(Self::Env)
        } else if value.is_empty() || value.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else if value.contains("://") {
            Ok(Self::Url(value.to_owned()))
        } else {
            Err(Error::Configuration(format!("Invalid proxy: {value:?}")))
        }
    }
}
