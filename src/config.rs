//! Client configuration resolution.
//!
//! Every setting starts from [`ClientOptions`] and is overridden by the
//! value stored under `"{prefix}/{key}"` in a [`ConfigSource`]. Resolution
//! runs once when the client is built.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::options::ProxyPolicy;
use crate::retry::RetryPolicy;
use crate::{ClientOptions, Error, Format, Result};

/// Hierarchical key/value store consulted during client construction.
pub trait ConfigSource: Send + Sync {
    /// Raw value for a fully qualified key such as `"fake_service/retry_count"`.
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory [`ConfigSource`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapConfigSource {
    values: HashMap<String, String>,
}

impl MapConfigSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one fully qualified key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Flattens a JSON document into `/`-separated keys.
    ///
    /// `{"svc": {"retry_count": 3}}` yields `svc/retry_count = "3"`. Arrays
    /// are joined with `,`; nulls are skipped.
    pub fn from_json(document: &serde_json::Value) -> Self {
        let mut values = HashMap::new();
        flatten_json("", document, &mut values);
        Self { values }
    }

    /// Parses and flattens a JSON document; see [`MapConfigSource::from_json`].
    pub fn from_json_str(document: &str) -> Result<Self> {
        let document: serde_json::Value = serde_json::from_str(document)
            .map_err(|err| Error::Configuration(format!("invalid config document: {err}")))?;
        Ok(Self::from_json(&document))
    }
}

impl<K, V> FromIterator<(K, V)> for MapConfigSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut HashMap<String, String>) {
    let scalar = |value: &serde_json::Value| match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    };

    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}/{key}")
                };
                flatten_json(&key, child, out);
            }
        }
        serde_json::Value::Array(items) => {
            let joined = items.iter().filter_map(scalar).collect::<Vec<_>>().join(",");
            out.insert(prefix.to_owned(), joined);
        }
        other => {
            if let Some(text) = scalar(other) {
                out.insert(prefix.to_owned(), text);
            }
        }
    }
}

/// [`ConfigSource`] reading process environment variables.
///
/// `fake_service/retry_count` is read from `FAKE_SERVICE_RETRY_COUNT`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvConfigSource;

impl EnvConfigSource {
    /// Environment variable consulted for `key`.
    pub fn variable_name(key: &str) -> String {
        key.chars()
            .map(|c| match c {
                '/' | '-' | '.' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl ConfigSource for EnvConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::variable_name(key)).ok()
    }
}

/// Value type that can be read from a configuration string.
pub trait ConfigValue: Sized {
    /// Parses `raw`, describing the problem on failure.
    fn parse_config(raw: &str) -> std::result::Result<Self, String>;
}

macro_rules! numeric_config_value {
    ($($ty:ty),*) => {
        $(impl ConfigValue for $ty {
            fn parse_config(raw: &str) -> std::result::Result<Self, String> {
                raw.trim().parse().map_err(|err| format!("{err}"))
            }
        })*
    };
}

numeric_config_value!(u32, usize, f64);

impl ConfigValue for String {
    fn parse_config(raw: &str) -> std::result::Result<Self, String> {
        Ok(raw.to_owned())
    }
}

impl ConfigValue for bool {
    fn parse_config(raw: &str) -> std::result::Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(format!("not a boolean: {other:?}")),
        }
    }
}

/// Seconds, fractional allowed.
impl ConfigValue for Duration {
    fn parse_config(raw: &str) -> std::result::Result<Self, String> {
        let seconds = f64::parse_config(raw)?;
        Duration::try_from_secs_f64(seconds).map_err(|err| format!("{err}"))
    }
}

/// Comma-separated status codes.
impl ConfigValue for BTreeSet<u16> {
    fn parse_config(raw: &str) -> std::result::Result<Self, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| {
                code.parse::<u16>()
                    .ok()
                    .filter(|code| (100..=599).contains(code))
                    .ok_or_else(|| format!("invalid status code {code:?}"))
            })
            .collect()
    }
}

impl ConfigValue for ProxyPolicy {
    fn parse_config(raw: &str) -> std::result::Result<Self, String> {
        raw.parse().map_err(|err: Error| err.to_string())
    }
}

impl ConfigValue for Format {
    fn parse_config(raw: &str) -> std::result::Result<Self, String> {
        raw.parse().map_err(|err: Error| err.to_string())
    }
}

/// A [`ConfigSource`] viewed under one key prefix.
pub struct ConfigScope<'a> {
    source: &'a dyn ConfigSource,
    prefix: &'a str,
}

impl<'a> ConfigScope<'a> {
    /// Views `source` under `prefix`.
    pub fn new(source: &'a dyn ConfigSource, prefix: &'a str) -> Self {
        Self { source, prefix }
    }

    /// Fully qualified form of `key`.
    pub fn key(&self, key: &str) -> String {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{prefix}/{key}")
        }
    }

    /// Value under `key`, or `default` when the source has none.
    pub fn fetch<T: ConfigValue>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.fetch_optional(key)?.unwrap_or(default))
    }

    /// Value under `key`, or `None` when the source has none.
    pub fn fetch_optional<T: ConfigValue>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        self.source
            .get(&full_key)
            .map(|raw| {
                T::parse_config(&raw).map_err(|reason| {
                    Error::Configuration(format!("Invalid value for {full_key}: {reason}"))
                })
            })
            .transpose()
    }

    /// Value under `key`; a missing value is an error.
    pub fn fetch_required<T: ConfigValue>(&self, key: &str) -> Result<T> {
        self.fetch_optional(key)?.ok_or_else(|| {
            Error::Configuration(format!("Missing required config value: {}", self.key(key)))
        })
    }
}

/// Settings resolved for one client. Immutable once built.
///
/// Fields mirror [`ClientOptions`] after config overrides; `url` is
/// guaranteed present and `default_headers` already validated.
#[derive(Clone)]
pub struct Configuration {
    pub url: String,
    pub format: Format,
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub retry_multiplier: f64,
    pub http_retry_codes: BTreeSet<u16>,
    pub max_redirects: usize,
    pub pool_size: usize,
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
    pub keep_alive: Duration,
    pub pool_timeout: Duration,
    pub warn_timeout: Duration,
    pub proxy: ProxyPolicy,
    pub verify_peer: bool,
    pub certificate: Option<String>,
    pub private_key: Option<String>,
    pub default_headers: HeaderMap,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("url", &self.url)
            .field("format", &self.format)
            .field("retry_count", &self.retry_count)
            .field("retry_interval", &self.retry_interval)
            .field("retry_multiplier", &self.retry_multiplier)
            .field("http_retry_codes", &self.http_retry_codes)
            .field("max_redirects", &self.max_redirects)
            .field("pool_size", &self.pool_size)
            .field("open_timeout", &self.open_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("keep_alive", &self.keep_alive)
            .field("pool_timeout", &self.pool_timeout)
            .field("warn_timeout", &self.warn_timeout)
            .field("proxy", &self.proxy)
            .field("verify_peer", &self.verify_peer)
            .field("certificate", &self.certificate.is_some())
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Configuration {
    /// Resolves every setting: the scope's value when present, otherwise
    /// the option.
    pub fn resolve(options: ClientOptions, scope: &ConfigScope<'_>) -> Result<Self> {
        let url = match options.url {
            Some(url) => scope.fetch("url", url)?,
            None => scope.fetch_required("url")?,
        };
        if url.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "{} is set but empty",
                scope.key("url")
            )));
        }

        let retry_multiplier = scope.fetch("retry_multiplier", options.retry_multiplier)?;
        if !retry_multiplier.is_finite() {
            return Err(Error::Configuration(format!(
                "{} must be a finite number",
                scope.key("retry_multiplier")
            )));
        }

        let certificate = match options.certificate {
            Some(default) => Some(scope.fetch("certificate", default)?),
            None => scope.fetch_optional("certificate")?,
        };
        let private_key = match options.private_key {
            Some(default) => Some(scope.fetch("private_key", default)?),
            None => scope.fetch_optional("private_key")?,
        };

        Ok(Self {
            url,
            format: scope.fetch("format", options.format)?,
            retry_count: scope.fetch("retry_count", options.retry_count)?,
            retry_interval: scope.fetch("retry_interval", options.retry_interval)?,
            retry_multiplier,
            http_retry_codes: scope.fetch("http_retry_codes", options.http_retry_codes)?,
            max_redirects: scope.fetch("max_redirects", options.max_redirects)?,
            pool_size: scope.fetch("pool_size", options.pool_size)?,
            open_timeout: scope.fetch("open_timeout", options.open_timeout)?,
            read_timeout: scope.fetch("read_timeout", options.read_timeout)?,
            idle_timeout: scope.fetch("idle_timeout", options.idle_timeout)?,
            keep_alive: scope.fetch("keep_alive", options.keep_alive)?,
            pool_timeout: scope.fetch("pool_timeout", options.pool_timeout)?,
            warn_timeout: scope.fetch("warn_timeout", options.warn_timeout)?,
            proxy: scope.fetch("proxy", options.proxy)?,
            verify_peer: scope.fetch("verify_peer", options.verify_peer)?,
            certificate,
            private_key,
            default_headers: header_map(&options.default_headers)?,
        })
    }

    /// Retry policy derived from the retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_count: self.retry_count,
            base_interval: self.retry_interval,
            multiplier: self.retry_multiplier,
            retryable_status_codes: self.http_retry_codes.clone(),
        }
    }
}

fn header_map(pairs: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Configuration(format!("Invalid default header name: {name:?}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            Error::Configuration(format!("Invalid value for default header {name:?}"))
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
