//! `opinionated-http` is a blocking HTTP client that fixes the conventions
//! most service integrations end up reinventing:
//! - requests are named by an *action*, which doubles as the default path
//!   and as the metric name
//! - transient statuses are retried with geometric backoff
//! - every outcome is logged the same way through a [`Logger`]
//! - failures surface as the caller's own error type through `From<Error>`
//!
//! Start from [`Client::builder`]; settings come from [`ClientOptions`] and
//! are overridden per key by a [`ConfigSource`].

mod client;
mod config;
mod error;
mod logger;
mod options;
mod params;
mod request;
mod response;
mod retry;
mod transport;
mod types;

pub use client::{Client, ClientBuilder};
pub use config::{
    ConfigScope, ConfigSource, ConfigValue, Configuration, EnvConfigSource, MapConfigSource,
};
pub use error::Error;
pub use logger::{benchmark, Event, Level, Logger, TracingLogger};
pub use options::{ClientOptions, ProxyPolicy, DEFAULT_RETRY_CODES};
pub use params::Params;
pub use request::{Payload, Request};
pub use response::Response;
pub use retry::{RetryExecutor, RetryPolicy, Sleeper, ThreadSleeper};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportErrorKind, TransportRequest,
    TransportResponse,
};
pub use types::{DecodedBody, Format, Verb};

pub type Result<T> = std::result::Result<T, Error>;
