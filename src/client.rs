use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ConfigScope, ConfigSource, Configuration, MapConfigSource};
use crate::logger::{Event, Logger, TracingLogger};
use crate::retry::{RetryExecutor, Sleeper, ThreadSleeper};
use crate::transport::{ReqwestTransport, Transport};
use crate::{ClientOptions, Error, Format, Request, Response, Verb};

/// Opinionated HTTP client bound to one base URL.
///
/// All failures surface as `E`, which only needs `From<Error>`. A client is
/// cheap to clone and safe to share between threads; each call blocks its
/// thread for the full duration, retries included.
///
/// ```no_run
/// use opinionated_http::{Client, ClientOptions, Request};
///
/// let http = Client::<opinionated_http::Error>::builder("fake_service", "FakeService")
///     .options(ClientOptions::default().with_url("https://zip.example.com"))
///     .build()?;
///
/// let response = http.get(Request::new("lookup").with_parameters([("zip", "12345")]))?;
/// let body = response.raise_on_failure()?;
/// println!("{:?}", body.as_text());
/// # Ok::<(), opinionated_http::Error>(())
/// ```
pub struct Client<E = Error> {
    inner: Arc<ClientInner>,
    _error: PhantomData<fn() -> E>,
}

struct ClientInner {
    config: Configuration,
    config_prefix: String,
    metric_prefix: Arc<str>,
    logger: Arc<dyn Logger>,
    executor: RetryExecutor,
}

impl<E> Clone for Client<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _error: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Client<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config_prefix", &self.inner.config_prefix)
            .field("metric_prefix", &self.inner.metric_prefix)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<E: From<Error>> Client<E> {
    /// Starts a client whose settings are read under `config_prefix` and
    /// whose metrics are named `{metric_prefix}/...`.
    pub fn builder(
        config_prefix: impl Into<String>,
        metric_prefix: impl Into<String>,
    ) -> ClientBuilder<E> {
        ClientBuilder {
            config_prefix: config_prefix.into(),
            metric_prefix: metric_prefix.into(),
            options: ClientOptions::default(),
            config_source: None,
            logger: None,
            transport: None,
            sleeper: None,
            _error: PhantomData,
        }
    }

    /// Resolved configuration.
    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// Prefix of every metric this client emits.
    pub fn metric_prefix(&self) -> &str {
        &self.inner.metric_prefix
    }

    /// Sends `request` as a GET.
    pub fn get(&self, request: impl Into<Request>) -> Result<Response<E>, E> {
        self.send(Verb::Get, request.into())
    }

    /// Sends `request` as a POST.
    pub fn post(&self, request: impl Into<Request>) -> Result<Response<E>, E> {
        self.send(Verb::Post, request.into())
    }

    /// Posts `json` as the body with the JSON format.
    ///
    /// Fails if the request already carries a body.
    pub fn post_json<T>(&self, request: impl Into<Request>, json: &T) -> Result<Response<E>, E>
    where
        T: Serialize + ?Sized,
    {
        let request = request.into();
        if request.has_body() {
            return Err(E::from(Error::Construction(
                "Either set json or body".to_owned(),
            )));
        }
        let value = serde_json::to_value(json)
            .map_err(|err| self.build_failure(Error::serialization(err)))?;
        self.send(
            Verb::Post,
            request.with_format(Format::Json).with_body(value),
        )
    }

    /// Sends `request` as a PATCH.
    pub fn patch(&self, request: impl Into<Request>) -> Result<Response<E>, E> {
        self.send(Verb::Patch, request.into())
    }

    /// Sends `request` as a DELETE.
    pub fn delete(&self, request: impl Into<Request>) -> Result<Response<E>, E> {
        self.send(Verb::Delete, request.into())
    }

    /// Submits a request whose verb is already set.
    pub fn request(&self, mut request: Request) -> Result<Response<E>, E> {
        let verb = request.verb().ok_or_else(|| {
            E::from(Error::Construction(format!(
                "No verb set for request {:?}",
                request.action()
            )))
        })?;
        request.set_format_if_unset(self.inner.config.format);

        let transport_request = request
            .build_transport_request()
            .map_err(|err| self.build_failure(err))?;
        let http_response = self
            .inner
            .executor
            .execute(request.action(), &transport_request)?;

        Ok(Response::new(
            http_response,
            request,
            verb,
            Arc::clone(&self.inner.logger),
            Arc::clone(&self.inner.metric_prefix),
        ))
    }

    fn send(&self, verb: Verb, mut request: Request) -> Result<Response<E>, E> {
        request.set_verb(verb);
        self.request(request)
    }

    /// Serialization failures are logged here; construction errors go
    /// straight back to the caller.
    fn build_failure(&self, err: Error) -> E {
        if let Error::Serialization { source, .. } = &err {
            let message = err.to_string();
            let metric = format!("{}/exception", self.inner.metric_prefix);
            self.inner.logger.error(
                &Event::new(&message)
                    .metric(&metric)
                    .error(source.as_ref()),
            );
        }
        E::from(err)
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder<E = Error> {
    config_prefix: String,
    metric_prefix: String,
    options: ClientOptions,
    config_source: Option<Arc<dyn ConfigSource>>,
    logger: Option<Arc<dyn Logger>>,
    transport: Option<Arc<dyn Transport>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    _error: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for ClientBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config_prefix", &self.config_prefix)
            .field("metric_prefix", &self.metric_prefix)
            .field("url", &self.options.url)
            .finish()
    }
}

impl<E: From<Error>> ClientBuilder<E> {
    /// Built-in defaults, overridden by the config source.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Source whose values under the config prefix override the options.
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    /// Defaults to [`TracingLogger`].
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Replaces the default [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`ThreadSleeper`].
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Resolves configuration and creates the transport.
    pub fn build(self) -> Result<Client<E>, E> {
        let source = self
            .config_source
            .unwrap_or_else(|| Arc::new(MapConfigSource::new()));
        let config = Configuration::resolve(
            self.options,
            &ConfigScope::new(source.as_ref(), &self.config_prefix),
        )?;

        let logger = self.logger.unwrap_or_else(|| Arc::new(TracingLogger));
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config, Arc::clone(&logger))?),
        };
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(ThreadSleeper));
        let executor = RetryExecutor::new(
            config.retry_policy(),
            transport,
            Arc::clone(&logger),
            sleeper,
            self.metric_prefix.clone(),
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                config_prefix: self.config_prefix,
                metric_prefix: Arc::from(self.metric_prefix),
                logger,
                executor,
            }),
            _error: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Client;
    use crate::config::MapConfigSource;
    use crate::{ClientOptions, Error};

    #[test]
    fn builds_default_transport_from_options() {
        let client = Client::<Error>::builder("fake_service", "FakeService")
            .options(ClientOptions::default().with_url("http://127.0.0.1:9"))
            .build()
            .expect("client must build");
        assert_eq!(client.config().url, "http://127.0.0.1:9");
        assert_eq!(client.metric_prefix(), "FakeService");
    }

    #[test]
    fn config_source_overrides_options() {
        let source = MapConfigSource::new()
            .with("fake_service/url", "http://configured.test")
            .with("fake_service/pool_size", "7");
        let client = Client::<Error>::builder("fake_service", "FakeService")
            .config_source(Arc::new(source))
            .build()
            .expect("client must build");
        assert_eq!(client.config().url, "http://configured.test");
        assert_eq!(client.config().pool_size, 7);
    }

    #[test]
    fn missing_url_fails_construction() {
        let err = Client::<Error>::builder("fake_service", "FakeService")
            .build()
            .expect_err("url is required");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn mismatched_certificate_and_key_fail_construction() {
        let options = ClientOptions {
            certificate: Some("-----BEGIN CERTIFICATE-----".to_owned()),
            ..ClientOptions::default().with_url("https://x.test")
        };
        let err = Client::<Error>::builder("fake_service", "FakeService")
            .options(options)
            .build()
            .expect_err("key missing");
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn debug_redacts_private_key() {
        let source = MapConfigSource::new()
            .with("fake_service/url", "http://x.test")
            .with("fake_service/private_key", "super-secret-key");
        let client = Client::<Error>::builder("fake_service", "FakeService")
            .config_source(Arc::new(source))
            .transport(Arc::new(NoopTransport))
            .build()
            .expect("client must build");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("super-secret-key"));
    }

    struct NoopTransport;

    impl crate::Transport for NoopTransport {
        fn execute(
            &self,
            _request: &crate::TransportRequest,
        ) -> Result<crate::TransportResponse, crate::TransportError> {
            Ok(crate::TransportResponse::new(reqwest::StatusCode::OK, ""))
        }
    }
}
