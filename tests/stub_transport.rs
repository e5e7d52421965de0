use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use opinionated_http::{
    Client, ClientOptions, Error, Event, Format, Level, Logger, Request, Sleeper, Transport,
    TransportError, TransportErrorKind, TransportRequest, TransportResponse, Verb,
};
use reqwest::StatusCode;
use serde_json::json;

/// Replays queued outcomes and records every request it receives.
#[derive(Default)]
struct StubTransport {
    outcomes: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl StubTransport {
    fn new(outcomes: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn replying(status: StatusCode, body: &str) -> Arc<Self> {
        Self::new(vec![Ok(TransportResponse::new(status, body))])
    }

    fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Transport for StubTransport {
    fn execute(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse::new(StatusCode::OK, "")))
    }
}

#[derive(Clone, Debug)]
struct Logged {
    level: Level,
    message: String,
    metric: Option<String>,
    duration: Option<Duration>,
}

#[derive(Default)]
struct RecordingLogger(Mutex<Vec<Logged>>);

impl RecordingLogger {
    fn at(&self, level: Level) -> Vec<Logged> {
        self.0
            .lock()
            .expect("log lock")
            .iter()
            .filter(|entry| entry.level == level)
            .cloned()
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn log(&self, level: Level, event: &Event<'_>) {
        self.0.lock().expect("log lock").push(Logged {
            level,
            message: event.message.unwrap_or_default().to_owned(),
            metric: event.metric.map(str::to_owned),
            duration: event.duration,
        });
    }
}

#[derive(Default)]
struct RecordingSleeper(Mutex<Vec<Duration>>);

impl RecordingSleeper {
    fn naps(&self) -> Vec<Duration> {
        self.0.lock().expect("sleeper lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.0.lock().expect("sleeper lock").push(duration);
    }
}

struct Harness<E = Error> {
    client: Client<E>,
    transport: Arc<StubTransport>,
    logger: Arc<RecordingLogger>,
    sleeper: Arc<RecordingSleeper>,
}

fn harness<E: From<Error> + fmt::Debug>(
    transport: Arc<StubTransport>,
    options: ClientOptions,
) -> Harness<E> {
    let logger = Arc::new(RecordingLogger::default());
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = Client::<E>::builder("fake_service", "FakeService")
        .options(options.with_url("http://fake.test"))
        .transport(transport.clone())
        .logger(logger.clone())
        .sleeper(sleeper.clone())
        .build()
        .expect("client must build");
    Harness {
        client,
        transport,
        logger,
        sleeper,
    }
}

/// Caller-side error kind, converted from the crate error.
#[derive(Debug)]
struct ServiceError(String);

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        Self(err.to_string())
    }
}

#[test]
fn get_with_parameters_returns_raw_body() {
    let body = r#"{"zip":"12345","population":54321}"#;
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::OK, body),
        ClientOptions::default(),
    );

    let response = h
        .client
        .get(Request::new("lookup").with_parameters([("zip", "12345")]))
        .expect("get must succeed");

    assert!(response.success());
    assert_eq!(response.decoded_body().expect("body").as_text(), Some(body));
    assert_eq!(response.request().path_with_query(), "/lookup?zip=12345");
    let requests = h.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].verb, Verb::Get);
    assert_eq!(requests[0].path, "/lookup?zip=12345");
}

#[test]
fn post_json_sets_content_type_and_serialized_body() {
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::OK, "{}"),
        ClientOptions::default(),
    );

    h.client
        .post_json("lookup", &json!({"zip": "12345"}))
        .expect("post must succeed");

    let requests = h.transport.requests();
    assert_eq!(requests[0].verb, Verb::Post);
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    assert_eq!(requests[0].header("accept"), Some("application/json"));
    assert_eq!(
        requests[0].body.as_deref(),
        Some(br#"{"zip":"12345"}"#.as_slice())
    );
}

#[test]
fn forbidden_raises_caller_error_kind() {
    let h = harness::<ServiceError>(
        StubTransport::replying(StatusCode::FORBIDDEN, ""),
        ClientOptions::default(),
    );

    let response = h.client.get("lookup").expect("403 is still a response");
    assert!(!response.success());
    let err = response.raise_on_failure().expect_err("403 must raise");

    assert_eq!(err.0, "HTTP GET: lookup Failure: (403) Forbidden");
    let errors = h.logger.at(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].metric.as_deref(), Some("FakeService/exception"));
}

#[test]
fn client_default_format_applies_to_requests_without_one() {
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::OK, r#"{"ok":true}"#),
        ClientOptions::default().with_format(Format::Json),
    );

    let response = h.client.get("status").expect("get must succeed");
    assert_eq!(response.format(), Format::Json);
    assert_eq!(
        response.decoded_body().expect("json body").as_json(),
        Some(&json!({"ok": true}))
    );
}

#[test]
fn transient_statuses_are_retried_until_success() {
    let h = harness::<Error>(
        StubTransport::new(vec![
            Ok(TransportResponse::new(StatusCode::SERVICE_UNAVAILABLE, "")),
            Ok(TransportResponse::new(StatusCode::BAD_GATEWAY, "")),
            Ok(TransportResponse::new(StatusCode::OK, "done")),
        ]),
        ClientOptions::default(),
    );

    let response = h.client.get("lookup").expect("get must succeed");

    assert_eq!(response.code(), 200);
    assert_eq!(h.transport.requests().len(), 3);
    let naps = h.sleeper.naps();
    assert_eq!(naps.len(), 2);
    assert_eq!(naps[0], Duration::ZERO);
    assert!((naps[1].as_secs_f64() - 0.018).abs() < 1e-6);

    let warnings = h.logger.at(Level::WARN);
    assert_eq!(warnings.len(), 2);
    assert_eq!(
        warnings[0].message,
        "HTTP GET: lookup Failure: (503) Service Unavailable. Retry: 1"
    );
    assert_eq!(
        warnings[1].message,
        "HTTP GET: lookup Failure: (502) Bad Gateway. Retry: 2"
    );
    assert_eq!(warnings[1].metric.as_deref(), Some("FakeService/retry"));
    assert_eq!(warnings[1].duration, Some(naps[1]));
    assert!(h.logger.at(Level::ERROR).is_empty());
}

#[test]
fn retries_exhausted_after_retry_count() {
    let outcomes = (0..4)
        .map(|_| Ok(TransportResponse::new(StatusCode::SERVICE_UNAVAILABLE, "")))
        .collect();
    let h = harness::<ServiceError>(
        StubTransport::new(outcomes),
        ClientOptions::default().with_retry_count(3),
    );

    let err = h.client.get("lookup").expect_err("retries must run out");

    assert_eq!(
        err.0,
        "HTTP GET: lookup Failure: (503) Service Unavailable. Retries Exhausted"
    );
    assert_eq!(h.transport.requests().len(), 4);
    assert_eq!(h.sleeper.naps().len(), 3);
    let errors = h.logger.at(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, err.0);
}

#[test]
fn internal_server_error_is_not_retried() {
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        ClientOptions::default(),
    );

    let response = h.client.get("lookup").expect("500 is still a response");

    assert_eq!(response.code(), 500);
    assert_eq!(h.transport.requests().len(), 1);
    assert!(h.sleeper.naps().is_empty());
}

#[test]
fn transport_failure_is_reported_once() {
    let h = harness::<Error>(
        StubTransport::new(vec![Err(TransportError::new(
            TransportErrorKind::Connect,
            "Connection refused",
        ))]),
        ClientOptions::default(),
    );

    let err = h.client.delete("widgets").expect_err("connect must fail");

    assert!(matches!(err, Error::Transport { .. }));
    assert_eq!(
        err.to_string(),
        "HTTP DELETE: widgets Failure: ConnectError: Connection refused"
    );
    assert_eq!(h.transport.requests().len(), 1);
    assert_eq!(h.logger.at(Level::ERROR).len(), 1);
}

#[test]
fn each_attempt_is_benchmarked_under_action_metric() {
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::OK, ""),
        ClientOptions::default(),
    );

    h.client.get("lookup").expect("get must succeed");

    let infos = h.logger.at(Level::INFO);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].message, "HTTP GET: lookup");
    assert_eq!(infos[0].metric.as_deref(), Some("FakeService/lookup"));
    assert!(infos[0].duration.is_some());
}

#[test]
fn form_data_is_url_encoded() {
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::OK, ""),
        ClientOptions::default(),
    );

    h.client
        .post(Request::new("submit").with_form_data([("test1", "yes"), ("test2", "no")]))
        .expect("post must succeed");

    let requests = h.transport.requests();
    assert_eq!(
        requests[0].header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(requests[0].body.as_deref(), Some(b"test1=yes&test2=no".as_slice()));
}

#[test]
fn construction_errors_never_reach_transport() {
    let h = harness::<ServiceError>(
        StubTransport::replying(StatusCode::OK, ""),
        ClientOptions::default(),
    );

    let err = h
        .client
        .post_json(Request::new("lookup").with_body("already"), &json!({"zip": 1}))
        .expect_err("json and body conflict");
    assert_eq!(err.0, "Either set json or body");

    let err = h
        .client
        .get(Request::new("lookup").with_body("nope"))
        .expect_err("GET cannot carry a body");
    assert!(err.0.contains("GET"));

    let err = h
        .client
        .post(
            Request::new("submit")
                .with_header("Content-Type", "text/plain")
                .with_form_data([("a", "b")]),
        )
        .expect_err("form data conflicts with content type");
    assert_eq!(err.0, "Setting form data will overwrite supplied content-type");

    assert!(h.transport.requests().is_empty());
}

#[test]
fn structured_body_under_raw_format_is_serialization_error() {
    let h = harness::<Error>(
        StubTransport::replying(StatusCode::OK, ""),
        ClientOptions::default(),
    );

    let err = h
        .client
        .post(Request::new("lookup").with_body(json!({"zip": "12345"})))
        .expect_err("raw format cannot encode structured data");

    assert!(matches!(err, Error::Serialization { .. }));
    assert!(err
        .to_string()
        .starts_with("Failed to serialize request body. "));
    assert_eq!(h.logger.at(Level::ERROR).len(), 1);
    assert!(h.transport.requests().is_empty());
}

#[test]
fn client_is_shared_across_threads() {
    let outcomes = (0..8)
        .map(|_| Ok(TransportResponse::new(StatusCode::OK, "ok")))
        .collect();
    let h = harness::<Error>(StubTransport::new(outcomes), ClientOptions::default());

    let handles = (0..8)
        .map(|i| {
            let client = h.client.clone();
            std::thread::spawn(move || {
                client
                    .get(Request::new("lookup").with_parameters([("n", i)]))
                    .map(|response| response.code())
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let code = handle
            .join()
            .expect("worker must not panic")
            .expect("get must succeed");
        assert_eq!(code, 200);
    }
    assert_eq!(h.transport.requests().len(), 8);
}
