use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use http::StatusCode;
use lazyreq::prelude::{
    Binding, Context, ErrorCode, HyperExecutor, Request, RequireSuccess, RetryConfig, Retryer,
    TransportErrorKind,
};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into().into_bytes(),
        }
    }

    fn status(status: u16) -> Self {
        Self::new(status, Vec::<(String, String)>::new(), "")
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut response_index = 0;

            while response_index < responses.len() && Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_sends_rendered_headers_and_query() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        r#"{"items":[{"id":"a1","size":3}],"total":1}"#,
    )]);

    let token = Binding::new("stale");
    let request = Request::get(server.base_url.as_str())
        .path("/v1//items")
        .secret_header("Authorization", &token)
        .header("X-Client", "lazyreq-tests")
        .query("limit", "2")
        .query("filter", "name eq 'a'");
    token.set("Bearer fresh");

    let response = request
        .send_json(&Context::background())
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.string(&["items", "0", "id"]), Some("a1"));
    assert_eq!(response.int(&["items", "0", "size"]), Some(3));
    assert_eq!(response.int(&["total"]), Some(1));
    assert_eq!(response.header("content-type"), Some("application/json"));

    let captured = server.requests();
    assert_eq!(captured.len(), 1);
    let request = &captured[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/v1/items?filter=name+eq+%27a%27&limit=2");
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer fresh")
    );
    assert_eq!(
        request.headers.get("x-client").map(String::as_str),
        Some("lazyreq-tests")
    );
    assert_eq!(
        request.headers.get("accept").map(String::as_str),
        Some("application/json")
    );
}

#[derive(Serialize)]
struct NewItem {
    name: &'static str,
    tags: Vec<&'static str>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_serializes_json_body() {
    let server = MockServer::start(vec![MockResponse::new(
        201,
        vec![("Content-Type", "application/json")],
        r#"{"id":"item-1"}"#,
    )]);

    let response = Request::post(server.base_url.as_str())
        .path("items")
        .json_body(NewItem {
            name: "demo",
            tags: vec!["x", "y"],
        })
        .send_json(&Context::background())
        .await
        .expect("post should succeed");

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.string(&["id"]), Some("item-1"));

    let captured = server.requests();
    let request = &captured[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/items");
    assert_eq!(
        request.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    let body: Value = serde_json::from_slice(&request.body).expect("request body is json");
    assert_eq!(body, json!({ "name": "demo", "tags": ["x", "y"] }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_success_status_is_reported_after_draining() {
    let server = MockServer::start(vec![MockResponse::new(
        404,
        vec![("Content-Type", "text/plain")],
        "no such item",
    )]);

    let error = Request::get(server.base_url.as_str())
        .path("/missing")
        .send(&Context::background())
        .await
        .expect_err("404 should fail");

    assert_eq!(error.code(), ErrorCode::HttpStatus);
    assert_eq!(error.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(
        error.to_string(),
        format!("invalid status 404 Not Found for GET {}/missing", server.base_url)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retryer_recovers_from_server_errors() {
    let server = MockServer::start(vec![
        MockResponse::status(500),
        MockResponse::status(503),
        MockResponse::new(200, vec![("Content-Type", "application/json")], r#"{"ok":true}"#),
    ]);

    let retryer = Retryer::builder(RequireSuccess::new(HyperExecutor::new().expect("tls config")))
        .config(RetryConfig::standard().with_base_backoff(Duration::from_millis(1)))
        .build();
    let response = Request::get(server.base_url.as_str())
        .path("/flaky")
        .timeout(Duration::from_secs(2))
        .executor(retryer)
        .send_json(&Context::background())
        .await
        .expect("third attempt should succeed");

    assert_eq!(response.body(), &json!({ "ok": true }));
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_after_is_honored_between_attempts() {
    let server = MockServer::start(vec![
        MockResponse::new(429, vec![("Retry-After", "1")], "slow down"),
        MockResponse::new(200, vec![("Content-Type", "application/json")], "{}"),
    ]);

    // The throttle only sees delivered responses, so status checking wraps the retryer.
    let retryer = Retryer::builder(HyperExecutor::new().expect("tls config"))
        .config(RetryConfig::standard().with_base_backoff(Duration::from_millis(1)))
        .build();
    let request = Request::get(server.base_url.as_str()).executor(RequireSuccess::new(retryer));

    let started = Instant::now();
    request
        .send(&Context::background())
        .await
        .expect("second attempt should succeed");

    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsupported_targets_fail_without_network() {
    for url in ["ftp://files.example.com/archive", "localhost:8080"] {
        let error = Request::get(url)
            .executor(Retryer::new(HyperExecutor::new().expect("tls config")))
            .send(&Context::background())
            .await
            .expect_err("only http and https are supported");
        assert_eq!(
            error.transport_kind(),
            Some(TransportErrorKind::UnsupportedScheme),
            "{url}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn https_target_attempts_a_tls_handshake() {
    let server = MockServer::start(vec![MockResponse::status(200)]);
    let https_url = server.base_url.replacen("http://", "https://", 1);

    let error = Request::get(https_url.as_str())
        .executor(HyperExecutor::new().expect("tls config"))
        .send(&Context::background().with_timeout(Duration::from_millis(2500)))
        .await
        .expect_err("a plain http server cannot complete the handshake");

    let kind = error.transport_kind();
    assert!(
        kind.is_some_and(|kind| kind != TransportErrorKind::UnsupportedScheme),
        "unexpected error: {error}"
    );
    assert_eq!(server.served_count(), 1);
}

#[test]
fn default_executor_pool_is_not_tied_to_a_finished_runtime() {
    let server = MockServer::start(vec![
        MockResponse::new(200, vec![("Content-Type", "application/json")], r#"{"run":1}"#),
        MockResponse::new(200, vec![("Content-Type", "application/json")], r#"{"run":2}"#),
    ]);

    for run in 1..=2 {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build runtime");
        let response = runtime
            .block_on(Request::get(server.base_url.as_str()).send_json(&Context::background()))
            .expect("each runtime gets a working pool");
        assert_eq!(response.int(&["run"]), Some(run));
        drop(runtime);
    }
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_refused_is_retried_until_deadline() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let address = listener.local_addr().expect("read local address");
    drop(listener);

    let retryer = Retryer::builder(HyperExecutor::new().expect("tls config"))
        .config(RetryConfig::standard().with_base_backoff(Duration::from_millis(10)))
        .build();
    let error = Request::get(format!("http://{address}"))
        .executor(retryer)
        .send(&Context::background().with_timeout(Duration::from_millis(300)))
        .await
        .expect_err("nothing listens on the port");

    assert!(
        matches!(
            error.code(),
            ErrorCode::DeadlineBeforeNextTry | ErrorCode::DeadlineExceeded
        ),
        "unexpected error: {error}"
    );
}
