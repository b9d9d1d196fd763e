//! Loopback HTTP stub for client tests.
//!
//! Serves a fixed list of responses in order, one per request, and records
//! what each request looked like.

use std::io::Read;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const RECV_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    status: u16,
    body: String,
    delay: Duration,
}

impl StubResponse {
    pub(crate) fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    /// Hold the request this long before answering.
    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) content_type: String,
    pub(crate) body: String,
}

pub(crate) struct StubServer {
    base_url: String,
    handle: JoinHandle<Vec<RecordedRequest>>,
}

impl StubServer {
    pub(crate) fn start(responses: Vec<StubResponse>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let base_url = format!("http://{addr}");

        let handle = thread::spawn(move || {
            let mut recorded = Vec::new();
            for response in responses {
                let Ok(Some(mut request)) = server.recv_timeout(RECV_DEADLINE) else {
                    break;
                };

                let content_type = request
                    .headers()
                    .iter()
                    .find(|header| header.field.equiv("Content-Type"))
                    .map(|header| header.value.as_str().to_string())
                    .unwrap_or_default();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                recorded.push(RecordedRequest {
                    method: request.method().to_string(),
                    path: request.url().to_string(),
                    content_type,
                    body,
                });

                thread::sleep(response.delay);
                let reply = tiny_http::Response::from_string(response.body)
                    .with_status_code(response.status)
                    .with_header(
                        tiny_http::Header::from_bytes(b"Content-Type", b"application/json")
                            .unwrap(),
                    );
                let _ = request.respond(reply);
            }
            recorded
        });

        Self { base_url, handle }
    }

    pub(crate) fn base_url(&self) -> String {
        self.base_url.clone()
    }

    /// Wait for every queued response to be served and return the requests.
    pub(crate) fn finish(self) -> Vec<RecordedRequest> {
        self.handle.join().unwrap()
    }
}

/// A URL nothing is listening on.
pub(crate) fn unused_local_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
