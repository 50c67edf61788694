//! Mock metadata provider for tests.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

/// A request as received by the mock provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Percent-encoded request path
    pub path: String,
    pub query: HashMap<String, String>,
}

pub enum MockReply {
    Json(StatusCode, JsonValue),
    Raw(StatusCode, &'static str),
    /// Never answer
    Hang,
}

pub type RequestLog = Arc<Mutex<Vec<ProviderRequest>>>;

/// Start a mock provider that answers each request with `reply_fn(path)`.
///
/// Returns the base URL (ending in `/v2/`) and the log of received requests.
pub async fn start_mock_provider<F>(reply_fn: F) -> (Url, RequestLog)
where
    F: Fn(&str) -> MockReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let reply_fn = Arc::new(reply_fn);
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let server_log = log.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let reply_fn = reply_fn.clone();
            let log = server_log.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let reply_fn = reply_fn.clone();
                    let log = log.clone();
                    async move {
                        let path = req.uri().path().to_string();
                        let query: HashMap<String, String> = req
                            .uri()
                            .query()
                            .map(|q| {
                                url::form_urlencoded::parse(q.as_bytes())
                                    .into_owned()
                                    .collect()
                            })
                            .unwrap_or_default();
                        log.lock().unwrap().push(ProviderRequest {
                            path: path.clone(),
                            query,
                        });

                        let (status, body) = match reply_fn(&path) {
                            MockReply::Json(status, value) => {
                                (status, Bytes::from(serde_json::to_vec(&value).unwrap()))
                            }
                            MockReply::Raw(status, body) => {
                                (status, Bytes::from_static(body.as_bytes()))
                            }
                            MockReply::Hang => {
                                std::future::pending::<()>().await;
                                unreachable!()
                            }
                        };

                        let mut response = Response::new(Full::new(body));
                        *response.status_mut() = status;
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let base = Url::parse(&format!("http://127.0.0.1:{port}/v2/")).unwrap();
    (base, log)
}

/// Provider behaviour used across tests: identifiers ending in `bad` are
/// unknown, `limited` is throttled, `slow` hangs and `garbled` returns a
/// non-JSON body. Everything else resolves to a small record echoing the path.
pub fn unpaywall_like(path: &str) -> MockReply {
    if path.ends_with("bad") {
        MockReply::Json(
            StatusCode::NOT_FOUND,
            serde_json::json!({"HTTP_status_code": 404, "error": true}),
        )
    } else if path.ends_with("limited") {
        MockReply::Raw(StatusCode::TOO_MANY_REQUESTS, "slow down")
    } else if path.ends_with("slow") {
        MockReply::Hang
    } else if path.ends_with("garbled") {
        MockReply::Raw(StatusCode::OK, "<html>not json</html>")
    } else if path.ends_with("broken") {
        MockReply::Raw(StatusCode::BAD_GATEWAY, "upstream broke")
    } else {
        MockReply::Json(
            StatusCode::OK,
            serde_json::json!({"path": path, "is_oa": true}),
        )
    }
}
