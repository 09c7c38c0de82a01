//! In-process stand-in for the rate-limiting gateway.
//!
//! Answers every path and method. Responses are driven by a
//! [`GatewayBehavior`]: a fixed group header, every Nth request throttled,
//! optional quota headers and an artificial delay.

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Quota values echoed in rate-limit headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaHeaders {
    pub limit_per_second: u64,
    pub current_per_second: u64,
    pub limit_per_minute: u64,
    pub current_per_minute: u64,
    pub remaining_per_minute: u64,
    pub reset_seconds: u64,
}

/// How the fake gateway responds.
#[derive(Debug, Clone, Default)]
pub struct GatewayBehavior {
    /// Return 429 for every Nth request (1-based)
    pub throttle_every: Option<u64>,
    /// Value of `X-RateLimit-Group` on every response
    pub group: Option<String>,
    /// Per-access-key group, takes precedence over `group`
    pub group_by_key: HashMap<String, String>,
    /// Quota headers attached to every response
    pub quota: Option<QuotaHeaders>,
    /// Delay before answering
    pub latency: Duration,
    /// Answer with this status instead of the method's success status
    pub status: Option<u16>,
}

impl GatewayBehavior {
    /// Always succeed.
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn throttle_every(mut self, n: u64) -> Self {
        self.throttle_every = Some(n);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_key_group(mut self, access_key: impl Into<String>, group: impl Into<String>) -> Self {
        self.group_by_key.insert(access_key.into(), group.into());
        self
    }

    pub fn with_quota(mut self, quota: QuotaHeaders) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// A request as seen by the gateway.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub api_key: Option<String>,
    pub access_key: Option<String>,
}

struct GatewayState {
    behavior: GatewayBehavior,
    counter: AtomicU64,
    received: Mutex<Vec<ReceivedRequest>>,
}

/// A running fake gateway bound to a random local port.
pub struct FakeGateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    handle: JoinHandle<()>,
}

impl FakeGateway {
    /// Bind to `127.0.0.1:0` and start serving.
    pub async fn start(behavior: GatewayBehavior) -> std::io::Result<Self> {
        let state = Arc::new(GatewayState {
            behavior,
            counter: AtomicU64::new(0),
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .fallback(handle_request)
            .layer(Extension(state.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                debug!(error = %e, "Fake gateway stopped");
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of requests answered so far.
    pub fn request_count(&self) -> u64 {
        self.state.counter.load(Ordering::SeqCst)
    }

    /// Everything received so far, in arrival order.
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state
            .received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// URL of a local port with nothing listening on it.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

async fn handle_request(
    Extension(state): Extension<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let behavior = &state.behavior;

    let received = inspect(&method, &uri, &headers);
    let access_key = received.access_key.clone();
    let auth_method = detect_auth_method(&received);
    if let Ok(mut log) = state.received.lock() {
        log.push(received);
    }

    if !behavior.latency.is_zero() {
        tokio::time::sleep(behavior.latency).await;
    }

    let throttled = behavior
        .throttle_every
        .map(|every| every > 0 && n % every == 0)
        .unwrap_or(false);

    let status = if throttled {
        StatusCode::TOO_MANY_REQUESTS
    } else if let Some(code) = behavior.status {
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    } else if method == Method::DELETE {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::OK
    };

    let mut out = HeaderMap::new();
    let group = access_key
        .as_ref()
        .and_then(|key| behavior.group_by_key.get(key))
        .or(behavior.group.as_ref());
    if let Some(group) = group {
        insert(&mut out, "x-ratelimit-group", group);
    }
    if let Some(auth_method) = auth_method {
        insert(&mut out, "x-auth-method", auth_method);
    }
    if let Some(quota) = behavior.quota {
        insert(&mut out, "x-ratelimit-limit-per-second", &quota.limit_per_second.to_string());
        insert(&mut out, "x-ratelimit-current-per-second", &quota.current_per_second.to_string());
        insert(&mut out, "x-ratelimit-limit-per-minute", &quota.limit_per_minute.to_string());
        insert(&mut out, "x-ratelimit-current-per-minute", &quota.current_per_minute.to_string());
        insert(
            &mut out,
            "x-ratelimit-remaining-per-minute",
            &quota.remaining_per_minute.to_string(),
        );
        insert(&mut out, "x-ratelimit-reset", &quota.reset_seconds.to_string());
    }

    let body = if status == StatusCode::NO_CONTENT {
        String::new()
    } else if throttled {
        "SlowDown".to_string()
    } else {
        "ok".to_string()
    };

    (status, out, body).into_response()
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then_some(value)
    })
}

fn inspect(method: &Method, uri: &Uri, headers: &HeaderMap) -> ReceivedRequest {
    let authorization = header(headers, "authorization");
    let api_key = header(headers, "x-api-key");
    let query = uri.query().map(str::to_string);

    let access_key = if let Some(auth) = &authorization {
        if let Some(rest) = auth.strip_prefix("AWS4-HMAC-SHA256 Credential=") {
            rest.split('/').next().map(str::to_string)
        } else if let Some(rest) = auth.strip_prefix("AWS ") {
            rest.split(':').next().map(str::to_string)
        } else {
            None
        }
    } else if let Some(key) = &api_key {
        Some(key.clone())
    } else if let Some(q) = &query {
        query_param(q, "AWSAccessKeyId")
            .map(str::to_string)
            .or_else(|| {
                query_param(q, "X-Amz-Credential")
                    .and_then(|c| c.split(['/', '%']).next())
                    .map(str::to_string)
            })
    } else {
        None
    };

    ReceivedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        authorization,
        api_key,
        access_key,
    }
}

fn detect_auth_method(request: &ReceivedRequest) -> Option<&'static str> {
    if let Some(auth) = &request.authorization {
        if auth.starts_with("AWS4-HMAC-SHA256") {
            return Some("sigv4");
        }
        if auth.starts_with("AWS ") {
            return Some("sigv2");
        }
    }
    if request.api_key.is_some() {
        return Some("api-key");
    }
    let query = request.query.as_deref()?;
    if query_param(query, "X-Amz-Algorithm").is_some() {
        Some("presigned-v4")
    } else if query_param(query, "AWSAccessKeyId").is_some() {
        Some("query-v2")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_throttles_every_nth_request() {
        let gateway = FakeGateway::start(GatewayBehavior::ok().throttle_every(3).with_group("basic"))
            .await
            .unwrap();
        let client = reqwest::Client::new();

        let mut statuses = Vec::new();
        for _ in 0..6 {
            let resp = client
                .get(format!("{}/bucket/obj", gateway.url()))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.headers()["x-ratelimit-group"], "basic");
            statuses.push(resp.status().as_u16());
        }

        assert_eq!(statuses, vec![200, 200, 429, 200, 200, 429]);
        assert_eq!(gateway.request_count(), 6);
    }

    #[tokio::test]
    async fn test_records_auth_material() {
        let gateway = FakeGateway::start(GatewayBehavior::ok().with_key_group("AK1", "premium"))
            .await
            .unwrap();
        let client = reqwest::Client::new();

        let resp = client
            .delete(format!("{}/bucket/obj", gateway.url()))
            .header("X-API-Key", "AK1")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        assert_eq!(resp.headers()["x-ratelimit-group"], "premium");
        assert_eq!(resp.headers()["x-auth-method"], "api-key");

        let received = gateway.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].method, "DELETE");
        assert_eq!(received[0].access_key.as_deref(), Some("AK1"));
    }

    #[test]
    fn test_access_key_from_v2_query() {
        let uri: Uri = "/bucket/obj?AWSAccessKeyId=AK9&Expires=1&Signature=abc"
            .parse()
            .unwrap();
        let req = inspect(&Method::GET, &uri, &HeaderMap::new());
        assert_eq!(req.access_key.as_deref(), Some("AK9"));
        assert_eq!(detect_auth_method(&req), Some("query-v2"));
    }
}
