//! Shared utilities for integration tests.
//!
//! The mock servers speak just enough HTTP/1.1 for reqwest: one request per
//! connection, `Connection: close`, bodies sized by `Content-Length` or by EOF.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use agent_bridge::config::BridgeConfig;
use agent_bridge::lifecycle::build_bridge;
use agent_bridge::AgentBridge;

/// A request as seen by a mock server.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl MockRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }

    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }
}

/// What a mock server sends back.
pub enum MockReply {
    Json(u16, String),
    /// `text/event-stream`: each frame is written as `data: <frame>\n\n`,
    /// then the connection stays open for `hold_open` before closing.
    Sse {
        frames: Vec<String>,
        delay: Duration,
        hold_open: Duration,
    },
}

impl MockReply {
    pub fn json(status: u16, body: &str) -> Self {
        MockReply::Json(status, body.to_string())
    }

    pub fn sse(frames: &[&str]) -> Self {
        MockReply::Sse {
            frames: frames.iter().map(|f| f.to_string()).collect(),
            delay: Duration::from_millis(5),
            hold_open: Duration::ZERO,
        }
    }
}

/// Start a programmable mock server on an ephemeral port.
pub async fn start_mock_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(MockRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockReply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        serve(socket, handler).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn serve<F, Fut>(mut socket: TcpStream, handler: Arc<F>)
where
    F: Fn(MockRequest) -> Fut,
    Fut: Future<Output = MockReply>,
{
    let Some(request) = read_request(&mut socket).await else {
        return;
    };

    match handler(request).await {
        MockReply::Json(status, body) => {
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason(status),
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
        MockReply::Sse {
            frames,
            delay,
            hold_open,
        } => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for frame in frames {
                let frame = format!("data: {}\n\n", frame);
                if socket.write_all(frame.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                tokio::time::sleep(delay).await;
            }
            tokio::time::sleep(hold_open).await;
        }
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "authorization" => authorization = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(MockRequest {
        method,
        path,
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Mock OAuth2 token endpoint issuing `token-N` / `refresh-N`.
pub struct TokenEndpoint {
    pub addr: SocketAddr,
    pub requests: Arc<AtomicU32>,
    pub grants: Arc<Mutex<Vec<String>>>,
}

impl TokenEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}/oauth/token", self.addr)
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn grants(&self) -> Vec<String> {
        self.grants.lock().unwrap().clone()
    }
}

pub async fn start_token_endpoint(delay: Duration, expires_in: u64) -> TokenEndpoint {
    let requests = Arc::new(AtomicU32::new(0));
    let grants = Arc::new(Mutex::new(Vec::new()));
    let (r, g) = (requests.clone(), grants.clone());

    let addr = start_mock_server(move |req| {
        let (r, g) = (r.clone(), g.clone());
        async move {
            let n = r.fetch_add(1, Ordering::SeqCst) + 1;
            let form = req.form();
            g.lock()
                .unwrap()
                .push(form.get("grant_type").cloned().unwrap_or_default());
            tokio::time::sleep(delay).await;
            let body = serde_json::json!({
                "access_token": format!("token-{}", n),
                "token_type": "Bearer",
                "expires_in": expires_in,
                "refresh_token": format!("refresh-{}", n),
            });
            MockReply::json(200, &body.to_string())
        }
    })
    .await;

    TokenEndpoint {
        addr,
        requests,
        grants,
    }
}

/// Config pointing at `agent`, in-memory history, fast retries.
pub fn bridge_config(agent: SocketAddr) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.transport.base_url = format!("http://{}", agent);
    config.memory.persist = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.retries.jitter_ratio = 0.0;
    config.timeouts.request_secs = 5;
    config.timeouts.stream_secs = 5;
    config
}

pub fn with_auth(mut config: BridgeConfig, token: &TokenEndpoint) -> BridgeConfig {
    config.auth.enabled = true;
    config.auth.token_url = token.url();
    config.auth.client_id = "agent-bridge-tests".to_string();
    config.auth.client_secret = Some("test-secret".to_string());
    config
}

pub fn build(config: &BridgeConfig) -> Arc<AgentBridge> {
    Arc::new(build_bridge(config).unwrap())
}

/// Counts requests per path.
#[derive(Clone, Default)]
pub struct Hits(Arc<Mutex<HashMap<String, u32>>>);

impl Hits {
    pub fn record(&self, path: &str) {
        *self.0.lock().unwrap().entry(path.to_string()).or_default() += 1;
    }

    pub fn get(&self, path: &str) -> u32 {
        self.0.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}
